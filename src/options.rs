//! Declarative request options.
//!
//! Every option is a [`RequestOption`]: a boxed closure that adjusts an
//! [`Options`] value. Options are applied in order, both when building a
//! [`crate::Client`] template and per call on a clone of that template.
//!
//! Options never fail on their own. An option that cannot be honored (a
//! missing upload file, a value that will not serialize) records a
//! configuration error; the first one recorded is returned by the call
//! before anything is sent.
//!
//! ```
//! use relay_http::options::{self, Options};
//! use std::collections::HashMap;
//!
//! let mut opts = Options::default();
//! opts.apply(vec![
//!     options::with_param(HashMap::from([("page", "2")])),
//!     options::with_json(&serde_json::json!({ "name": "relay" })),
//!     options::with_debug(true),
//! ]);
//!
//! assert_eq!(opts.query(), Some("page=2"));
//! assert_eq!(opts.headers()["content-type"], "application/json");
//! assert!(opts.error().is_none());
//! ```

use crate::context::Trace;
use crate::encode;
use crate::middleware::{self, Middleware};
use crate::retry::{Retry, RetryPolicy};
use crate::{Error, HttpClient, Result};
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A single request option.
pub type RequestOption = Box<dyn FnOnce(&mut Options) + Send>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";
const XML_CONTENT_TYPE: &str = "application/xml";

/// The accumulated configuration of a call.
#[derive(Clone, Default)]
pub struct Options {
    pub(crate) err: Option<String>,
    pub(crate) debug: bool,
    pub(crate) session: bool,
    pub(crate) client: Option<HttpClient>,
    pub(crate) headers: HeaderMap,
    pub(crate) query: Option<String>,
    pub(crate) body: Option<Payload>,
    pub(crate) middles: Vec<Middleware>,
    pub(crate) retry: Option<Middleware>,
    pub(crate) trace: Option<Arc<dyn Trace>>,
}

impl Options {
    /// Applies `options` in order.
    pub fn apply<I>(&mut self, options: I)
    where
        I: IntoIterator<Item = RequestOption>,
    {
        for option in options {
            option(self);
        }
    }

    /// Records a configuration error unless one is already recorded.
    pub(crate) fn fail(&mut self, msg: impl fmt::Display) {
        if self.err.is_none() {
            self.err = Some(msg.to_string());
        }
    }

    fn set_content_type(&mut self, value: &'static str) {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(value));
    }

    /// The first configuration error recorded, as an [`Error`].
    pub fn error(&self) -> Option<Error> {
        self.err.as_deref().map(Error::config)
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Headers set by body options (content type).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn is_session(&self) -> bool {
        self.session
    }

    pub fn client(&self) -> Option<&HttpClient> {
        self.client.as_ref()
    }

    /// Number of user middleware installed, header and cookie injection
    /// included.
    pub fn middleware_count(&self) -> usize {
        self.middles.len()
    }

    pub fn has_retry(&self) -> bool {
        self.retry.is_some()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Installs the body on `builder`.
    pub(crate) fn attach_body(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match &self.body {
            None => Ok(builder),
            Some(Payload::Bytes(bytes)) => Ok(builder.body(bytes.clone())),
            Some(Payload::Stream(slot)) => {
                let body = slot
                    .lock()
                    .map_err(|_| Error::config("request body lock poisoned"))?
                    .take()
                    .ok_or_else(|| Error::config("streamed request body was already sent"))?;
                Ok(builder.body(body))
            }
            Some(Payload::Multipart(upload)) => Ok(builder.multipart(upload.form())),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("err", &self.err)
            .field("debug", &self.debug)
            .field("session", &self.session)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("middles", &self.middles.len())
            .field("retry", &self.retry.is_some())
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

/// A request body source.
#[derive(Clone)]
pub(crate) enum Payload {
    /// An in-memory body; replayable.
    Bytes(Bytes),
    /// A streaming body; can be sent exactly once.
    Stream(Arc<Mutex<Option<reqwest::Body>>>),
    /// A file upload, rebuilt into a fresh multipart form per call.
    Multipart(Upload),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Payload::Stream(_) => f.write_str("Stream"),
            Payload::Multipart(upload) => f
                .debug_struct("Multipart")
                .field("field", &upload.field)
                .field("file_name", &upload.file_name)
                .field("size", &upload.contents.len())
                .finish(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Upload {
    field: String,
    file_name: String,
    contents: Bytes,
    extras: BTreeMap<String, String>,
}

impl Upload {
    fn form(&self) -> reqwest::multipart::Form {
        let part = reqwest::multipart::Part::bytes(self.contents.to_vec())
            .file_name(self.file_name.clone());
        self.extras.iter().fold(
            reqwest::multipart::Form::new().part(self.field.clone(), part),
            |form, (name, value)| form.text(name.clone(), value.clone()),
        )
    }
}

/// A file to upload as a multipart form.
///
/// `name` is the form field the file is sent under; `extras` are sent as
/// additional text fields.
#[derive(Debug, Clone, Default)]
pub struct File {
    pub path: PathBuf,
    pub name: String,
    pub extras: BTreeMap<String, String>,
}

impl File {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            extras: BTreeMap::new(),
        }
    }

    /// Adds an extra text field.
    pub fn extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(name.into(), value.into());
        self
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A cookie to inject into the client's jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Renders the cookie in `Set-Cookie` form.
impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(path) = &self.path {
            write!(f, "; Path={}", path)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        Ok(())
    }
}

/// Encodes a mapping as the query string.
pub fn with_param<I, K, V>(params: I) -> RequestOption
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let query = encode::encode_map(params);
    Box::new(move |opts: &mut Options| opts.query = Some(query))
}

/// Encodes a record as the query string. See [`crate::encode`] for the
/// field naming rules.
pub fn with_query<T>(record: &T) -> RequestOption
where
    T: Serialize + ?Sized,
{
    let encoded = encode::encode_record(record);
    Box::new(move |opts: &mut Options| match encoded {
        Ok(query) => opts.query = Some(query),
        Err(e) => opts.fail(config_message(e)),
    })
}

/// Sends a mapping as a URL-encoded form body.
pub fn with_form<I, K, V>(params: I) -> RequestOption
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let body = encode::encode_map(params);
    Box::new(move |opts: &mut Options| {
        opts.body = Some(Payload::Bytes(Bytes::from(body)));
        opts.set_content_type(FORM_CONTENT_TYPE);
    })
}

/// Sends `value` as a JSON body.
pub fn with_json<T>(value: &T) -> RequestOption
where
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_vec(value);
    Box::new(move |opts: &mut Options| match encoded {
        Ok(body) => {
            opts.body = Some(Payload::Bytes(Bytes::from(body)));
            opts.set_content_type(JSON_CONTENT_TYPE);
        }
        Err(e) => opts.fail(format!("failed to encode JSON body: {}", e)),
    })
}

/// Sends `value` as an XML body.
pub fn with_xml<T>(value: &T) -> RequestOption
where
    T: Serialize + ?Sized,
{
    let encoded = quick_xml::se::to_string(value);
    Box::new(move |opts: &mut Options| match encoded {
        Ok(body) => {
            opts.body = Some(Payload::Bytes(Bytes::from(body)));
            opts.set_content_type(XML_CONTENT_TYPE);
        }
        Err(e) => opts.fail(format!("failed to encode XML body: {}", e)),
    })
}

/// Sends a caller-supplied body. No content type is set.
///
/// In-memory bodies can be retried; streaming bodies are sent at most once.
pub fn with_body(body: impl Into<reqwest::Body>) -> RequestOption {
    let body = body.into();
    let payload = match body.as_bytes() {
        Some(bytes) => Payload::Bytes(Bytes::copy_from_slice(bytes)),
        None => Payload::Stream(Arc::new(Mutex::new(Some(body)))),
    };
    Box::new(move |opts: &mut Options| opts.body = Some(payload))
}

/// Uploads a file as a multipart form. The file is read, and closed, when
/// the option is applied.
pub fn with_file(file: File) -> RequestOption {
    Box::new(move |opts: &mut Options| match read_file(&file.path) {
        Ok(contents) => {
            opts.headers.remove(CONTENT_TYPE);
            opts.body = Some(Payload::Multipart(Upload {
                field: file.name.clone(),
                file_name: file.file_name(),
                contents,
                extras: file.extras,
            }));
        }
        Err(msg) => opts.fail(msg),
    })
}

fn read_file(path: &Path) -> std::result::Result<Bytes, String> {
    std::fs::read(path)
        .map(Bytes::from)
        .map_err(|e| format!("failed to read upload file {}: {}", path.display(), e))
}

/// Sets `headers` on every request, replacing existing values.
pub fn with_headers(headers: HeaderMap) -> RequestOption {
    Box::new(move |opts: &mut Options| opts.middles.push(middleware::header_middleware(headers)))
}

/// Adds `cookies` to the client's cookie jar before sending, creating the jar
/// if needed.
pub fn with_cookies(cookies: Vec<Cookie>) -> RequestOption {
    Box::new(move |opts: &mut Options| opts.middles.push(middleware::cookie_middleware(cookies)))
}

/// Keeps (`true`) or detaches (`false`) the client's cookie jar for the call.
pub fn with_session(session: bool) -> RequestOption {
    Box::new(move |opts: &mut Options| opts.session = session)
}

/// Retries according to `policy`. Replaces any previously installed policy.
pub fn with_retry(policy: impl Retry + 'static) -> RequestOption {
    let retry = middleware::retry_middleware(Arc::new(policy));
    Box::new(move |opts: &mut Options| opts.retry = Some(retry))
}

/// Retries transport failures up to three times with linear backoff.
pub fn with_default_retry() -> RequestOption {
    with_retry(RetryPolicy::default())
}

/// Appends custom middleware; they run in the order given.
pub fn with_middleware<I>(middles: I) -> RequestOption
where
    I: IntoIterator<Item = Middleware>,
{
    let middles: Vec<Middleware> = middles.into_iter().collect();
    Box::new(move |opts: &mut Options| opts.middles.extend(middles))
}

/// Toggles request/response logging on the `relay_http::debug` target.
pub fn with_debug(debug: bool) -> RequestOption {
    Box::new(move |opts: &mut Options| opts.debug = debug)
}

/// Sends with `client` instead of the default one.
pub fn with_client(client: HttpClient) -> RequestOption {
    Box::new(move |opts: &mut Options| opts.client = Some(client))
}

/// Reports the call's lifecycle events to `trace`.
pub fn with_trace(trace: Arc<dyn Trace>) -> RequestOption {
    Box::new(move |opts: &mut Options| opts.trace = Some(trace))
}

fn config_message(err: Error) -> String {
    match err {
        Error::ConfigurationError(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn applied(options: Vec<RequestOption>) -> Options {
        let mut opts = Options::default();
        opts.apply(options);
        opts
    }

    fn body_bytes(opts: &Options) -> Bytes {
        match &opts.body {
            Some(Payload::Bytes(bytes)) => bytes.clone(),
            other => panic!("Expected in-memory body, got {:?}", other),
        }
    }

    #[test]
    fn test_form_body_and_content_type() {
        let opts = applied(vec![with_form([("user", "admin"), ("pass", "x y")])]);
        assert_eq!(body_bytes(&opts), "pass=x+y&user=admin");
        assert_eq!(opts.headers()[CONTENT_TYPE], FORM_CONTENT_TYPE);
    }

    #[test]
    fn test_xml_body() {
        #[derive(Serialize)]
        struct Login {
            user: String,
        }
        let opts = applied(vec![with_xml(&Login { user: "root".into() })]);
        assert_eq!(body_bytes(&opts), "<Login><user>root</user></Login>");
        assert_eq!(opts.headers()[CONTENT_TYPE], XML_CONTENT_TYPE);
    }

    #[test]
    fn test_query_rejection_is_recorded() {
        let opts = applied(vec![with_query(&[1, 2, 3])]);
        let err = opts.error().unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("only mapping or structured-record"));
    }

    #[test]
    fn test_first_error_wins_and_later_options_still_run() {
        let opts = applied(vec![
            with_file(File::new("/definitely/not/here.bin", "upload")),
            with_query(&42),
            with_debug(true),
        ]);
        assert!(opts.error().unwrap().to_string().contains("failed to read upload file"));
        assert!(opts.is_debug());
    }

    #[test]
    fn test_file_upload_reads_contents_and_clears_content_type() {
        let path = std::env::temp_dir().join(format!("relay-http-options-{}.txt", std::process::id()));
        std::fs::write(&path, b"hello").unwrap();

        let opts = applied(vec![
            with_json(&serde_json::json!({})),
            with_file(File::new(&path, "file").extra("kind", "report")),
        ]);
        std::fs::remove_file(&path).unwrap();

        assert!(opts.error().is_none());
        assert!(opts.headers().get(CONTENT_TYPE).is_none());
        match &opts.body {
            Some(Payload::Multipart(upload)) => {
                assert_eq!(upload.field, "file");
                assert_eq!(upload.file_name, path.file_name().unwrap().to_string_lossy());
                assert_eq!(upload.contents, "hello");
                assert_eq!(upload.extras["kind"], "report");
            }
            other => panic!("Expected multipart body, got {:?}", other),
        }
    }

    #[test]
    fn test_in_memory_body_is_replayable() {
        let opts = applied(vec![with_body("raw payload")]);
        assert_eq!(body_bytes(&opts), "raw payload");
        assert!(opts.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_streamed_body_is_sent_once() {
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from("chunk"))]);
        let opts = applied(vec![with_body(reqwest::Body::wrap_stream(stream))]);
        let http = reqwest::Client::new();

        let first = opts.attach_body(http.post("http://localhost/"));
        assert!(first.is_ok());
        let second = opts.attach_body(http.post("http://localhost/")).unwrap_err();
        assert!(second.is_configuration());
    }

    #[test]
    fn test_middleware_options_append_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session", HeaderValue::from_static("abc"));
        let opts = applied(vec![
            with_headers(headers),
            with_cookies(vec![Cookie::new("hello", "123")]),
            with_middleware(vec![middleware::logger_middleware()]),
            with_default_retry(),
        ]);
        assert_eq!(opts.middleware_count(), 3);
        assert!(opts.has_retry());
    }

    #[test]
    fn test_param_encoding() {
        let opts = applied(vec![with_param(HashMap::from([("key", "abc"), ("id", "1")]))]);
        assert_eq!(opts.query(), Some("id=1&key=abc"));
    }

    #[test]
    fn test_cookie_display() {
        let cookie = Cookie::new("sid", "42").path("/").domain("example.com");
        assert_eq!(cookie.to_string(), "sid=42; Path=/; Domain=example.com");
    }
}
