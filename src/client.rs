//! The client: option templates, chain assembly and the HTTP verbs.
//!
//! A [`Client`] holds an [`Options`] template. Each call clones the template,
//! applies the call's own options on top, builds the request and runs it
//! through the middleware chain:
//!
//! ```text
//! logger (if debug) -> user middleware, in order -> retry -> execution core
//! ```

use crate::execute::terminal;
use crate::middleware::{chain, logger_middleware, Middleware};
use crate::options::{self, Options, RequestOption};
use crate::{Context, Error, HttpClient, Request, Response, Result};
use http::Method;
use std::sync::OnceLock;
use std::time::Instant;
use url::Url;

/// A reusable HTTP client.
///
/// Cloning is cheap; clones share the connection pool and, in session mode,
/// the cookie jar.
///
/// # Examples
///
/// ```no_run
/// use relay_http::{options, Client, Context};
/// use std::collections::HashMap;
///
/// # async fn example() -> Result<(), relay_http::Error> {
/// let client = Client::session(vec![options::with_default_retry(), options::with_debug(true)]);
/// let ctx = Context::background();
///
/// client
///     .post(&ctx, "https://example.com/login", vec![
///         options::with_form([("user", "admin"), ("pass", "secret")]),
///     ])
///     .await?;
///
/// // The session cookie from the login response is sent automatically.
/// let profile = client
///     .get(&ctx, "https://example.com/profile", vec![
///         options::with_param(HashMap::from([("tab", "settings")])),
///     ])
///     .await?
///     .text()
///     .await?;
/// println!("{}", profile);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    opts: Options,
}

impl Client {
    /// Creates a client from template options.
    ///
    /// Without a [`options::with_client`] option the client gets its own
    /// connection pool.
    pub fn new(options: Vec<RequestOption>) -> Self {
        let mut opts = Options::default();
        opts.apply(options);
        if opts.client.is_none() {
            opts.client = Some(HttpClient::new());
        }
        Self { opts }
    }

    /// Creates a client in session mode: cookies set by responses are kept
    /// and sent on later calls.
    pub fn session(options: Vec<RequestOption>) -> Self {
        let mut all = Vec::with_capacity(options.len() + 1);
        all.push(options::with_session(true));
        all.extend(options);
        Self::new(all)
    }

    /// The template options every call starts from.
    pub fn template(&self) -> &Options {
        &self.opts
    }

    /// The HTTP client handle calls are sent with, unless overridden per call.
    pub fn http_client(&self) -> HttpClient {
        self.opts.client.clone().unwrap_or_default()
    }

    /// Sends a request with `method` to `url`.
    ///
    /// # Errors
    ///
    /// - a configuration error recorded by an option, before anything is sent
    /// - [`Error::InvalidUrl`] if `url` does not parse
    /// - transport, cancellation and retry errors from the chain
    pub async fn request(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        options: Vec<RequestOption>,
    ) -> Result<Response> {
        let mut opts = self.opts.clone();
        opts.apply(options);
        if let Some(err) = opts.error() {
            tracing::debug!(error = %err, "Request options rejected");
            return Err(err);
        }

        let url = with_query(Url::parse(url)?, opts.query());

        let ctx = match &opts.trace {
            Some(trace) => ctx.with_trace(trace.clone()),
            None => ctx.clone(),
        };

        let http = opts.client.clone().unwrap_or_default();
        let http = if opts.session {
            http.cookie_jar();
            http
        } else {
            http.detached()
        };

        tracing::debug!(method = %method, url = %url, session = opts.session, "Preparing HTTP request");

        let builder = http
            .reqwest()
            .request(method, url)
            .headers(opts.headers.clone());
        let inner = opts
            .attach_body(builder)?
            .build()
            .map_err(|e| Error::config(format!("failed to build request: {}", e)))?;

        let handler = chain(&assemble(&opts)).wrap(terminal());

        let started = Instant::now();
        let resp = handler.call(http, Request::new(inner, ctx.clone())).await?;
        let latency = started.elapsed();

        tracing::info!(
            status = resp.status().as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Received HTTP response"
        );
        Ok(Response::new(resp, latency, ctx))
    }

    pub async fn get(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::GET, url, options).await
    }

    pub async fn post(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::POST, url, options).await
    }

    pub async fn put(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::PUT, url, options).await
    }

    pub async fn patch(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::PATCH, url, options).await
    }

    pub async fn delete(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::DELETE, url, options).await
    }

    pub async fn head(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::HEAD, url, options).await
    }

    pub async fn connect(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::CONNECT, url, options).await
    }

    pub async fn options(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::OPTIONS, url, options).await
    }

    pub async fn trace(&self, ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
        self.request(ctx, Method::TRACE, url, options).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Orders the chain: logger outermost, user middleware, retry innermost.
fn assemble(opts: &Options) -> Vec<Middleware> {
    let mut middles = Vec::with_capacity(opts.middles.len() + 2);
    if opts.debug {
        middles.push(logger_middleware());
    }
    middles.extend(opts.middles.iter().cloned());
    if let Some(retry) = &opts.retry {
        middles.push(retry.clone());
    }
    middles
}

/// Appends `query` to the URL's existing query string.
fn with_query(mut url: Url, query: Option<&str>) -> Url {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return url;
    };
    let merged = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
        _ => query.to_string(),
    };
    url.set_query(Some(&merged));
    url
}

/// The lazily created client behind the free functions.
pub fn default_client() -> &'static Client {
    static DEFAULT: OnceLock<Client> = OnceLock::new();
    DEFAULT.get_or_init(Client::default)
}

/// Sends a request with the default client.
pub async fn request(ctx: &Context, method: Method, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    default_client().request(ctx, method, url, options).await
}

pub async fn get(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::GET, url, options).await
}

pub async fn post(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::POST, url, options).await
}

pub async fn put(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::PUT, url, options).await
}

pub async fn patch(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::PATCH, url, options).await
}

pub async fn delete(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::DELETE, url, options).await
}

pub async fn head(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::HEAD, url, options).await
}

pub async fn connect(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::CONNECT, url, options).await
}

pub async fn options(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::OPTIONS, url, options).await
}

pub async fn trace(ctx: &Context, url: &str, options: Vec<RequestOption>) -> Result<Response> {
    request(ctx, Method::TRACE, url, options).await
}
