//! The HTTP client handle every handler receives.
//!
//! [`HttpClient`] pairs a pooled `reqwest::Client` with a cookie jar slot.
//! Redirects are followed by the execution core rather than by reqwest, so
//! every hop reads from and writes to the jar.
//! The jar is created lazily, the first time something asks for it (the
//! cookie middleware does), and is shared by every clone of the handle. A
//! call with session mode disabled runs on a detached handle whose slot is
//! empty, so it neither sees nor records the shared cookies.

use crate::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::redirect::Policy;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

/// A cheaply cloneable HTTP client handle with an optional shared cookie jar.
///
/// # Examples
///
/// ```no_run
/// use relay_http::HttpClient;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), relay_http::Error> {
/// let http = HttpClient::builder()
///     .timeout(Duration::from_secs(30))
///     .default_header("User-Agent", "scanner/1.0")?
///     .cookie_store(true)
///     .build()?;
/// assert!(http.existing_cookie_jar().is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    jar: Arc<OnceLock<Arc<Jar>>>,
    max_redirects: usize,
}

impl HttpClient {
    pub const DEFAULT_MAX_REDIRECTS: usize = 10;

    /// Creates a handle around a default `reqwest::Client`, with no cookie jar.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build HTTP client; using reqwest defaults");
                reqwest::Client::new()
            });
        Self::from_reqwest(client)
    }

    /// Creates a new `HttpClientBuilder`.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Wraps an already configured `reqwest::Client`.
    ///
    /// Cookies and redirects are managed by this handle, so the wrapped
    /// client should carry no cookie provider and be built with
    /// `redirect::Policy::none()`. A client that follows redirects itself
    /// bypasses the jar on every hop after the first.
    pub fn from_reqwest(client: reqwest::Client) -> Self {
        Self {
            inner: client,
            jar: Arc::new(OnceLock::new()),
            max_redirects: Self::DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Maximum number of redirects followed per attempt; `0` returns
    /// redirect responses as they are.
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Returns a handle with a different redirect limit, sharing pool and jar.
    pub fn with_max_redirects(&self, max_redirects: usize) -> Self {
        Self {
            max_redirects,
            ..self.clone()
        }
    }

    /// The pooled `reqwest::Client` used for the actual network calls.
    pub fn reqwest(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Returns the shared cookie jar, creating it if none exists yet.
    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.jar.get_or_init(|| Arc::new(Jar::default())).clone()
    }

    /// Returns the cookie jar only if one has already been created.
    pub fn existing_cookie_jar(&self) -> Option<&Arc<Jar>> {
        self.jar.get()
    }

    /// A handle on the same connection pool with an empty, unshared jar slot.
    pub fn detached(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            jar: Arc::new(OnceLock::new()),
            max_redirects: self.max_redirects,
        }
    }

    /// The `Cookie` header value the jar would send to `url`, if any.
    pub fn cookies_for(&self, url: &Url) -> Option<HeaderValue> {
        self.existing_cookie_jar()?.cookies(url)
    }

    /// Records `Set-Cookie` headers from a response received from `url`.
    ///
    /// Does nothing when no jar exists.
    pub(crate) fn store_cookies(&self, headers: &HeaderMap, url: &Url) {
        if let Some(jar) = self.existing_cookie_jar() {
            let mut set_cookies = headers.get_all(http::header::SET_COOKIE).iter();
            jar.set_cookies(&mut set_cookies, url);
        }
    }

    /// Returns `true` if both handles share the same cookie jar slot.
    pub fn shares_cookies_with(&self, other: &HttpClient) -> bool {
        Arc::ptr_eq(&self.jar, &other.jar)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("cookie_jar", &self.jar.get().is_some())
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}

/// Builder for configuring and creating an [`HttpClient`].
///
/// # Examples
///
/// ```no_run
/// use relay_http::HttpClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), relay_http::Error> {
/// let http = HttpClientBuilder::new()
///     .timeout(Duration::from_secs(30))
///     .connect_timeout(Duration::from_secs(5))
///     .user_agent("my-app/1.0")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct HttpClientBuilder {
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    cookie_store: bool,
    max_redirects: usize,
}

impl HttpClientBuilder {
    /// Creates a new `HttpClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            default_headers: HeaderMap::new(),
            timeout: None,
            connect_timeout: None,
            user_agent: None,
            cookie_store: false,
            max_redirects: HttpClient::DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the total per-request transport timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Creates the cookie jar up front instead of on first use, so cookies
    /// set by servers persist across session-mode calls even before any
    /// cookie option has been used.
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.cookie_store = enabled;
        self
    }

    /// Sets how many redirects are followed per attempt (default 10).
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Builds the configured `HttpClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client configuration is invalid.
    pub fn build(self) -> Result<HttpClient> {
        let mut builder = reqwest::Client::builder()
            .default_headers(self.default_headers)
            .redirect(Policy::none());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        let client = builder.build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        let http = HttpClient::from_reqwest(client).with_max_redirects(self.max_redirects);
        if self.cookie_store {
            http.cookie_jar();
        }
        Ok(http)
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
