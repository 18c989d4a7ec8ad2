//! Error types for pipeline calls.
//!
//! Every failure travels back along the middleware chain as a value. The
//! variants fall into a handful of kinds: configuration problems detected
//! while applying options, transport failures (including panics inside the
//! execution worker), cancellation, decode failures while consuming a
//! response, and retry exhaustion.

use http::StatusCode;

/// The main error type for pipeline calls.
///
/// # Examples
///
/// ```no_run
/// use relay_http::{Client, Context, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::new(vec![]);
/// let ctx = Context::background();
///
/// match client.get(&ctx, "https://api.example.com/users", vec![]).await {
///     Ok(response) => println!("status {}", response.status()),
///     Err(Error::ConfigurationError(msg)) => eprintln!("bad options: {}", msg),
///     Err(e) if e.is_cancellation() => eprintln!("gave up: {}", e),
///     Err(e) => eprintln!("transport failure: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An option could not be applied (marshal failure, unreadable upload
    /// file, unsupported query source, invalid header, ...).
    ///
    /// Configuration errors are detected before any network attempt is made.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The underlying network call failed (connection refused, DNS lookup
    /// failed, reqwest timeout, body read failure, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server kept redirecting past the client's redirect limit.
    #[error("Stopped after {limit} redirects")]
    TooManyRedirects {
        /// The limit that was reached
        limit: usize,
    },

    /// The execution worker panicked while performing the network call.
    ///
    /// The panic is caught at the worker boundary and carried here as its
    /// message; it is a transport-kind failure.
    #[error("HTTP worker panicked: {0}")]
    WorkerPanic(String),

    /// The call's context was cancelled, either during a network attempt or
    /// during a retry backoff wait.
    #[error("Request cancelled")]
    Cancelled,

    /// The call's context deadline elapsed.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// A structured decode (JSON or XML) of the response payload failed.
    ///
    /// The payload source has already been released when this is returned.
    #[error("Failed to decode {format} response (status {status}): {message}")]
    DecodeFailed {
        /// The format that was being decoded (`"json"` or `"xml"`)
        format: &'static str,
        /// The HTTP status code of the response
        status: StatusCode,
        /// The decoder's error message
        message: String,
    },

    /// Every retry attempt failed with an error.
    ///
    /// `attempts` counts physical attempts, including the first try.
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// The number of attempts made
        attempts: usize,
        /// The last error encountered
        last_error: Box<Error>,
    },

    /// A custom middleware rejected or failed the call.
    #[error("Middleware error: {0}")]
    Middleware(String),
}

impl Error {
    /// Builds a [`Error::Middleware`] from anything displayable.
    ///
    /// ```
    /// use relay_http::Error;
    ///
    /// let err = Error::middleware("token rejected");
    /// assert_eq!(err.to_string(), "Middleware error: token rejected");
    /// ```
    pub fn middleware(msg: impl std::fmt::Display) -> Self {
        Error::Middleware(msg.to_string())
    }

    pub(crate) fn config(msg: impl std::fmt::Display) -> Self {
        Error::ConfigurationError(msg.to_string())
    }

    /// Returns `true` for `Cancelled` and `DeadlineExceeded`, looking through
    /// retry exhaustion.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled | Error::DeadlineExceeded => true,
            Error::MaxRetriesExceeded { last_error, .. } => last_error.is_cancellation(),
            _ => false,
        }
    }

    /// Returns `true` if the failure happened in the transport or its worker.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Transport(_) | Error::WorkerPanic(_) | Error::TooManyRedirects { .. } => true,
            Error::MaxRetriesExceeded { last_error, .. } => last_error.is_transport(),
            _ => false,
        }
    }

    /// Returns `true` if the failure was raised while applying options.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::ConfigurationError(_) | Error::InvalidUrl(_))
    }

    /// Returns `true` if the transport reported a timeout or the call's
    /// deadline passed.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::DeadlineExceeded => true,
            Error::Transport(e) => e.is_timeout(),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if this error is potentially retryable.
    ///
    /// Transport failures are retryable. Configuration, decode and
    /// cancellation errors are not: repeating the call cannot fix them.
    ///
    /// ```
    /// use relay_http::Error;
    ///
    /// assert!(Error::WorkerPanic("boom".into()).is_retryable());
    /// assert!(!Error::Cancelled.is_retryable());
    /// assert!(!Error::ConfigurationError("bad".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::WorkerPanic(_) => true,
            Error::TooManyRedirects { .. } => false,
            Error::Middleware(_) => false,
            Error::ConfigurationError(_) => false,
            Error::InvalidUrl(_) => false,
            Error::Cancelled | Error::DeadlineExceeded => false,
            Error::DecodeFailed { .. } => false,
            Error::MaxRetriesExceeded { .. } => false,
        }
    }

    /// Returns the HTTP status code if this error carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::DecodeFailed { status, .. } => Some(*status),
            Error::Transport(e) => e.status(),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.status(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for pipeline calls.
pub type Result<T> = std::result::Result<T, Error>;
