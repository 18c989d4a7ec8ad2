//! Retry policies, trigger predicates and backoff functions.
//!
//! A [`Retry`] policy tells the retry middleware how many attempts to make,
//! which outcomes should be retried, and how long to wait between attempts.
//! Policies are stateless; the attempt loop itself lives in
//! [`crate::middleware::retry_middleware`].

use crate::rate_limit::RateLimitInfo;
use crate::Result;
use http::StatusCode;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The outcome of one physical attempt, as seen by predicates and backoff.
pub type Outcome = Result<reqwest::Response>;

/// The pluggable contract governing attempt limits, trigger conditions and
/// backoff timing.
///
/// Attempt indices passed to [`Retry::wait_for`] are zero-based: index `0`
/// is the wait after the first try. At most `max_retries() + 1` physical
/// attempts are made.
pub trait Retry: Send + Sync {
    /// Maximum number of retries after the first attempt.
    fn max_retries(&self) -> usize;

    /// The base wait handed to [`Retry::wait_for`] as `min`.
    fn wait_time(&self) -> Duration;

    /// The wait ceiling handed to [`Retry::wait_for`] as `max`.
    fn max_wait_time(&self) -> Duration;

    /// Predicates deciding whether an outcome should be retried. The outcome
    /// is retried if any of them fires.
    fn conditions(&self) -> Vec<Arc<dyn RetryPredicate>>;

    /// Computes the wait before the next attempt.
    ///
    /// # Errors
    ///
    /// An error aborts the retry loop and is returned to the caller.
    fn wait_for(&self, outcome: &Outcome, min: Duration, max: Duration, attempt: usize)
        -> Result<Duration>;
}

/// Trait for determining whether an attempt's outcome should be retried.
///
/// Closures taking `&Outcome` implement it too.
///
/// # Examples
///
/// ```
/// use relay_http::retry::{Outcome, RetryPredicate};
///
/// struct RetryOnRateLimit;
///
/// impl RetryPredicate for RetryOnRateLimit {
///     fn should_retry(&self, outcome: &Outcome) -> bool {
///         matches!(outcome, Ok(resp) if resp.status().as_u16() == 429)
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Returns `true` if the outcome should be retried.
    fn should_retry(&self, outcome: &Outcome) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(&Outcome) -> bool + Send + Sync,
{
    fn should_retry(&self, outcome: &Outcome) -> bool {
        self(outcome)
    }
}

/// Retry whenever the attempt produced an error that is retryable
/// (transport failures and worker panics). This is the default trigger.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnError;

impl RetryPredicate for RetryOnError {
    fn should_retry(&self, outcome: &Outcome) -> bool {
        matches!(outcome, Err(e) if e.is_retryable())
    }
}

/// Retry responses with a 5xx status.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnServerError;

impl RetryPredicate for RetryOnServerError {
    fn should_retry(&self, outcome: &Outcome) -> bool {
        matches!(outcome, Ok(resp) if resp.status().is_server_error())
    }
}

/// Retry only on transport timeouts.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, outcome: &Outcome) -> bool {
        matches!(outcome, Err(e) if e.is_timeout())
    }
}

/// Retry responses whose status is in the given set.
#[derive(Debug, Clone)]
pub struct RetryOnStatus(pub Vec<StatusCode>);

impl RetryPredicate for RetryOnStatus {
    fn should_retry(&self, outcome: &Outcome) -> bool {
        matches!(outcome, Ok(resp) if self.0.contains(&resp.status()))
    }
}

/// Wait-computation functions.
///
/// # Examples
///
/// ```
/// use relay_http::retry::Backoff;
/// use std::time::Duration;
///
/// let min = Duration::from_millis(100);
/// let max = Duration::from_secs(1);
///
/// // Linear: 100ms, 200ms, 300ms, ... capped at 1s
/// assert_eq!(Backoff::Linear.delay(None, min, max, 2), Duration::from_millis(300));
///
/// // Exponential: 100ms, 200ms, 400ms, ... capped at 1s
/// let exponential = Backoff::Exponential { jitter: false };
/// assert_eq!(exponential.delay(None, min, max, 2), Duration::from_millis(400));
/// ```
#[derive(Clone, Copy, Default)]
pub enum Backoff {
    /// `min * (1 + attempt)`, capped at `max`.
    #[default]
    Linear,

    /// `min * 2^attempt`, capped at `max`. Jitter scales the wait by a random
    /// factor between 50% and 100%.
    Exponential {
        /// Whether to add random jitter to delays.
        jitter: bool,
    },

    /// Always `min`.
    Fixed,

    /// Honors `Retry-After` / `X-RateLimit-Reset` on the response (capped at
    /// `max`), falling back to [`Backoff::Linear`].
    RetryAfter,

    /// Custom wait function taking the response (if the attempt produced
    /// one), `min`, `max` and the zero-based attempt index.
    Custom(fn(Option<&reqwest::Response>, Duration, Duration, usize) -> Duration),
}

impl Backoff {
    /// Computes the wait before the retry following attempt `attempt`.
    pub fn delay(
        &self,
        response: Option<&reqwest::Response>,
        min: Duration,
        max: Duration,
        attempt: usize,
    ) -> Duration {
        match self {
            Backoff::Linear => linear(min, max, attempt),
            Backoff::Exponential { jitter } => {
                let exponent = u32::try_from(attempt).unwrap_or(u32::MAX).min(31);
                let delay = min.saturating_mul(1u32 << exponent).min(max);
                if *jitter {
                    let factor = rand::thread_rng().gen_range(0.5..=1.0);
                    delay.mul_f64(factor)
                } else {
                    delay
                }
            }
            Backoff::Fixed => min.min(max),
            Backoff::RetryAfter => response
                .and_then(|resp| RateLimitInfo::from_headers(resp.headers()).delay(max))
                .unwrap_or_else(|| linear(min, max, attempt)),
            Backoff::Custom(wait_fn) => wait_fn(response, min, max, attempt),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Linear => f.write_str("Linear"),
            Backoff::Exponential { jitter } => {
                f.debug_struct("Exponential").field("jitter", jitter).finish()
            }
            Backoff::Fixed => f.write_str("Fixed"),
            Backoff::RetryAfter => f.write_str("RetryAfter"),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn linear(min: Duration, max: Duration, attempt: usize) -> Duration {
    let factor = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
    min.saturating_mul(factor).min(max)
}

/// A configurable [`Retry`] policy.
///
/// The default is 3 retries, a 100µs base wait, a 10s ceiling, linear
/// backoff and a single trigger: "the attempt failed with a transport error".
///
/// # Examples
///
/// ```
/// use relay_http::retry::{Backoff, Retry, RetryOnServerError, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new()
///     .with_max_retries(5)
///     .with_wait_time(Duration::from_millis(50))
///     .with_max_wait_time(Duration::from_secs(2))
///     .with_condition(RetryOnServerError)
///     .with_backoff(Backoff::Exponential { jitter: true });
///
/// assert_eq!(policy.max_retries(), 5);
/// assert_eq!(policy.conditions().len(), 2);
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    wait_time: Duration,
    max_wait_time: Duration,
    conditions: Vec<Arc<dyn RetryPredicate>>,
    backoff: Backoff,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: usize = 3;
    pub const DEFAULT_WAIT_TIME: Duration = Duration::from_micros(100);
    pub const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_secs(10);

    /// Creates the default policy.
    pub fn new() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            wait_time: Self::DEFAULT_WAIT_TIME,
            max_wait_time: Self::DEFAULT_MAX_WAIT_TIME,
            conditions: vec![Arc::new(RetryOnError)],
            backoff: Backoff::Linear,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_max_wait_time(mut self, max_wait_time: Duration) -> Self {
        self.max_wait_time = max_wait_time;
        self
    }

    /// Adds a trigger predicate alongside the existing ones.
    pub fn with_condition(mut self, predicate: impl RetryPredicate + 'static) -> Self {
        self.conditions.push(Arc::new(predicate));
        self
    }

    /// Replaces all trigger predicates.
    pub fn with_conditions(mut self, predicates: Vec<Arc<dyn RetryPredicate>>) -> Self {
        self.conditions = predicates;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("wait_time", &self.wait_time)
            .field("max_wait_time", &self.max_wait_time)
            .field("conditions", &self.conditions.len())
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Retry for RetryPolicy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn wait_time(&self) -> Duration {
        self.wait_time
    }

    fn max_wait_time(&self) -> Duration {
        self.max_wait_time
    }

    fn conditions(&self) -> Vec<Arc<dyn RetryPredicate>> {
        self.conditions.clone()
    }

    fn wait_for(
        &self,
        outcome: &Outcome,
        min: Duration,
        max: Duration,
        attempt: usize,
    ) -> Result<Duration> {
        Ok(self.backoff.delay(outcome.as_ref().ok(), min, max, attempt))
    }
}
