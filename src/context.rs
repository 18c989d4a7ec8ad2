//! Call context: cancellation, deadlines and trace hooks.
//!
//! A [`Context`] travels with every request through the whole middleware
//! chain, every retry attempt and every backoff wait. Cancelling it (or
//! letting its deadline pass) makes all in-flight waits resolve promptly.

use crate::Error;
use http::{Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Low-level hook observing a call as it moves through the pipeline.
///
/// All methods have empty default bodies; implement only the events you need.
/// Hooks run inline on the calling task and must not block.
pub trait Trace: Send + Sync {
    /// A physical attempt is about to be handed to the transport.
    fn request_start(&self, _method: &Method, _url: &Url) {}

    /// The transport returned response headers.
    fn response_received(&self, _status: StatusCode, _elapsed: Duration) {}

    /// The physical attempt failed (transport error, panic or cancellation).
    fn request_failed(&self, _error: &Error, _elapsed: Duration) {}

    /// The retry middleware is about to wait before attempt `attempt + 1`.
    fn retry_scheduled(&self, _attempt: usize, _wait: Duration) {}
}

/// Cancellation scope for one logical call.
///
/// Cloning a context shares its cancellation token, so cancelling through any
/// clone (or through the token handed out by [`Context::with_cancel`]) is seen
/// by all of them.
///
/// # Examples
///
/// ```
/// use relay_http::Context;
/// use std::time::Duration;
///
/// let ctx = Context::background();
/// assert!(ctx.err().is_none());
///
/// let (ctx, cancel) = ctx.with_cancel();
/// cancel.cancel();
/// assert!(ctx.err().is_some());
///
/// let bounded = Context::background().with_timeout(Duration::from_secs(5));
/// assert!(bounded.deadline().is_some());
/// ```
#[derive(Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    trace: Option<Arc<dyn Trace>>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context that is additionally cancelled through the returned
    /// token. Cancelling the parent still cancels the child.
    pub fn with_cancel(&self) -> (Context, CancellationToken) {
        let token = self.token.child_token();
        let ctx = Context {
            token: token.clone(),
            deadline: self.deadline,
            trace: self.trace.clone(),
        };
        (ctx, token)
    }

    /// Derives a context whose deadline is `timeout` from now, or the
    /// parent's deadline if that is earlier. A timeout too large to represent
    /// adds no deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derives a context with the given deadline, keeping the parent's
    /// deadline if that is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Context {
            token: self.token.clone(),
            deadline: Some(deadline),
            trace: self.trace.clone(),
        }
    }

    /// Derives a context carrying a trace hook.
    pub fn with_trace(&self, trace: Arc<dyn Trace>) -> Context {
        Context {
            token: self.token.clone(),
            deadline: self.deadline,
            trace: Some(trace),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn trace(&self) -> Option<&dyn Trace> {
        self.trace.as_deref()
    }

    /// Returns the cancellation error if the context is already done.
    ///
    /// Explicit cancellation takes precedence over an elapsed deadline.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes, yielding
    /// the matching cancellation error. Never resolves for a background
    /// context.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Error::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let (ctx, cancel) = Context::background().with_cancel();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.done().await })
        };
        cancel.cancel();
        let err = waiter.await.unwrap();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_done_resolves_on_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let err = ctx.done().await;
        assert!(matches!(err, Error::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(Error::DeadlineExceeded)));
    }

    #[test]
    fn test_parent_cancel_reaches_child() {
        let (parent, parent_cancel) = Context::background().with_cancel();
        let (child, _) = parent.with_cancel();
        parent_cancel.cancel();
        assert!(child.is_done());
    }

    #[test]
    fn test_unrepresentable_timeout_keeps_parent_deadline() {
        let unbounded = Context::background().with_timeout(Duration::MAX);
        assert!(unbounded.deadline().is_none());
        assert!(!unbounded.is_done());

        let near = Context::background().with_timeout(Duration::from_secs(1));
        assert_eq!(near.with_timeout(Duration::MAX).deadline(), near.deadline());
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let near = Context::background().with_timeout(Duration::from_secs(1));
        let far = near.with_timeout(Duration::from_secs(60));
        assert_eq!(near.deadline(), far.deadline());
    }
}
