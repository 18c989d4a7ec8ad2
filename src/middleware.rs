//! Handlers, middleware composition and the built-in interceptors.
//!
//! A [`Handler`] performs a call; a [`Middleware`] wraps a handler into a new
//! one. [`chain`] composes middleware so that the first listed is outermost:
//! it sees the request first and the response last.
//!
//! ```
//! use relay_http::middleware::{Handler, Middleware};
//!
//! let timing = Middleware::new(|next: Handler| {
//!     Handler::new(move |client, request| {
//!         let next = next.clone();
//!         async move {
//!             let started = std::time::Instant::now();
//!             let response = next.call(client, request).await;
//!             tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "call finished");
//!             response
//!         }
//!     })
//! });
//! ```

use crate::options::Cookie;
use crate::retry::{Outcome, Retry};
use crate::{Error, HttpClient, Request, Result};
use futures_util::future::BoxFuture;
use http::HeaderMap;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type HandlerFn = dyn Fn(HttpClient, Request) -> BoxFuture<'static, Result<reqwest::Response>>
    + Send
    + Sync;

/// The unit of request execution: `(client, request) -> response`.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HttpClient, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<reqwest::Response>> + Send + 'static,
    {
        Handler(Arc::new(move |client, request| Box::pin(f(client, request))))
    }

    pub fn call(&self, client: HttpClient, request: Request) -> BoxFuture<'static, Result<reqwest::Response>> {
        (self.0)(client, request)
    }
}

/// A function from [`Handler`] to [`Handler`].
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(Handler) -> Handler + Send + Sync>);

impl Middleware {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Middleware(Arc::new(f))
    }

    /// Wraps `next`, returning the decorated handler.
    pub fn wrap(&self, next: Handler) -> Handler {
        (self.0)(next)
    }
}

/// Composes middleware right to left: `chain([m1, m2, m3]).wrap(t)` is
/// `m1(m2(m3(t)))`.
pub fn chain(middles: &[Middleware]) -> Middleware {
    let middles: Vec<Middleware> = middles.to_vec();
    Middleware::new(move |next| {
        middles
            .iter()
            .rev()
            .fold(next, |handler, middleware| middleware.wrap(handler))
    })
}

/// Logs every request passing through it, and the response or error coming
/// back, at `info` on the `relay_http::debug` target.
///
/// Debug mode installs it as the outermost middleware, so it sees each call
/// once, before retries. Place it inside the retry middleware to see every
/// attempt.
///
/// The request dump includes the buffered body when there is one; response
/// bodies are never read here so streaming consumers are unaffected.
pub fn logger_middleware() -> Middleware {
    Middleware::new(|next: Handler| {
        Handler::new(move |client, request| {
            let next = next.clone();
            async move {
                tracing::info!(target: "relay_http::debug", "[request]\n{}", dump_request(&request));
                let outcome = next.call(client, request).await;
                match &outcome {
                    Ok(resp) => {
                        tracing::info!(target: "relay_http::debug", "[response]\n{}", dump_response(resp))
                    }
                    Err(e) => tracing::info!(target: "relay_http::debug", error = %e, "[response] error"),
                }
                outcome
            }
        })
    })
}

fn dump_request(request: &Request) -> String {
    let mut out = String::new();
    let _ = write!(out, "{} {} {:?}\r\n", request.method(), request.url(), request.inner().version());
    dump_headers(&mut out, request.headers());
    if let Some(body) = request.body_bytes() {
        out.push_str("\r\n");
        out.push_str(&String::from_utf8_lossy(body));
    }
    out
}

fn dump_response(resp: &reqwest::Response) -> String {
    let mut out = String::new();
    let _ = write!(out, "{:?} {}\r\n", resp.version(), resp.status());
    dump_headers(&mut out, resp.headers());
    out
}

fn dump_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let _ = write!(out, "{}: {}\r\n", name, value.to_str().unwrap_or("<binary>"));
    }
}

/// Sets every header in `headers` on the request, replacing existing values.
pub fn header_middleware(headers: HeaderMap) -> Middleware {
    let headers = Arc::new(headers);
    Middleware::new(move |next: Handler| {
        let headers = headers.clone();
        Handler::new(move |client, mut request| {
            for (name, value) in headers.iter() {
                request.headers_mut().insert(name.clone(), value.clone());
            }
            next.call(client, request)
        })
    })
}

/// Adds cookies to the active client's jar for the request URL, creating the
/// jar if the client has none yet.
pub fn cookie_middleware(cookies: Vec<Cookie>) -> Middleware {
    let cookies = Arc::new(cookies);
    Middleware::new(move |next: Handler| {
        let cookies = cookies.clone();
        Handler::new(move |client, request| {
            if !cookies.is_empty() {
                let jar = client.cookie_jar();
                for cookie in cookies.iter() {
                    jar.add_cookie_str(&cookie.to_string(), request.url());
                }
            }
            next.call(client, request)
        })
    })
}

/// Physical attempt count recorded on responses that went through the retry
/// middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attempts(pub usize);

/// Replays the wrapped handler according to `policy`.
///
/// Install it innermost so a retry repeats only the network attempt and not
/// the one-time work of outer middleware.
pub fn retry_middleware(policy: Arc<dyn Retry>) -> Middleware {
    Middleware::new(move |next: Handler| {
        let policy = policy.clone();
        Handler::new(move |client, request| {
            let policy = policy.clone();
            let next = next.clone();
            async move { backoff(policy.as_ref(), &next, client, request).await }
        })
    })
}

async fn backoff(
    policy: &dyn Retry,
    next: &Handler,
    client: HttpClient,
    mut request: Request,
) -> Result<reqwest::Response> {
    let ctx = request.context().clone();
    let max_retries = policy.max_retries();
    let conditions = policy.conditions();
    let (min, max) = (policy.wait_time(), policy.max_wait_time());
    let mut attempt = 0;

    loop {
        let replay = if attempt < max_retries {
            let replay = request.try_clone();
            if replay.is_none() {
                tracing::warn!(
                    method = %request.method(),
                    url = %request.url(),
                    "Request body cannot be replayed; sending without retries"
                );
            }
            replay
        } else {
            None
        };

        tracing::debug!(attempt = attempt, url = %request.url(), "Retry attempt");
        let outcome = next.call(client.clone(), request).await;

        if let Some(err) = ctx.err() {
            tracing::debug!(attempt = attempt, error = %err, "Context done; not retrying");
            return Err(err);
        }

        if !conditions.iter().any(|c| c.should_retry(&outcome)) {
            return with_attempts(outcome, attempt + 1);
        }

        if let Err(e) = &outcome {
            tracing::warn!(error = %e, attempt = attempt, "Request failed");
        }

        let Some(replay) = replay else {
            return exhausted(outcome, attempt + 1);
        };

        let wait = policy.wait_for(&outcome, min, max, attempt)?;
        tracing::info!(
            delay_ms = wait.as_millis() as u64,
            attempt = attempt,
            "Retrying request after delay"
        );
        if let Some(trace) = ctx.trace() {
            trace.retry_scheduled(attempt, wait);
        }
        // Release the failed attempt's payload before sleeping.
        drop(outcome);

        if let Err(err) = sleep_or_done(&ctx, wait).await {
            return Err(err);
        }

        request = replay;
        attempt += 1;
    }
}

async fn sleep_or_done(ctx: &crate::Context, wait: Duration) -> Result<()> {
    tokio::select! {
        biased;
        err = ctx.done() => Err(err),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}

fn with_attempts(outcome: Outcome, attempts: usize) -> Outcome {
    outcome.map(|mut resp| {
        resp.extensions_mut().insert(Attempts(attempts));
        resp
    })
}

fn exhausted(outcome: Outcome, attempts: usize) -> Outcome {
    match outcome {
        Err(e) if attempts > 1 => Err(Error::MaxRetriesExceeded {
            attempts,
            last_error: Box::new(e),
        }),
        other => with_attempts(other, attempts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::Context;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;
    use url::Url;

    type Events = Arc<Mutex<Vec<String>>>;

    fn request(ctx: Context) -> Request {
        let url = Url::parse("http://localhost/resource").unwrap();
        Request::new(reqwest::Request::new(Method::GET, url), ctx)
    }

    fn ok_response() -> reqwest::Response {
        reqwest::Response::from(http::Response::builder().status(200).body("ok").unwrap())
    }

    fn recording(name: &'static str, events: &Events) -> Middleware {
        let events = events.clone();
        Middleware::new(move |next: Handler| {
            let events = events.clone();
            Handler::new(move |client, request| {
                let next = next.clone();
                let events = events.clone();
                async move {
                    events.lock().unwrap().push(format!("{}:before", name));
                    let outcome = next.call(client, request).await;
                    events.lock().unwrap().push(format!("{}:after", name));
                    outcome
                }
            })
        })
    }

    /// Fails with a retryable error `failures` times, then succeeds.
    fn flaky_terminal(failures: usize, events: &Events, calls: &Arc<AtomicUsize>) -> Handler {
        let events = events.clone();
        let calls = calls.clone();
        Handler::new(move |_client, _request| {
            let events = events.clone();
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                events.lock().unwrap().push("T".to_string());
                if n < failures {
                    Err(Error::WorkerPanic("connection reset".into()))
                } else {
                    Ok(ok_response())
                }
            }
        })
    }

    fn fast_retry() -> Middleware {
        retry_middleware(Arc::new(
            RetryPolicy::new().with_wait_time(Duration::from_millis(1)),
        ))
    }

    #[tokio::test]
    async fn test_first_listed_is_outermost() {
        let events: Events = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = chain(&[recording("m1", &events), recording("m2", &events)])
            .wrap(flaky_terminal(0, &events, &calls));

        handler.call(HttpClient::new(), request(Context::background())).await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["m1:before", "m2:before", "T", "m2:after", "m1:after"]
        );
    }

    #[tokio::test]
    async fn test_innermost_retry_replays_only_the_terminal() {
        let events: Events = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = chain(&[recording("logger", &events), recording("auth", &events), fast_retry()])
            .wrap(flaky_terminal(2, &events, &calls));

        let resp = handler.call(HttpClient::new(), request(Context::background())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(resp.extensions().get::<Attempts>(), Some(&Attempts(3)));
        assert_eq!(
            *events.lock().unwrap(),
            vec!["logger:before", "auth:before", "T", "T", "T", "auth:after", "logger:after"]
        );
    }

    #[tokio::test]
    async fn test_outer_retry_replays_the_whole_inner_chain() {
        let events: Events = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = chain(&[fast_retry(), recording("logger", &events), recording("auth", &events)])
            .wrap(flaky_terminal(2, &events, &calls));

        handler.call(HttpClient::new(), request(Context::background())).await.unwrap();

        let once = ["logger:before", "auth:before", "T", "auth:after", "logger:after"];
        let expected: Vec<&str> = once.iter().cycle().take(once.len() * 3).copied().collect();
        assert_eq!(*events.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_attempts() {
        let events: Events = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = fast_retry().wrap(flaky_terminal(usize::MAX, &events, &calls));

        let err = handler
            .call(HttpClient::new(), request(Context::background()))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            Error::MaxRetriesExceeded { attempts, last_error } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last_error, Error::WorkerPanic(_)));
            }
            other => panic!("Expected MaxRetriesExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_untriggered_failure_is_returned_as_is() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let terminal = Handler::new(move |_client, _request| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::middleware("token is hit")) }
        });

        let err = fast_retry()
            .wrap(terminal)
            .call(HttpClient::new(), request(Context::background()))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::Middleware(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_returns_before_wait_elapses() {
        let events: Events = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let slow_retry = retry_middleware(Arc::new(
            RetryPolicy::new()
                .with_wait_time(Duration::from_secs(10))
                .with_max_wait_time(Duration::from_secs(30)),
        ));
        let handler = slow_retry.wrap(flaky_terminal(usize::MAX, &events, &calls));

        let (ctx, cancel) = Context::background().with_cancel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = handler.call(HttpClient::new(), request(ctx)).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_predicates() {
        let (ctx, cancel) = Context::background().with_cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let terminal = Handler::new(move |_client, _request| {
            counted.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
            async { Err(Error::WorkerPanic("reset".into())) }
        });

        let err = fast_retry()
            .wrap(terminal)
            .call(HttpClient::new(), request(ctx))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_header_middleware_overrides() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session", "session".parse().unwrap());
        let terminal = Handler::new(|_client, request: Request| async move {
            assert_eq!(request.headers()["x-session"], "session");
            Ok(ok_response())
        });

        let mut req = request(Context::background());
        req.headers_mut().insert("x-session", "stale".parse().unwrap());
        header_middleware(headers)
            .wrap(terminal)
            .call(HttpClient::new(), req)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cookie_middleware_creates_jar_lazily() {
        let http = HttpClient::new();
        assert!(http.existing_cookie_jar().is_none());

        let terminal = Handler::new(|_client, _request| async { Ok(ok_response()) });
        cookie_middleware(vec![Cookie::new("hello", "123")])
            .wrap(terminal)
            .call(http.clone(), request(Context::background()))
            .await
            .unwrap();

        let url = Url::parse("http://localhost/resource").unwrap();
        assert_eq!(http.cookies_for(&url).unwrap(), "hello=123");
    }

    #[test]
    fn test_dump_request_includes_body() {
        let url = Url::parse("http://localhost/login").unwrap();
        let mut inner = reqwest::Request::new(Method::POST, url);
        inner.headers_mut().insert("content-type", "application/json".parse().unwrap());
        *inner.body_mut() = Some(reqwest::Body::from(r#"{"a":1}"#));

        let dump = dump_request(&Request::new(inner, Context::background()));
        assert!(dump.starts_with("POST http://localhost/login"));
        assert!(dump.contains("content-type: application/json\r\n"));
        assert!(dump.ends_with(r#"{"a":1}"#));
    }
}
