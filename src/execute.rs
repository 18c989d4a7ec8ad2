//! The terminal handler: performs one physical HTTP attempt.
//!
//! Each attempt runs on its own task so that a panic inside the transport is
//! reported as [`Error::WorkerPanic`] instead of unwinding through the caller,
//! and so that a cancelled or expired [`Context`] can abandon the attempt
//! promptly. Once the context fires the task is aborted and awaited before the
//! call returns, so no attempt outlives its call.

use crate::middleware::Handler;
use crate::{Context, Error, HttpClient, Request, Result};
use http::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, PROXY_AUTHORIZATION,
    TRANSFER_ENCODING, WWW_AUTHENTICATE,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::any::Any;
use std::future::Future;
use std::time::{Duration, Instant};
use url::Url;

/// The handler at the bottom of every middleware chain.
pub fn terminal() -> Handler {
    Handler::new(execute)
}

/// Sends `request` with `client`, honoring the request's context.
///
/// Redirects are followed up to [`HttpClient::max_redirects`]. Cookies held
/// by the client's jar are attached to every hop, and `Set-Cookie` headers
/// on every hop, redirects included, are recorded against that hop's URL. A
/// client without a jar does neither.
pub async fn execute(client: HttpClient, request: Request) -> Result<reqwest::Response> {
    let (inner, ctx) = request.into_parts();
    if let Some(err) = ctx.err() {
        return Err(err);
    }

    tracing::debug!(method = %inner.method(), url = %inner.url(), "Sending HTTP request");
    if let Some(trace) = ctx.trace() {
        trace.request_start(inner.method(), inner.url());
    }

    let started = Instant::now();
    let outcome = run_isolated(&ctx, follow(client, inner)).await;

    match &outcome {
        Ok(resp) => {
            tracing::debug!(
                status = resp.status().as_u16(),
                latency_ms = started.elapsed().as_millis() as u64,
                "Received HTTP response"
            );
            if let Some(trace) = ctx.trace() {
                trace.response_received(resp.status(), started.elapsed());
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "HTTP request failed");
            if let Some(trace) = ctx.trace() {
                trace.request_failed(e, started.elapsed());
            }
        }
    }
    outcome
}

async fn follow(client: HttpClient, mut request: reqwest::Request) -> Result<reqwest::Response> {
    let mut hops = 0;
    loop {
        let url = request.url().clone();
        let method = request.method().clone();
        let headers = request.headers().clone();
        let timeout = request.timeout().copied();
        let replay = request.try_clone();

        if let Some(cookies) = client.cookies_for(&url) {
            merge_cookie_header(request.headers_mut(), cookies);
        }
        let resp = client.reqwest().execute(request).await?;
        client.store_cookies(resp.headers(), &url);

        let Some(target) = redirect_target(&resp, &url) else {
            return Ok(resp);
        };
        let limit = client.max_redirects();
        if limit == 0 {
            return Ok(resp);
        }
        if hops == limit {
            return Err(Error::TooManyRedirects { limit });
        }
        let hop = Hop {
            status: resp.status(),
            method,
            from: url,
            headers,
            timeout,
            replay,
        };
        let Some(next) = hop.next(target) else {
            tracing::debug!(status = resp.status().as_u16(), "Redirect body cannot be replayed; returning redirect");
            return Ok(resp);
        };

        tracing::debug!(
            status = resp.status().as_u16(),
            to = %next.url(),
            "Following redirect"
        );
        hops += 1;
        request = next;
    }
}

fn redirect_target(resp: &reqwest::Response, from: &Url) -> Option<Url> {
    if !matches!(
        resp.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    let location = resp.headers().get(LOCATION)?.to_str().ok()?;
    from.join(location).ok()
}

/// The request that received a redirect, as it was before jar cookies were
/// attached.
struct Hop {
    status: StatusCode,
    method: Method,
    from: Url,
    headers: HeaderMap,
    timeout: Option<Duration>,
    replay: Option<reqwest::Request>,
}

impl Hop {
    /// Builds the request for `target`. 307 and 308 resend the method and
    /// body, and yield `None` when the body cannot be replayed; the other
    /// redirects switch to `GET` without a body, except for `HEAD`.
    fn next(self, target: Url) -> Option<reqwest::Request> {
        let cross_origin = self.from.host_str() != target.host_str()
            || self.from.port_or_known_default() != target.port_or_known_default();

        let mut next = match self.status {
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
                let mut replay = self.replay?;
                *replay.url_mut() = target;
                replay
            }
            _ => {
                let method = if self.method == Method::HEAD { Method::HEAD } else { Method::GET };
                let mut headers = self.headers;
                for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_ENCODING, TRANSFER_ENCODING] {
                    headers.remove(name);
                }
                let mut request = reqwest::Request::new(method, target);
                *request.headers_mut() = headers;
                *request.timeout_mut() = self.timeout;
                request
            }
        };

        if cross_origin {
            let headers = next.headers_mut();
            for name in [AUTHORIZATION, PROXY_AUTHORIZATION, WWW_AUTHENTICATE, COOKIE] {
                headers.remove(name);
            }
        }
        Some(next)
    }
}

fn merge_cookie_header(headers: &mut http::HeaderMap, cookies: HeaderValue) {
    let merged = match headers.get(COOKIE) {
        Some(existing) => {
            let mut joined = existing.as_bytes().to_vec();
            joined.extend_from_slice(b"; ");
            joined.extend_from_slice(cookies.as_bytes());
            match HeaderValue::from_bytes(&joined) {
                Ok(value) => value,
                Err(_) => return,
            }
        }
        None => cookies,
    };
    headers.insert(COOKIE, merged);
}

/// Runs `fut` on its own task, racing it against `ctx`.
///
/// A panic in `fut` becomes an error: a panic carrying an [`Error`] payload
/// yields that error unchanged, anything else becomes
/// [`Error::WorkerPanic`]. If `ctx` fires first the task is aborted and
/// awaited, and the context's error is returned.
pub(crate) async fn run_isolated<F, T>(ctx: &Context, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut worker = tokio::spawn(fut);
    tokio::select! {
        biased;
        err = ctx.done() => {
            worker.abort();
            let _ = worker.await;
            Err(err)
        }
        joined = &mut worker => match joined {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_panic() => Err(from_panic(join_err.into_panic())),
            Err(_) => Err(Error::Cancelled),
        },
    }
}

fn from_panic(payload: Box<dyn Any + Send>) -> Error {
    let payload = match payload.downcast::<Error>() {
        Ok(err) => return *err,
        Err(other) => other,
    };
    let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %message, "HTTP worker panicked");
    Error::WorkerPanic(message)
}
