//! Response wrapper with buffered and streaming consumption.
//!
//! A [`Response`] owns the underlying `reqwest::Response`. Every consuming
//! method takes `self`, so a payload is read (or streamed) exactly once and
//! released when the method returns or the stream is dropped.
//!
//! The response keeps the [`Context`] of the call that produced it, and every
//! read races that context: cancelling it or passing its deadline abandons a
//! payload that is still arriving.

use crate::middleware::Attempts;
use crate::{Context, Error, Result};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use url::Url;

/// Default chunk size for [`Response::chunks`]: 1 MiB.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// A received HTTP response.
///
/// # Examples
///
/// ```no_run
/// use relay_http::{Client, Context};
/// use futures_util::StreamExt;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
/// }
///
/// # async fn example() -> Result<(), relay_http::Error> {
/// let client = Client::new(vec![]);
///
/// let user: User = client
///     .get(&Context::background(), "https://api.example.com/users/1", vec![])
///     .await?
///     .json()
///     .await?;
/// println!("User: {}", user.id);
///
/// let mut chunks = client
///     .get(&Context::background(), "https://example.com/large.bin", vec![])
///     .await?
///     .chunks();
/// while let Some(chunk) = chunks.next().await {
///     println!("read {} bytes", chunk?.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    inner: reqwest::Response,
    latency: Duration,
    ctx: Context,
}

impl Response {
    pub(crate) fn new(inner: reqwest::Response, latency: Duration, ctx: Context) -> Self {
        Self { inner, latency, ctx }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name)?.to_str().ok()
    }

    /// The final URL, after redirects.
    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }

    /// Time spent in the whole middleware chain, from the call entering the
    /// outermost middleware until the response came back out of it. User
    /// middleware, retries and backoff are all included.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// The number of physical attempts made, `1` without retries.
    pub fn attempts(&self) -> usize {
        self.inner
            .extensions()
            .get::<Attempts>()
            .map_or(1, |attempts| attempts.0)
    }

    pub fn was_retried(&self) -> bool {
        self.attempts() > 1
    }

    /// Unwraps the underlying response. Reads on it no longer observe the
    /// call's context.
    pub fn into_inner(self) -> reqwest::Response {
        self.inner
    }

    /// Reads the whole payload.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] or [`Error::DeadlineExceeded`] if the call's
    /// context ends before the payload is complete.
    pub async fn bytes(self) -> Result<Bytes> {
        guarded(&self.ctx, self.inner.bytes()).await
    }

    /// Reads the whole payload as text, decoded per the response charset.
    pub async fn text(self) -> Result<String> {
        guarded(&self.ctx, self.inner.text()).await
    }

    /// Reads the whole payload and decodes it as JSON.
    ///
    /// # Errors
    ///
    /// [`Error::DecodeFailed`] if the payload is not valid JSON for `T`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let status = self.inner.status();
        let body = self.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| decode_failed("json", status, e, &body))
    }

    /// Reads the whole payload and decodes it as XML.
    ///
    /// # Errors
    ///
    /// [`Error::DecodeFailed`] if the payload is not valid XML for `T`.
    pub async fn xml<T: DeserializeOwned>(self) -> Result<T> {
        let status = self.inner.status();
        let body = self.bytes().await?;
        quick_xml::de::from_reader(&body[..]).map_err(|e| decode_failed("xml", status, e, &body))
    }

    /// Streams the payload in [`CHUNK_SIZE`] chunks.
    pub fn chunks(self) -> BoxStream<'static, Result<Bytes>> {
        self.chunks_with_size(CHUNK_SIZE)
    }

    /// Streams the payload in chunks of `size` bytes.
    ///
    /// Every chunk is exactly `size` bytes except the last, which may be
    /// shorter. A read error, or the call's context ending, is yielded once
    /// and ends the stream.
    pub fn chunks_with_size(self, size: usize) -> BoxStream<'static, Result<Bytes>> {
        chunked(self.inner.bytes_stream(), size, self.ctx).boxed()
    }
}

async fn guarded<T, E>(ctx: &Context, read: impl Future<Output = std::result::Result<T, E>>) -> Result<T>
where
    E: Into<Error>,
{
    tokio::select! {
        biased;
        err = ctx.done() => Err(err),
        out = read => out.map_err(Into::into),
    }
}

fn decode_failed(format: &'static str, status: StatusCode, err: impl std::fmt::Display, body: &[u8]) -> Error {
    tracing::error!(
        format = format,
        error = %err,
        raw_response = %String::from_utf8_lossy(body),
        "Failed to decode response"
    );
    Error::DecodeFailed {
        format,
        status,
        message: err.to_string(),
    }
}

struct Chunker<S> {
    source: std::pin::Pin<Box<S>>,
    buf: BytesMut,
    ctx: Context,
    done: bool,
}

/// Regroups an arbitrary byte stream into fixed-size chunks, stopping when
/// `ctx` ends.
fn chunked<S, E>(source: S, size: usize, ctx: Context) -> impl Stream<Item = Result<Bytes>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    let size = size.max(1);
    let state = Chunker {
        source: Box::pin(source),
        buf: BytesMut::with_capacity(size),
        ctx,
        done: false,
    };

    stream::unfold(state, move |mut state| async move {
        if state.done {
            return None;
        }
        while state.buf.len() < size {
            let next = tokio::select! {
                biased;
                err = state.ctx.done() => Some(Err(err)),
                item = state.source.next() => item.map(|r| r.map_err(Into::into)),
            };
            match next {
                Some(Ok(bytes)) => state.buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.done = true;
                    state.buf.clear();
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    if state.buf.is_empty() {
                        return None;
                    }
                    let last = state.buf.split().freeze();
                    return Some((Ok(last), state));
                }
            }
        }
        let chunk = state.buf.split_to(size).freeze();
        Some((Ok(chunk), state))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(parts: Vec<Result<&'static str>>) -> impl Stream<Item = Result<Bytes>> + Send {
        stream::iter(
            parts
                .into_iter()
                .map(|part| part.map(|s| Bytes::from_static(s.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(parts: Vec<Result<&'static str>>, size: usize) -> Vec<Result<Bytes>> {
        chunked(source(parts), size, Context::background()).collect().await
    }

    fn response(body: &'static str) -> reqwest::Response {
        reqwest::Response::from(http::Response::builder().status(200).body(body).unwrap())
    }

    #[tokio::test]
    async fn test_chunks_are_full_size_with_short_tail() {
        let chunks = collect(vec![Ok("abc"), Ok("defg"), Ok("hij")], 4).await;
        let chunks: Vec<Bytes> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(chunks, vec![Bytes::from("abcd"), Bytes::from("efgh"), Bytes::from("ij")]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_tail() {
        let chunks = collect(vec![Ok("abcdefgh")], 4).await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.as_ref().unwrap().len() == 4));
    }

    #[tokio::test]
    async fn test_empty_payload_yields_nothing() {
        assert!(collect(vec![], 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_is_yielded_once_and_ends() {
        let chunks = collect(
            vec![Ok("abcdef"), Ok("gh"), Err(Error::WorkerPanic("reset".into())), Ok("ignored")],
            4,
        )
        .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), &Bytes::from("abcd"));
        assert!(matches!(chunks[1], Err(Error::WorkerPanic(_))));
    }

    #[tokio::test]
    async fn test_chunks_stop_when_deadline_passes_mid_body() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let stalled = source(vec![Ok("abc")]).chain(stream::pending());
        let started = std::time::Instant::now();

        let chunks: Vec<Result<Bytes>> = chunked(stalled, 4, ctx).collect().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            Err(Error::DeadlineExceeded) => {}
            other => panic!("Expected DeadlineExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_before_reading() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();

        let chunks = chunked(source(vec![Ok("abcdefgh")]), 4, ctx).collect::<Vec<_>>().await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(Error::Cancelled)));

        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = Response::new(response("body"), Duration::ZERO, ctx).text().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_json_decode_failure() {
        let err = Response::new(response("not json"), Duration::ZERO, Context::background())
            .json::<serde_json::Value>()
            .await
            .unwrap_err();

        match err {
            Error::DecodeFailed { format, status, .. } => {
                assert_eq!(format, "json");
                assert_eq!(status, StatusCode::OK);
            }
            other => panic!("Expected DecodeFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_xml_decode() {
        #[derive(serde::Deserialize)]
        struct Status {
            code: u32,
        }
        let status: Status = Response::new(response("<Status><code>7</code></Status>"), Duration::ZERO, Context::background())
            .xml()
            .await
            .unwrap();
        assert_eq!(status.code, 7);
    }

    #[test]
    fn test_attempts_default_to_one() {
        let resp = Response::new(response(""), Duration::ZERO, Context::background());
        assert_eq!(resp.attempts(), 1);
        assert!(!resp.was_retried());

        let mut inner = response("");
        inner.extensions_mut().insert(Attempts(3));
        let resp = Response::new(inner, Duration::ZERO, Context::background());
        assert_eq!(resp.attempts(), 3);
        assert!(resp.was_retried());
    }
}
