//! The request value handlers and middleware operate on.

use crate::Context;
use http::{Extensions, HeaderMap, Method};
use url::Url;

/// A built `reqwest::Request` paired with the call's [`Context`].
///
/// Middleware may inspect and mutate the request (headers in particular),
/// swap its context, or stash typed values in its extensions for handlers
/// further down the chain.
#[derive(Debug)]
pub struct Request {
    inner: reqwest::Request,
    ctx: Context,
    extensions: Extensions,
}

impl Request {
    pub fn new(inner: reqwest::Request, ctx: Context) -> Self {
        Self {
            inner,
            ctx,
            extensions: Extensions::new(),
        }
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    /// The buffered body, if the body is held in memory.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.inner.body()?.as_bytes()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Replaces the request's context, e.g. with a derived one.
    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn inner(&self) -> &reqwest::Request {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut reqwest::Request {
        &mut self.inner
    }

    /// Clones the request for another attempt.
    ///
    /// Returns `None` when the body is a stream (streamed uploads, multipart
    /// forms), which can only be sent once.
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            inner: self.inner.try_clone()?,
            ctx: self.ctx.clone(),
            extensions: self.extensions.clone(),
        })
    }

    pub fn into_parts(self) -> (reqwest::Request, Context) {
        (self.inner, self.ctx)
    }
}
