//! # relay-http - A composable HTTP request pipeline
//!
//! relay-http builds requests from declarative options, passes them through an
//! ordered chain of middleware (logging, header and cookie injection, retry,
//! your own), executes them with cooperative cancellation, and hands back a
//! response you can read whole, decode, or stream in fixed-size chunks.
//!
//! ## Quick Start
//!
//! ```no_run
//! use relay_http::{options, Client, Context};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateUser {
//!     name: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), relay_http::Error> {
//!     let client = Client::new(vec![options::with_default_retry()]);
//!     let ctx = Context::background().with_timeout(Duration::from_secs(30));
//!
//!     let user: User = client
//!         .post(&ctx, "https://api.example.com/users", vec![
//!             options::with_json(&CreateUser { name: "Alice".into() }),
//!         ])
//!         .await?
//!         .json()
//!         .await?;
//!     println!("Created user {} ({})", user.id, user.name);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Options** - query strings from maps or serde records, form/JSON/XML/raw bodies, multipart file uploads
//! - **Middleware** - `Handler -> Handler` functions composed with the first listed outermost
//! - **Retry** - pluggable policies with trigger predicates and linear, exponential or `Retry-After` backoff
//! - **Cancellation** - a [`Context`] carrying a cancellation token and deadline, honored during transfers and backoff
//! - **Sessions** - an optional shared cookie jar per client
//! - **Streaming** - lazily read large payloads in fixed-size chunks
//! - **Logging** - structured `tracing` events, plus a debug mode dumping each attempt
//!
//! ## Middleware
//!
//! ```no_run
//! use relay_http::middleware::{Handler, Middleware};
//! use relay_http::{options, Client, Context, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let auth = Middleware::new(|next: Handler| {
//!     Handler::new(move |client, mut request| {
//!         let next = next.clone();
//!         async move {
//!             let token = std::env::var("API_TOKEN").map_err(Error::middleware)?;
//!             let value = format!("Bearer {}", token).parse().map_err(Error::middleware)?;
//!             request.headers_mut().insert("authorization", value);
//!             next.call(client, request).await
//!         }
//!     })
//! });
//!
//! let client = Client::new(vec![options::with_middleware(vec![auth]), options::with_debug(true)]);
//! client.get(&Context::background(), "https://api.example.com/me", vec![]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! ```no_run
//! use relay_http::{Client, Context, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let (ctx, cancel) = Context::background().with_cancel();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     cancel.cancel();
//! });
//!
//! match Client::default().get(&ctx, "https://example.com/slow", vec![]).await {
//!     Err(e) if e.is_cancellation() => eprintln!("cancelled"),
//!     other => println!("{:?}", other.map(|r| r.status())),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod context;
pub mod encode;
mod error;
pub mod execute;
pub mod middleware;
pub mod options;
pub mod rate_limit;
mod request;
mod response;
pub mod retry;
mod transport;

pub use client::{
    connect, default_client, delete, get, head, patch, post, put, request, trace, Client,
};
pub use context::{Context, Trace};
pub use error::{Error, Result};
pub use options::{Cookie, File, RequestOption};
pub use request::Request;
pub use response::{Response, CHUNK_SIZE};
pub use retry::{Backoff, Retry, RetryPolicy, RetryPredicate};
pub use tokio_util::sync::CancellationToken;
pub use transport::{HttpClient, HttpClientBuilder};
