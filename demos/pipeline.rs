//! Example walking through the request pipeline.
//!
//! This example shows how to:
//! - Build a client with template options (retry, debug logging)
//! - Add a custom middleware
//! - Send query parameters and JSON bodies
//! - Keep cookies across calls with a session client
//! - Bound a call with a deadline
//! - Stream a large response in chunks
//!
//! Run with: `cargo run --example pipeline`

use futures_util::StreamExt;
use relay_http::middleware::{Handler, Middleware};
use relay_http::retry::RetryOnServerError;
use relay_http::{options, Backoff, Client, Context, Error, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

fn timing() -> Middleware {
    Middleware::new(|next: Handler| {
        Handler::new(move |client, request| {
            let next = next.clone();
            async move {
                let started = Instant::now();
                let url = request.url().clone();
                let outcome = next.call(client, request).await;
                tracing::info!(url = %url, elapsed_ms = started.elapsed().as_millis() as u64, "call finished");
                outcome
            }
        })
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("relay_http=info,pipeline=info")
        .init();

    let policy = RetryPolicy::new()
        .with_wait_time(Duration::from_millis(200))
        .with_max_wait_time(Duration::from_secs(5))
        .with_condition(RetryOnServerError)
        .with_backoff(Backoff::Exponential { jitter: true });

    let client = Client::new(vec![
        options::with_retry(policy),
        options::with_middleware(vec![timing()]),
    ]);
    let ctx = Context::background();

    println!("=== GET with query ===");
    let posts: Vec<Post> = client
        .get(
            &ctx,
            "https://jsonplaceholder.typicode.com/posts",
            vec![options::with_param(HashMap::from([("userId", "1")]))],
        )
        .await?
        .json()
        .await?;
    println!("User 1 has {} posts", posts.len());

    println!("\n=== POST JSON with debug dump ===");
    let new_post = NewPost {
        title: "relay".to_string(),
        body: "a composable pipeline".to_string(),
        user_id: 1,
    };
    let response = client
        .post(
            &ctx,
            "https://jsonplaceholder.typicode.com/posts",
            vec![options::with_json(&new_post), options::with_debug(true)],
        )
        .await?;
    println!("Status: {} after {} attempt(s)", response.status(), response.attempts());

    println!("\n=== Session cookies ===");
    let session = Client::session(vec![]);
    session
        .get(&ctx, "https://httpbin.org/cookies/set?flavor=oatmeal", vec![])
        .await?;
    let cookies = session
        .get(&ctx, "https://httpbin.org/cookies", vec![])
        .await?
        .text()
        .await?;
    println!("Server sees: {}", cookies.trim());

    println!("\n=== Deadline ===");
    let short = ctx.with_timeout(Duration::from_millis(500));
    match client.get(&short, "https://httpbin.org/delay/3", vec![]).await {
        Err(e) if e.is_timeout() => println!("Gave up: {}", e),
        Err(e) => println!("Other error: {}", e),
        Ok(resp) => println!("Unexpectedly fast: {}", resp.status()),
    }

    println!("\n=== Streaming ===");
    let mut chunks = client
        .get(&ctx, "https://httpbin.org/bytes/102400", vec![])
        .await?
        .chunks_with_size(16 * 1024);
    let mut total = 0;
    while let Some(chunk) = chunks.next().await {
        total += chunk?.len();
    }
    println!("Streamed {} bytes", total);

    Ok(())
}
