//! Shared HTTP plumbing for provider clients.
//!
//! Every outbound provider call (embeddings, generation, Pinecone) goes
//! through [`send_json`], which applies the same retry policy:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

/// Build a client with the given per-request timeout.
pub fn client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Outcome of a request that completed at the HTTP level.
pub enum Reply {
    Json(serde_json::Value),
    /// 404 with the response body; callers decide whether that is an error.
    NotFound(String),
}

/// Send a request built by `build`, retrying transient failures.
///
/// `build` is invoked once per attempt because a [`RequestBuilder`] cannot be
/// reused after sending. Successful responses with an empty body decode to
/// `Value::Null`.
pub async fn send_json<F>(label: &str, max_retries: u32, build: F) -> Result<Reply>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(label, attempt, ?delay, "retrying provider request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let bytes = response.bytes().await?;
                    if bytes.is_empty() {
                        return Ok(Reply::Json(serde_json::Value::Null));
                    }
                    return Ok(Reply::Json(serde_json::from_slice(&bytes)?));
                }

                let body_text = response.text().await.unwrap_or_default();

                if status == StatusCode::NOT_FOUND {
                    return Ok(Reply::NotFound(body_text));
                }

                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", label, status, body_text));
                    continue;
                }

                bail!("{} error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} request failed: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", label)))
}

/// Like [`send_json`], treating 404 as an error.
pub async fn send_json_ok<F>(label: &str, max_retries: u32, build: F) -> Result<serde_json::Value>
where
    F: Fn() -> RequestBuilder,
{
    match send_json(label, max_retries, build).await? {
        Reply::Json(v) => Ok(v),
        Reply::NotFound(body) => bail!("{} error 404 Not Found: {}", label, body),
    }
}

/// Read a required API key from the environment.
pub fn api_key(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{} environment variable not set", var),
    }
}
