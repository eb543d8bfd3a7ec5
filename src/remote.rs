//! Shared HTTP plumbing for the embedding and generation clients.
//!
//! One [`reqwest::Client`] is built per provider instance and reused by
//! every chunk pipeline, so the idle pool is sized to the analysis
//! concurrency and calls are not serialized at the transport layer.
//!
//! # Retry Strategy
//!
//! [`post_json`] retries only when `max_retries > 0` (the default is no
//! retry):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The client timeout bounds each attempt. Callers that put an outer bound
//! on a whole call use [`call_budget`], which leaves room for every attempt
//! and every backoff.

use std::time::Duration;

use reqwest::header::HeaderMap;

/// Build a client with a per-request timeout and an idle pool of at least
/// `pool_size` connections per host.
pub fn build_client(timeout: Duration, pool_size: usize) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(pool_size.max(1))
        .build()
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Upper bound for one logical call: `max_retries + 1` attempts of
/// `timeout` each, the backoff sleeps between them, and one second of slack.
pub fn call_budget(timeout: Duration, max_retries: u32) -> Duration {
    let backoffs: Duration = (1..=max_retries).map(backoff).sum();
    timeout * (max_retries + 1) + backoffs + Duration::from_secs(1)
}

/// POST `body` as JSON and return the parsed JSON response.
///
/// Errors are plain strings; callers wrap them in the service-specific
/// error kind.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    body: &serde_json::Value,
    max_retries: u32,
    service: &str,
) -> Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            tracing::debug!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(url)
            .headers(headers.clone())
            .json(body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("{} returned malformed JSON: {}", service, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = format!("{} API error {}: {}", service, status, body_text);

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) if e.is_timeout() => {
                last_err = Some(format!("{} request timed out: {}", service, e));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error: {}", service, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", service)))
}

/// Read a required environment variable.
pub fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{} environment variable not set", name))
}

/// Trim a trailing slash so paths can be appended with `format!`.
pub fn base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
