use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::{Client, Response, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::errors::ManagerError;

/// How many times a failed GET is repeated and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }

    /// Delay before retry number `retry` (0-based): doubling, capped, with
    /// up to 200ms of jitter.
    fn delay(&self, retry: usize) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32 << retry.min(16) as u32;
        let delay = self.base_backoff.saturating_mul(factor).min(self.max_backoff);
        delay + jitter()
    }
}

enum Attempt {
    Done(Response),
    Transient(ManagerError),
    Fatal(ManagerError),
}

/// GET `url`, repeating transient failures (timeouts, refused connections,
/// 408, 429 and 5xx) up to `policy.max_retries` times.
pub async fn get_with_retries(
    client: &Client,
    url: &str,
    policy: &RetryPolicy,
) -> Result<Response, ManagerError> {
    let mut retry = 0;
    loop {
        match attempt(client, url).await {
            Attempt::Done(response) => return Ok(response),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Transient(err) if retry >= policy.max_retries => {
                debug!("giving up on {url} after {} attempts", retry + 1);
                return Err(err);
            }
            Attempt::Transient(err) => {
                warn!("{err}; retrying ({}/{})", retry + 1, policy.max_retries);
                sleep(policy.delay(retry)).await;
                retry += 1;
            }
        }
    }
}

async fn attempt(client: &Client, url: &str) -> Attempt {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(err) => {
            let mapped = transport_error(url, &err);
            return if retryable_error(&err) {
                Attempt::Transient(mapped)
            } else {
                Attempt::Fatal(mapped)
            };
        }
    };

    let status = response.status();
    if status.is_success() {
        return Attempt::Done(response);
    }
    let body = response.text().await.unwrap_or_default();
    let mapped = status_error(url, status, body.trim());
    if retryable_status(status) {
        Attempt::Transient(mapped)
    } else {
        Attempt::Fatal(mapped)
    }
}

fn status_error(url: &str, status: StatusCode, body: &str) -> ManagerError {
    match status {
        StatusCode::NOT_FOUND => ManagerError::Release(format!("nothing published at {url}")),
        _ if body.is_empty() => ManagerError::Network(format!("GET {url} returned {status}")),
        _ => ManagerError::Network(format!("GET {url} returned {status}: {body}")),
    }
}

fn transport_error(url: &str, err: &reqwest::Error) -> ManagerError {
    if err.is_timeout() {
        ManagerError::Network(format!("GET {url} timed out"))
    } else if err.is_connect() {
        ManagerError::Network(format!("cannot connect to {url}: {err}"))
    } else {
        ManagerError::Network(format!("GET {url} failed: {err}"))
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn jitter() -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    Duration::from_millis(nanos % 200)
}
