//! Remote adapters: code-host metadata, package registries, DOI registry.
//!
//! Every adapter shares the same resource policy: a 30s per-request
//! timeout, at most 3 attempts with exponential backoff (base 1s, cap
//! 60s), and rate-limit headers steering the wait directly when present.
//! Remote failure is never fatal to a refresh: adapters return errors and
//! the pipeline records them.

pub mod github;
pub mod registry;
pub mod zenodo;

pub use github::GitHubClient;
pub use registry::{CranClient, PyPiClient};
pub use zenodo::{ZenodoClient, ZenodoRecord};

use std::time::Duration;

use reqwest::{Client, Response};
use tracing::warn;

use crate::constants::{
    REMOTE_BASE_DELAY_SECS, REMOTE_MAX_DELAY_SECS, REMOTE_MAX_RETRIES, REMOTE_TIMEOUT_SECS,
};
use crate::error::{RepoIndexError, Result};

const USER_AGENT: &str = concat!("repoindex/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client: 30s timeout, rustls, identifying user agent.
pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(REMOTE_TIMEOUT_SECS))
        .build()
        .map_err(|e| RepoIndexError::remote(format!("failed to build HTTP client: {e}")))
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = REMOTE_BASE_DELAY_SECS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(REMOTE_MAX_DELAY_SECS);
    Duration::from_secs(secs)
}

/// Wait suggested by rate-limit headers, when usable.
fn rate_limit_wait(response: &Response) -> Option<Duration> {
    if let Some(retry_after) = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        return Some(Duration::from_secs(retry_after.min(REMOTE_MAX_DELAY_SECS)));
    }

    let reset = response
        .headers()
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())?;
    let now = chrono::Utc::now().timestamp();
    let wait = reset - now;
    if wait > 0 && (wait as u64) <= REMOTE_MAX_DELAY_SECS {
        Some(Duration::from_secs(wait as u64))
    } else {
        None
    }
}

/// Issue a GET with bounded retries. Transient failures and rate-limit
/// responses back off and retry; the final response (or error) surfaces to
/// the caller once attempts are exhausted.
pub(crate) async fn get_with_retry<F>(make_request: F) -> Result<Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        match make_request().send().await {
            Ok(response) => {
                let status = response.status();
                let rate_limited = status.as_u16() == 429
                    || (status.as_u16() == 403
                        && response
                            .headers()
                            .get("x-ratelimit-remaining")
                            .and_then(|v| v.to_str().ok())
                            == Some("0"));

                if rate_limited && attempt + 1 < REMOTE_MAX_RETRIES {
                    let wait = rate_limit_wait(&response).unwrap_or_else(|| backoff_delay(attempt));
                    warn!(status = %status, wait_secs = wait.as_secs(), "rate limited, backing off");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
            Err(e) => {
                if attempt + 1 >= REMOTE_MAX_RETRIES {
                    return Err(RepoIndexError::remote(format!(
                        "request failed after {REMOTE_MAX_RETRIES} attempts: {e}"
                    )));
                }
                let wait = backoff_delay(attempt);
                warn!(error = %e, wait_secs = wait.as_secs(), "request failed, retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
