//! JSON-over-HTTP calls with retry and backoff.
//!
//! Shared by the embedding and generation clients:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - other 4xx → fail immediately with a validation error
//! - network errors and timeouts → retry
//! - backoff: `base`, `2·base`, `4·base` … capped at `32·base`
//!
//! Exhausted retries surface as a transient-remote error.

use anyhow::Result;
use repo_chat_core::RepoChatError;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << exp)
    }
}

/// POST `body` to `url` and return the decoded JSON response.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    policy: RetryPolicy,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = String::new();

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            tracing::debug!(label, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await.map_err(|e| {
                        anyhow::anyhow!("Invalid {} response: body is not JSON: {}", label, e)
                    })?;
                    return Ok(json);
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(label, %status, attempt, "remote error, will retry");
                    last_err = format!("{} API error {}: {}", label, status, body_text);
                    continue;
                }

                // Client error (not 429): fail now
                return Err(RepoChatError::validation(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                ))
                .into());
            }
            Err(e) => {
                tracing::warn!(label, error = %e, attempt, "request failed, will retry");
                last_err = format!("{} connection error at {}: {}", label, url, e);
                continue;
            }
        }
    }

    Err(RepoChatError::transient(format!(
        "{} (after {} retries)",
        last_err, policy.max_retries
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy::new(10, 1000);
        assert_eq!(p.delay(1), Duration::from_secs(1));
        assert_eq!(p.delay(2), Duration::from_secs(2));
        assert_eq!(p.delay(3), Duration::from_secs(4));
        assert_eq!(p.delay(6), Duration::from_secs(32));
        assert_eq!(p.delay(9), Duration::from_secs(32));
    }
}
