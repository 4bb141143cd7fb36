//! Outbound webhook dispatch: HMAC-SHA256-signed POST with a fixed retry
//! schedule, fired exactly once on a response's terminal transition.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

pub struct WebhookDispatcher {
    client: reqwest::Client,
    secret: String,
    retry_delays_secs: Vec<u64>,
    max_attempts: u32,
}

impl WebhookDispatcher {
    pub fn new(secret: String, retry_delays_secs: Vec<u64>, max_attempts: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret,
            retry_delays_secs,
            max_attempts,
        }
    }

    fn sign(&self, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Deliver the payload, retrying per the configured schedule on
    /// non-2xx or transport failure. Gives up silently after the last
    /// attempt — the caller's terminal status transition already
    /// happened and does not depend on webhook success.
    pub async fn dispatch(&self, url: &str, payload: &WebhookPayload) {
        let body = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize webhook payload");
                return;
            }
        };
        let signature = self.sign(&body);

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self
                    .retry_delays_secs
                    .get((attempt - 1) as usize)
                    .copied()
                    .unwrap_or(300);
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let result = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .header("X-Webhook-Signature", &signature)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(url, attempt, "webhook delivered");
                    return;
                }
                Ok(resp) => {
                    tracing::warn!(url, attempt, status = %resp.status(), "webhook rejected");
                }
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "webhook delivery failed");
                }
            }
        }

        tracing::error!(url, attempts = self.max_attempts, "webhook delivery exhausted retries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_hex() {
        let dispatcher = WebhookDispatcher::new("secret".into(), vec![1, 5, 30, 300], 5);
        let a = dispatcher.sign(b"{\"id\":\"resp_1\"}");
        let b = dispatcher.sign(b"{\"id\":\"resp_1\"}");
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sign_differs_for_different_bodies() {
        let dispatcher = WebhookDispatcher::new("secret".into(), vec![1], 5);
        let a = dispatcher.sign(b"one");
        let b = dispatcher.sign(b"two");
        assert_ne!(a, b);
    }
}
