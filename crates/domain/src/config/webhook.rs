use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Environment variable holding the shared HMAC-SHA256 secret used
    /// to sign outbound webhook bodies.
    #[serde(default = "d_secret_env")]
    pub secret_env: String,
    /// Retry delays in seconds, one entry per retry attempt after the
    /// first. The schedule's length plus one bounds `max_attempts`.
    #[serde(default = "d_retry_delays_secs")]
    pub retry_delays_secs: Vec<u64>,
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret_env: d_secret_env(),
            retry_delays_secs: d_retry_delays_secs(),
            max_attempts: d_max_attempts(),
        }
    }
}

fn d_secret_env() -> String {
    "RAE_WEBHOOK_SECRET".into()
}
fn d_retry_delays_secs() -> Vec<u64> {
    vec![1, 5, 30, 300]
}
fn d_max_attempts() -> u32 {
    5
}
