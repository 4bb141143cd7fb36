use serde::{Deserialize, Serialize};

/// The single upstream LLM provider this service talks to. Unlike the
/// teacher's multi-provider registry, this spec treats the LLM as one
/// external HTTP contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer service token.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_default_model")]
    pub default_model: String,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            default_model: d_default_model(),
            timeout_secs: d_timeout_secs(),
        }
    }
}

fn d_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn d_api_key_env() -> String {
    "RAE_LLM_API_KEY".into()
}
fn d_default_model() -> String {
    "default".into()
}
fn d_timeout_secs() -> u64 {
    60
}
