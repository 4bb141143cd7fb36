use serde::{Deserialize, Serialize};

/// The single MCP JSON-RPC endpoint this service calls tools through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default = "d_endpoint_url")]
    pub endpoint_url: String,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            endpoint_url: d_endpoint_url(),
            timeout_secs: d_timeout_secs(),
        }
    }
}

fn d_endpoint_url() -> String {
    "http://localhost:8090/v1/mcp".into()
}
fn d_timeout_secs() -> u64 {
    30
}
