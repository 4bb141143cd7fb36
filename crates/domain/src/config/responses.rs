use serde::{Deserialize, Serialize};

/// Response-service-specific policy knobs that spec.md's Open Questions
/// leave as configuration rather than fixed behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesConfig {
    /// `store=true` with no `conversation_id`: auto-create one rather
    /// than rejecting the request.
    #[serde(default = "d_auto_create_conversation")]
    pub auto_create_conversation: bool,
    #[serde(default = "d_max_input_tokens")]
    pub max_input_tokens: u32,
    #[serde(default = "d_max_depth")]
    pub max_tool_loop_depth: u32,
    #[serde(default = "d_tool_call_timeout_secs")]
    pub tool_call_timeout_secs: u64,
}

impl Default for ResponsesConfig {
    fn default() -> Self {
        Self {
            auto_create_conversation: d_auto_create_conversation(),
            max_input_tokens: d_max_input_tokens(),
            max_tool_loop_depth: d_max_depth(),
            tool_call_timeout_secs: d_tool_call_timeout_secs(),
        }
    }
}

fn d_auto_create_conversation() -> bool {
    true
}
fn d_max_input_tokens() -> u32 {
    128_000
}
fn d_max_depth() -> u32 {
    10
}
fn d_tool_call_timeout_secs() -> u64 {
    30
}
