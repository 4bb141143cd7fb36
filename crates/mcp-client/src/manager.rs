//! MCP client — orchestrates tool discovery and dispatch against a single
//! JSON-RPC endpoint.

use std::time::Duration;

use serde_json::Value;

use rae_domain::config::McpConfig;

use crate::protocol::{McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{HttpTransport, TransportError};

/// A tool invocation, bundling the tool name, its argument map, and the
/// tracking identifiers that get merged into the arguments before dispatch.
#[derive(Debug, Clone, Default)]
pub struct CallToolRequest {
    pub tool_name: String,
    pub arguments: Value,
    pub tool_call_id: Option<String>,
    pub request_id: Option<String>,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

impl CallToolRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            ..Default::default()
        }
    }
}

fn insert_if_absent(map: &mut serde_json::Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(v) = value {
        map.entry(key.to_string()).or_insert(Value::String(v));
    }
}

/// Client for a single MCP JSON-RPC-over-HTTP endpoint.
pub struct McpClient {
    transport: HttpTransport,
}

impl McpClient {
    pub fn new(config: &McpConfig) -> Self {
        Self {
            transport: HttpTransport::new(
                config.endpoint_url.clone(),
                Duration::from_secs(config.timeout_secs),
            ),
        }
    }

    /// Discover the tools exposed by the endpoint via `tools/list`.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let id = self.transport.next_id();
        let resp = self.transport.request(id, "tools/list", None).await?;

        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(McpError::Protocol(format!("tools/list failed: {err}")));
        }

        let result_value = resp.result.unwrap_or(Value::Null);
        let result: ToolsListResult = serde_json::from_value(result_value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/list result: {e}")))?;
        Ok(result.tools)
    }

    /// Invoke a tool via `tools/call`.
    ///
    /// Tracking identifiers are merged into the argument map under their
    /// snake_case keys without overwriting caller-provided values. The
    /// JSON-RPC id is the tool-call id, falling back to the tool name.
    pub async fn call_tool(&self, req: CallToolRequest) -> Result<ToolCallResult, McpError> {
        let mut arguments = match req.arguments {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        insert_if_absent(&mut arguments, "tool_call_id", req.tool_call_id.clone());
        insert_if_absent(&mut arguments, "request_id", req.request_id);
        insert_if_absent(&mut arguments, "conversation_id", req.conversation_id);
        insert_if_absent(&mut arguments, "user_id", req.user_id);

        let params = serde_json::json!({
            "name": req.tool_name,
            "arguments": Value::Object(arguments),
        });

        let rpc_id = req.tool_call_id.unwrap_or_else(|| req.tool_name.clone());

        let resp = self
            .transport
            .request(rpc_id.as_str(), "tools/call", Some(params))
            .await?;

        if resp.is_error() {
            let err = resp.error.unwrap();
            return Err(McpError::Protocol(format!("tools/call failed: {err}")));
        }

        let result_value = resp.result.unwrap_or(Value::Null);
        serde_json::from_value::<ToolCallResult>(result_value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors specific to MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),
}

impl From<McpError> for rae_domain::error::Error {
    fn from(e: McpError) -> Self {
        rae_domain::error::Error::External(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_identifiers_merge_without_overwriting_caller_values() {
        let mut map = serde_json::Map::new();
        map.insert("user_id".to_string(), Value::String("caller-supplied".into()));
        insert_if_absent(&mut map, "user_id", Some("from-tracking".into()));
        insert_if_absent(&mut map, "request_id", Some("req-1".into()));

        assert_eq!(map.get("user_id").unwrap(), "caller-supplied");
        assert_eq!(map.get("request_id").unwrap(), "req-1");
    }

    #[test]
    fn call_tool_request_defaults_have_no_tracking_identifiers() {
        let req = CallToolRequest::new("search", serde_json::json!({"query": "rust"}));
        assert!(req.tool_call_id.is_none());
        assert!(req.request_id.is_none());
        assert!(req.conversation_id.is_none());
        assert!(req.user_id.is_none());
    }
}
