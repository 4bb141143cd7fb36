//! MCP configuration types — re-exported from `rae-domain`.
//!
//! The canonical definition lives in `rae_domain::config` so that the
//! gateway config deserializer can include it without depending on the
//! full MCP client crate.

pub use rae_domain::config::McpConfig;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_points_at_mcp_tools_service() {
        let cfg = McpConfig::default();
        assert_eq!(cfg.endpoint_url, "http://localhost:8090/v1/mcp");
        assert_eq!(cfg.timeout_secs, 30);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: McpConfig = serde_json::from_str(r#"{"endpoint_url":"http://mcp.internal/v1/mcp"}"#).unwrap();
        assert_eq!(cfg.endpoint_url, "http://mcp.internal/v1/mcp");
        assert_eq!(cfg.timeout_secs, 30);
    }
}
