//! `rae-mcp-client` — JSON-RPC 2.0 client for the MCP tools bridge.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for communicating with the MCP endpoint.
//! - An HTTP POST transport that detects plain-JSON vs. single-frame SSE
//!   response bodies.
//! - An `McpClient` that discovers tools via `tools/list` and dispatches
//!   calls via `tools/call`, merging tracking identifiers into the
//!   argument map.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rae_mcp_client::{CallToolRequest, McpClient, McpConfig};
//!
//! let config = McpConfig::default();
//! let client = McpClient::new(&config);
//!
//! let tools = client.list_tools().await?;
//!
//! let result = client
//!     .call_tool(CallToolRequest::new("read_file", serde_json::json!({"path": "/tmp/test.txt"})))
//!     .await?;
//! ```

pub mod config;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use config::McpConfig;
pub use manager::{CallToolRequest, McpClient, McpError};
pub use protocol::McpToolDef;
