//! HTTP POST transport for JSON-RPC 2.0 calls to a single MCP endpoint.
//!
//! The endpoint may answer with plain JSON or a minimal single-frame SSE
//! wrapper (`data: <json>\n\n`). We detect which by looking at the first
//! non-whitespace byte of the body, the same way the provider client's
//! SSE reader distinguishes event frames from plain lines.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::protocol::{JsonRpcId, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(String),
    #[error("timeout waiting for response")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Detect whether a response body is plain JSON or wrapped in a single
/// SSE `data:` frame, and return the JSON text either way.
fn unwrap_sse_or_plain(body: &str) -> Result<String, TransportError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }
    for line in trimmed.lines() {
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data:") {
            return Ok(data.trim().to_string());
        }
    }
    Err(TransportError::Malformed(
        "response is neither plain JSON nor an SSE data: frame".into(),
    ))
}

/// A JSON-RPC 2.0 transport over HTTP POST to a single endpoint.
pub struct HttpTransport {
    endpoint_url: String,
    client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(endpoint_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            client: reqwest::Client::new(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next request id. Callers that have a natural id
    /// (e.g. the tool-call id) may use that instead.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn request(
        &self,
        id: impl Into<JsonRpcId>,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let id = id.into();
        let req = JsonRpcRequest::new(id, method, params);
        tracing::debug!(%id, method, "sending MCP request");

        let fut = self
            .client
            .post(&self.endpoint_url)
            .header("Content-Type", "application/json")
            .json(&req)
            .send();

        let resp = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| TransportError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::Http(format!("HTTP {}: {body}", status.as_u16())));
        }

        let json_text = unwrap_sse_or_plain(&body)?;
        serde_json::from_str(&json_text).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// Send a fire-and-forget notification (no response expected).
    pub async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        tracing::debug!(method, "sending MCP notification");

        let fut = self
            .client
            .post(&self.endpoint_url)
            .header("Content-Type", "application/json")
            .json(&notif)
            .send();

        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_plain_json_passes_through() {
        let body = "  {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":null}";
        assert_eq!(
            unwrap_sse_or_plain(body).unwrap(),
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":null}"
        );
    }

    #[test]
    fn unwrap_sse_frame_extracts_data_line() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":null}\n\n";
        assert_eq!(
            unwrap_sse_or_plain(body).unwrap(),
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":null}"
        );
    }

    #[test]
    fn unwrap_neither_shape_is_malformed() {
        assert!(unwrap_sse_or_plain("not json, not sse").is_err());
    }

    #[test]
    fn request_ids_increase_monotonically() {
        let t = HttpTransport::new("http://localhost/mcp", Duration::from_secs(1));
        let a = t.next_id();
        let b = t.next_id();
        assert!(b > a);
    }
}
