//! `/v1/responses` handlers: create, poll, cancel, and stream.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_core::Stream;
use serde::Deserialize;
use serde_json::Value;

use rae_domain::error::Error;
use rae_domain::tool::{Message, ToolChoice, ToolDefinition};
use rae_responses::{hash_request, CreateResponseRequest, ResponsePublic};

use crate::state::AppState;

fn error_response(err: Error) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.envelope())).into_response()
}

/// Accepts either a single input string (wrapped as one user message) or a
/// full message list, mirroring the Response API's `input` union shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputField {
    Text(String),
    Messages(Vec<Message>),
}

impl InputField {
    fn into_messages(self) -> Vec<Message> {
        match self {
            InputField::Text(text) => vec![Message::user(text)],
            InputField::Messages(messages) => messages,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateResponseBody {
    pub model: String,
    #[serde(default)]
    pub input: Option<InputField>,
    /// Conversation ID to append to. The Response API's richer
    /// object form (branch selection, etc.) is not exposed here.
    pub conversation: Option<String>,
    pub previous_response_id: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub background: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
    pub webhook_url: Option<String>,
}

fn default_metadata() -> Value {
    Value::Object(Default::default())
}

fn caller_identity(headers: &HeaderMap) -> String {
    headers
        .get("x-caller-identity")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

pub async fn create_response(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let parsed: CreateResponseBody = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => return error_response(Error::Validation(format!("invalid request body: {e}"))),
    };

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let request_body_hash = idempotency_key.as_ref().map(|_| hash_request(&body));

    let req = CreateResponseRequest {
        caller_identity: caller_identity(&headers),
        model: parsed.model,
        instructions: parsed.instructions,
        input: parsed.input.map(InputField::into_messages).unwrap_or_default(),
        conversation_id: parsed.conversation,
        previous_response_id: parsed.previous_response_id,
        tools: parsed.tools,
        tool_choice: parsed.tool_choice,
        stream: parsed.stream,
        background: parsed.background,
        store: parsed.store,
        metadata: parsed.metadata,
        webhook_url: parsed.webhook_url,
        idempotency_key,
        request_body_hash,
    };

    let background = req.background;
    match state.responses.create_response(req).await {
        Ok(row) => {
            let status = if background { StatusCode::ACCEPTED } else { StatusCode::OK };
            (status, Json(ResponsePublic::from(&row))).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn get_response(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.responses.get(&id).await {
        Ok(row) => Json(ResponsePublic::from(&row)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn cancel_response(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.responses.cancel(&id).await {
        Ok(row) => Json(ResponsePublic::from(&row)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /v1/responses/{id}/stream` — SSE.
///
/// The response service persists rows to Postgres rather than publishing
/// to an in-process broadcast bus, so this polls the row on a fixed tick
/// and emits one `event: status` frame per observed status change. Once
/// the response reaches a terminal state, it replays the persisted Tool
/// Execution Records as `tool_call`/`tool_result` frames (in
/// `execution_order`) and the final output as one `delta` frame, then
/// closes with `event: done`. These frames are reconstructed from
/// persisted state rather than streamed live token-by-token — true
/// per-token `delta` framing would require an event bus threaded through
/// the orchestrator's `Observer` hook directly into this connection,
/// which only the synchronous (non-background) call path could support.
pub async fn stream_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, Response> {
    let first = state.responses.get(&id).await.map_err(error_response)?;

    let stream = async_stream::stream! {
        let mut last_status = None;
        let mut row = first;
        loop {
            let status = row.status.clone();
            if last_status.as_ref() != Some(&status) {
                last_status = Some(status.clone());
                let payload = ResponsePublic::from(&row);
                if let Ok(data) = serde_json::to_string(&payload) {
                    yield Ok::<_, std::convert::Infallible>(Event::default().event("status").data(data));
                }
            }

            if row.status().is_terminal() {
                if let Ok(executions) = state.responses.list_tool_executions(&id).await {
                    for execution in executions {
                        let call_payload = serde_json::json!({
                            "call_id": execution.call_id,
                            "tool_name": execution.tool_name,
                            "arguments": execution.arguments,
                        });
                        if let Ok(data) = serde_json::to_string(&call_payload) {
                            yield Ok::<_, std::convert::Infallible>(Event::default().event("tool_call").data(data));
                        }

                        let result_payload = serde_json::json!({
                            "call_id": execution.call_id,
                            "status": execution.status,
                            "result": execution.result,
                            "error_message": execution.error_message,
                        });
                        if let Ok(data) = serde_json::to_string(&result_payload) {
                            yield Ok::<_, std::convert::Infallible>(Event::default().event("tool_result").data(data));
                        }
                    }
                }

                if let Some(output) = &row.output {
                    if let Ok(data) = serde_json::to_string(output) {
                        yield Ok::<_, std::convert::Infallible>(Event::default().event("delta").data(data));
                    }
                }

                yield Ok::<_, std::convert::Infallible>(Event::default().event("done").data("[DONE]"));
                break;
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
            match state.responses.get(&id).await {
                Ok(next) => row = next,
                Err(_) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
