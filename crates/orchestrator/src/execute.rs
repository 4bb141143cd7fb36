//! The bounded ReAct tool loop: ask the model for a message, dispatch any
//! tool calls it requests, feed results back, repeat until the model
//! answers without tool calls or depth is exhausted.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;

use rae_domain::error::Error;
use rae_domain::observer::Observer;
use rae_domain::stream::{StreamEvent, Usage};
use rae_domain::tool::{Message, MessageContent, Role, ToolCall, ToolChoice, ToolDefinition};
use rae_mcp_client::{CallToolRequest, McpClient};
use rae_providers::{ChatRequest, LlmProvider};

use crate::accumulator::Accumulator;

/// Input to one call to [`execute`].
pub struct ExecuteParams {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub model: Option<String>,
    pub max_depth: u32,
    /// Per-tool-call deadline. `None` or zero means no deadline.
    pub tool_call_timeout: Option<Duration>,
}

/// A single recorded tool invocation, in the order it was dispatched.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub order: u32,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub is_error: bool,
    pub result_text: String,
}

/// The result of draining the loop to a tool-free answer.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub final_message: Message,
    pub messages: Vec<Message>,
    pub usage: Usage,
    pub executions: Vec<ToolExecution>,
}

fn zero_usage() -> Usage {
    Usage {
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
    }
}

fn add_usage(total: &mut Usage, delta: &Usage) {
    total.prompt_tokens += delta.prompt_tokens;
    total.completion_tokens += delta.completion_tokens;
    total.total_tokens += delta.total_tokens;
}

/// Parse tool-call argument bytes per the double-encode-tolerant order:
/// (1) parse as a JSON object directly; (2) if that fails, parse as a
/// JSON string and parse the decoded string as a JSON object; (3) if
/// both fail, return the first error unchanged. An empty byte sequence
/// yields an empty object.
fn parse_tool_arguments(raw: &str) -> Result<Value, Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let first_err = match serde_json::from_str::<Value>(raw) {
        Ok(v) if v.is_object() => return Ok(v),
        Ok(_) => Error::Validation(format!("tool arguments did not decode to a JSON object: {raw}")),
        Err(e) => Error::Validation(format!("invalid tool arguments JSON: {e}")),
    };

    if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(raw) {
        if let Ok(v2) = serde_json::from_str::<Value>(&inner) {
            if v2.is_object() {
                tracing::warn!("tool call arguments were double-encoded");
                return Ok(v2);
            }
        }
    }

    Err(first_err)
}

/// Map a tool dispatch outcome to the text appended to the tool-role
/// message, and whether it counts as an error for the execution record.
fn map_tool_outcome(outcome: &Result<rae_mcp_client::protocol::ToolCallResult, rae_mcp_client::McpError>) -> (String, bool) {
    match outcome {
        Err(e) => (e.to_string(), true),
        Ok(result) if result.is_error => {
            let msg = result
                .content
                .iter()
                .find(|c| c.content_type == "text" && !c.text.is_empty())
                .map(|c| c.text.clone())
                .unwrap_or_else(|| "tool execution returned an error".to_string());
            (msg, true)
        }
        Ok(result) => {
            let joined = result
                .content
                .iter()
                .filter(|c| c.content_type == "text")
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            if joined.is_empty() {
                ("[tool execution completed]".to_string(), false)
            } else {
                (joined, false)
            }
        }
    }
}

/// Run the bounded tool loop to completion.
///
/// When `observer` is present the loop streams each turn and feeds
/// deltas to the observer and to the accumulator; otherwise it issues a
/// single non-streaming chat call per turn.
pub async fn execute(
    provider: &dyn LlmProvider,
    mcp: &McpClient,
    observer: Option<&dyn Observer>,
    params: ExecuteParams,
) -> Result<ExecuteOutcome, Error> {
    let mut messages = params.messages;
    let mut executions: Vec<ToolExecution> = Vec::new();
    let mut total_usage = zero_usage();

    for _depth in 0..params.max_depth {
        let request = ChatRequest {
            messages: messages.clone(),
            tools: params.tools.clone(),
            tool_choice: params.tool_choice.clone(),
            temperature: None,
            max_tokens: None,
            model: params.model.clone(),
        };

        let (message, finish_reason) = if let Some(observer) = observer {
            let mut stream = provider.chat_stream(request).await?;
            let mut accumulator = Accumulator::new();
            while let Some(event_result) = stream.next().await {
                let event = event_result?;
                if let StreamEvent::Token { text } = &event {
                    observer.on_delta(0, text);
                }
                if let StreamEvent::Error { message } = &event {
                    observer.on_error(message);
                    return Err(Error::External(message.clone()));
                }
                accumulator.feed(&event);
            }
            if let Some(usage) = accumulator.usage() {
                add_usage(&mut total_usage, &usage);
            }
            let choice = accumulator.finalize();
            let tool_calls = choice
                .tool_calls
                .iter()
                .map(|tc| {
                    let arguments = parse_tool_arguments(&tc.argument_bytes)
                        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
                    ToolCall {
                        call_id: tc.call_id.clone(),
                        tool_name: tc.tool_name.clone(),
                        arguments,
                    }
                })
                .collect();
            let message = Message {
                role: Role::Assistant,
                content: MessageContent::Text(choice.content),
                tool_calls,
                tool_call_id: None,
            };
            (message, choice.finish_reason)
        } else {
            let response = provider.chat(request).await?;
            let choice = response
                .first_choice()
                .ok_or_else(|| Error::Internal("chat completion returned no choices".into()))?;
            if let Some(usage) = &response.usage {
                add_usage(&mut total_usage, usage);
            }
            (choice.message.clone(), choice.finish_reason.clone())
        };
        let _ = finish_reason;

        messages.push(message.clone());

        if message.tool_calls.is_empty() {
            if let Some(observer) = observer {
                observer.on_final(&message);
            }
            return Ok(ExecuteOutcome {
                final_message: message,
                messages,
                usage: total_usage,
                executions,
            });
        }

        for tool_call in &message.tool_calls {
            if let Some(observer) = observer {
                observer.on_tool_call(tool_call);
            }

            let call_future = mcp.call_tool(CallToolRequest {
                tool_name: tool_call.tool_name.clone(),
                arguments: tool_call.arguments.clone(),
                tool_call_id: Some(tool_call.call_id.clone()),
                request_id: None,
                conversation_id: None,
                user_id: None,
            });

            let outcome = match params.tool_call_timeout {
                Some(timeout) if !timeout.is_zero() => match tokio::time::timeout(timeout, call_future).await {
                    Ok(result) => result,
                    Err(_) => Err(rae_mcp_client::McpError::Protocol(format!(
                        "tool call to {} timed out after {timeout:?}",
                        tool_call.tool_name
                    ))),
                },
                _ => call_future.await,
            };

            let (result_text, is_error) = map_tool_outcome(&outcome);

            if let Some(observer) = observer {
                observer.on_tool_result(&tool_call.call_id, &result_text, is_error);
            }

            executions.push(ToolExecution {
                order: executions.len() as u32 + 1,
                call_id: tool_call.call_id.clone(),
                tool_name: tool_call.tool_name.clone(),
                arguments: tool_call.arguments.clone(),
                is_error,
                result_text: result_text.clone(),
            });

            messages.push(Message::tool_result(&tool_call.call_id, &result_text));
        }
    }

    Err(Error::DepthExceeded(format!(
        "tool loop exceeded max depth of {}",
        params.max_depth
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tool_arguments_accepts_plain_object() {
        let v = parse_tool_arguments(r#"{"a":1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parse_tool_arguments_empty_bytes_yield_empty_object() {
        let v = parse_tool_arguments("").unwrap();
        assert_eq!(v, Value::Object(Default::default()));
    }

    #[test]
    fn parse_tool_arguments_handles_double_encoded_json() {
        let raw = serde_json::to_string(r#"{"a":1}"#).unwrap();
        let v = parse_tool_arguments(&raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn parse_tool_arguments_rejects_non_object_first_and_second_attempt() {
        let err = parse_tool_arguments("42").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn parse_tool_arguments_invalid_json_returns_first_error() {
        let err = parse_tool_arguments("{not json").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn map_tool_outcome_missing_result_is_error_with_message() {
        let outcome = Err(rae_mcp_client::McpError::Protocol("boom".into()));
        let (text, is_error) = map_tool_outcome(&outcome);
        assert!(is_error);
        assert_eq!(text, "MCP protocol error: boom");
    }

    #[test]
    fn map_tool_outcome_is_error_flag_falls_back_to_default_message() {
        let result = rae_mcp_client::protocol::ToolCallResult {
            content: vec![],
            is_error: true,
        };
        let (text, is_error) = map_tool_outcome(&Ok(result));
        assert!(is_error);
        assert_eq!(text, "tool execution returned an error");
    }

    #[test]
    fn map_tool_outcome_joins_text_parts_with_newlines() {
        let result = rae_mcp_client::protocol::ToolCallResult {
            content: vec![
                rae_mcp_client::protocol::ToolCallContent {
                    content_type: "text".into(),
                    text: "line one".into(),
                },
                rae_mcp_client::protocol::ToolCallContent {
                    content_type: "text".into(),
                    text: "line two".into(),
                },
            ],
            is_error: false,
        };
        let (text, is_error) = map_tool_outcome(&Ok(result));
        assert!(!is_error);
        assert_eq!(text, "line one\nline two");
    }

    #[test]
    fn map_tool_outcome_empty_content_yields_completed_sentinel() {
        let result = rae_mcp_client::protocol::ToolCallResult {
            content: vec![],
            is_error: false,
        };
        let (text, is_error) = map_tool_outcome(&Ok(result));
        assert!(!is_error);
        assert_eq!(text, "[tool execution completed]");
    }
}
