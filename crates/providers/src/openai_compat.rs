//! The OpenAI-compatible chat-completions adapter.
//!
//! Works with any endpoint that follows the OpenAI chat completions wire
//! format (OpenAI itself, Ollama, vLLM, LM Studio, and similar). This is
//! the single upstream LLM provider this service talks to — no
//! multi-provider routing, no Azure URL variant.

use std::collections::HashMap;

use crate::traits::{ChatChoice, ChatRequest, ChatResponse, LlmProvider};
use crate::util::from_reqwest;
use rae_domain::error::{Error, Result};
use rae_domain::stream::{BoxStream, StreamEvent, Usage};
use rae_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use serde_json::Value;

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(choice) = &req.tool_choice {
            body["tool_choice"] = serde_json::to_value(choice).unwrap_or(Value::Null);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn content_to_openai(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Parts(parts) => {
            let arr: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::TextPart { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    }
                    ContentPart::ImageUrlPart { url, detail } => {
                        let mut image_url = serde_json::json!({"url": url});
                        if let Some(d) = detail {
                            image_url["detail"] = Value::String(d.clone());
                        }
                        serde_json::json!({"type": "image_url", "image_url": image_url})
                    }
                    ContentPart::ToolResultPart { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    }
                })
                .collect();
            Value::Array(arr)
        }
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    if msg.role == Role::Tool {
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content.extract_all_text(),
        });
    }

    let mut obj = serde_json::json!({
        "role": role_to_str(msg.role),
        "content": content_to_openai(&msg.content),
    });

    if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
        let tool_calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.call_id,
                    "type": "function",
                    "function": {
                        "name": tc.tool_name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        obj["tool_calls"] = Value::Array(tool_calls);
    }

    obj
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn openai_message_to_domain(message: &Value) -> Message {
    let content_text = message.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let tool_calls = parse_openai_tool_calls(message);
    Message {
        role: Role::Assistant,
        content: MessageContent::Text(content_text),
        tool_calls,
        tool_call_id: None,
    }
}

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choices_arr = body
        .get("choices")
        .and_then(|c| c.as_array())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::Internal("openai_compat: no choices in response".into()))?;

    let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
    let usage = body.get("usage").and_then(parse_openai_usage);

    let choices = choices_arr
        .iter()
        .map(|choice| {
            let message = choice
                .get("message")
                .ok_or_else(|| Error::Internal("openai_compat: no message in choice".into()))?;
            let finish_reason = choice.get("finish_reason").and_then(|v| v.as_str()).map(String::from);
            Ok(ChatChoice {
                message: openai_message_to_domain(message),
                finish_reason,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ChatResponse { choices, usage, model })
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-stream state for reassembling tool calls.
///
/// OpenAI's streaming wire format sends a tool call's `id` only on the
/// chunk that introduces it; every later chunk for the same call repeats
/// only its `index`. This tracks that `index -> id` mapping so every
/// [`StreamEvent::ToolCallDelta`] is keyed by the same `call_id` the
/// opening [`StreamEvent::ToolCallStarted`] used — the accumulator keys
/// its pending-call map by `call_id`, so a mismatched key here would
/// silently split one tool call's name and its arguments across two
/// unrelated entries.
#[derive(Debug, Default)]
struct OpenAiStreamState {
    index_to_id: HashMap<u64, String>,
}

impl OpenAiStreamState {
    /// Parse one SSE data line, handling the `[DONE]` sentinel.
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            return vec![Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            })];
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Internal(format!("malformed SSE JSON: {e}")))],
        };

        let choice = v.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage), sent after the
        // final content-bearing chunk.
        let Some(choice) = choice else {
            if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
                return vec![Ok(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: None,
                })];
            }
            return Vec::new();
        };

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            let usage = v.get("usage").and_then(parse_openai_usage);
            return vec![Ok(StreamEvent::Done {
                usage,
                finish_reason: Some(fr.to_string()),
            })];
        }

        let mut events = Vec::new();

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);

                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    self.index_to_id.insert(index, id.to_string());
                    let name = tc
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: id.to_string(),
                        tool_name: name.to_string(),
                    }));
                }

                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    let call_id = self
                        .index_to_id
                        .get(&index)
                        .cloned()
                        .unwrap_or_else(|| index.to_string());
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        call_id,
                        delta: args.to_string(),
                    }));
                }
            }
        }

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token { text: text.to_string() }));
            }
        }

        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req, false);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat chat request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::External(format!(
                "{}: HTTP {} - {}",
                self.id,
                status.as_u16(),
                resp_text
            )));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)
            .map_err(|e| Error::Internal(format!("malformed chat completion JSON: {e}")))?;
        parse_chat_response(&resp_json)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req, true);
        let provider_id = self.id.clone();

        tracing::debug!(provider = %self.id, url = %url, "openai_compat stream request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::External(format!(
                "{provider_id}: HTTP {} - {err_text}",
                status.as_u16()
            )));
        }

        let mut state = OpenAiStreamState::default();
        Ok(crate::sse::sse_response_stream(resp, move |data: &str| state.parse(data)))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rae_domain::tool::ToolCall;

    #[test]
    fn parse_chat_response_extracts_text_and_usage() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {"role": "assistant", "content": "4"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 1, "total_tokens": 11},
        });
        let resp = parse_chat_response(&body).unwrap();
        let choice = resp.first_choice().unwrap();
        assert_eq!(choice.message.content.extract_all_text(), "4");
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 11);
    }

    #[test]
    fn parse_chat_response_extracts_tool_calls() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "c1",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        });
        let resp = parse_chat_response(&body).unwrap();
        let choice = resp.first_choice().unwrap();
        assert_eq!(choice.message.tool_calls.len(), 1);
        assert_eq!(choice.message.tool_calls[0].call_id, "c1");
        assert_eq!(choice.message.tool_calls[0].tool_name, "get_weather");
    }

    #[test]
    fn parse_chat_response_missing_choices_is_internal_error() {
        let body = serde_json::json!({"model": "gpt-4o", "choices": []});
        let err = parse_chat_response(&body).unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn tool_result_message_serializes_with_tool_call_id() {
        let msg = Message::tool_result("c1", "Sunny, 21C");
        let v = msg_to_openai(&msg);
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "c1");
        assert_eq!(v["content"], "Sunny, 21C");
    }

    #[test]
    fn assistant_message_with_tool_calls_serializes_arguments_as_string() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "get_weather".into(),
                arguments: serde_json::json!({"city": "Paris"}),
            }],
        );
        let v = msg_to_openai(&msg);
        assert_eq!(v["tool_calls"][0]["function"]["name"], "get_weather");
        assert!(v["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn sse_done_sentinel_yields_done_event() {
        let mut state = OpenAiStreamState::default();
        let events = state.parse("[DONE]");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(StreamEvent::Done { .. })));
    }

    #[test]
    fn sse_text_delta_yields_token_event() {
        let data = serde_json::json!({
            "choices": [{"delta": {"content": "hel"}, "finish_reason": null}],
        })
        .to_string();
        let mut state = OpenAiStreamState::default();
        let events = state.parse(&data);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Ok(StreamEvent::Token { text }) => assert_eq!(text, "hel"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn sse_tool_call_delta_after_started_reuses_the_same_call_id() {
        let mut state = OpenAiStreamState::default();

        let started = serde_json::json!({
            "choices": [{
                "delta": {"tool_calls": [{"index": 0, "id": "call_abc", "function": {"name": "search"}}]},
                "finish_reason": null,
            }],
        })
        .to_string();
        let events = state.parse(&started);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(StreamEvent::ToolCallStarted { call_id, .. }) if call_id == "call_abc"));

        // Later chunks repeat only `index`, never `id` -- the delta must
        // still be keyed by "call_abc", not "0".
        let delta = serde_json::json!({
            "choices": [{
                "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"q\":1}"}}]},
                "finish_reason": null,
            }],
        })
        .to_string();
        let events = state.parse(&delta);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Ok(StreamEvent::ToolCallDelta { call_id, delta }) => {
                assert_eq!(call_id, "call_abc");
                assert_eq!(delta, "{\"q\":1}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn sse_tool_call_delta_before_any_started_falls_back_to_index() {
        let mut state = OpenAiStreamState::default();
        let delta = serde_json::json!({
            "choices": [{
                "delta": {"tool_calls": [{"index": 2, "function": {"arguments": "{}"}}]},
                "finish_reason": null,
            }],
        })
        .to_string();
        let events = state.parse(&delta);
        assert!(matches!(&events[0], Ok(StreamEvent::ToolCallDelta { call_id, .. }) if call_id == "2"));
    }
}
