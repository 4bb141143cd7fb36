//! Reconstructs a complete assistant choice from a sequence of stream
//! delta events.
//!
//! Only one choice is ever streamed in this system (providers are called
//! with an implicit completion count of one), so the accumulator tracks a
//! single choice rather than a map keyed by index.

use std::collections::HashMap;

use rae_domain::stream::{StreamEvent, Usage};

/// A tool call as reconstructed from the stream, before argument parsing.
///
/// `argument_bytes` is the raw concatenation of every delta the provider
/// sent for this call; it is never parsed until [`Accumulator::finalize`]
/// is called, matching the "never reparse mid-stream" invariant.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub argument_bytes: String,
}

/// The materialized result of draining a stream to completion.
#[derive(Debug, Clone, Default)]
pub struct AccumulatedChoice {
    pub content: String,
    pub tool_calls: Vec<AccumulatedToolCall>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    tool_name: String,
    argument_bytes: String,
}

/// Accumulates [`StreamEvent`]s into a complete [`AccumulatedChoice`].
#[derive(Debug, Default)]
pub struct Accumulator {
    content: String,
    tool_call_order: Vec<String>,
    tool_calls: HashMap<String, PendingToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    synthesized: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, call_id: &str) -> &mut PendingToolCall {
        if !self.tool_calls.contains_key(call_id) {
            self.tool_call_order.push(call_id.to_string());
            self.tool_calls.insert(call_id.to_string(), PendingToolCall::default());
        }
        self.tool_calls.get_mut(call_id).unwrap()
    }

    /// Synthesize a call id for a provider that omitted one, stable within
    /// this accumulator's insertion order: `tool_<N>`.
    fn next_synthetic_id(&mut self) -> String {
        self.synthesized += 1;
        format!("tool_{}", self.synthesized)
    }

    /// Feed one stream event into the accumulator.
    pub fn feed(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Token { text } => {
                self.content.push_str(text);
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                let call_id = if call_id.is_empty() {
                    self.next_synthetic_id()
                } else {
                    call_id.clone()
                };
                let entry = self.entry(&call_id);
                if entry.tool_name.is_empty() {
                    entry.tool_name = tool_name.clone();
                }
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                let entry = self.entry(call_id);
                entry.argument_bytes.push_str(delta);
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                let call_id = if call_id.is_empty() {
                    self.next_synthetic_id()
                } else {
                    call_id.clone()
                };
                let bytes = serde_json::to_string(arguments).unwrap_or_default();
                let entry = self.entry(&call_id);
                if entry.tool_name.is_empty() {
                    entry.tool_name = tool_name.clone();
                }
                entry.argument_bytes = bytes;
            }
            StreamEvent::Done { usage, finish_reason } => {
                self.finish_reason = finish_reason.clone();
                if usage.is_some() {
                    self.usage = usage.clone();
                }
            }
            StreamEvent::Error { .. } => {
                // Surfaced to the caller directly by the stream itself;
                // the accumulator keeps whatever it has so far.
            }
        }
    }

    /// Take the usage recorded by the `Done` event, if any.
    pub fn usage(&self) -> Option<Usage> {
        self.usage.clone()
    }

    /// Materialize the accumulated choice in insertion order.
    pub fn finalize(self) -> AccumulatedChoice {
        let tool_calls = self
            .tool_call_order
            .into_iter()
            .filter_map(|call_id| {
                self.tool_calls.get(&call_id).map(|tc| AccumulatedToolCall {
                    call_id,
                    tool_name: tc.tool_name.clone(),
                    argument_bytes: tc.argument_bytes.clone(),
                })
            })
            .collect();

        AccumulatedChoice {
            content: self.content,
            tool_calls,
            finish_reason: self.finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_plain_text() {
        let mut acc = Accumulator::new();
        acc.feed(&StreamEvent::Token { text: "hel".into() });
        acc.feed(&StreamEvent::Token { text: "lo".into() });
        let choice = acc.finalize();
        assert_eq!(choice.content, "hello");
        assert!(choice.tool_calls.is_empty());
    }

    #[test]
    fn assembles_tool_call_from_start_and_deltas() {
        let mut acc = Accumulator::new();
        acc.feed(&StreamEvent::ToolCallStarted {
            call_id: "call_1".into(),
            tool_name: "search".into(),
        });
        acc.feed(&StreamEvent::ToolCallDelta {
            call_id: "call_1".into(),
            delta: "{\"query\":".into(),
        });
        acc.feed(&StreamEvent::ToolCallDelta {
            call_id: "call_1".into(),
            delta: "\"rust\"}".into(),
        });
        let choice = acc.finalize();
        assert_eq!(choice.tool_calls.len(), 1);
        assert_eq!(choice.tool_calls[0].tool_name, "search");
        assert_eq!(choice.tool_calls[0].argument_bytes, "{\"query\":\"rust\"}");
    }

    #[test]
    fn preserves_insertion_order_across_multiple_tool_calls() {
        let mut acc = Accumulator::new();
        acc.feed(&StreamEvent::ToolCallStarted {
            call_id: "b".into(),
            tool_name: "second".into(),
        });
        acc.feed(&StreamEvent::ToolCallStarted {
            call_id: "a".into(),
            tool_name: "first".into(),
        });
        let choice = acc.finalize();
        assert_eq!(choice.tool_calls[0].call_id, "b");
        assert_eq!(choice.tool_calls[1].call_id, "a");
    }

    #[test]
    fn missing_call_id_is_synthesized_by_insertion_order() {
        let mut acc = Accumulator::new();
        acc.feed(&StreamEvent::ToolCallStarted {
            call_id: "".into(),
            tool_name: "first".into(),
        });
        acc.feed(&StreamEvent::ToolCallStarted {
            call_id: "".into(),
            tool_name: "second".into(),
        });
        let choice = acc.finalize();
        assert_eq!(choice.tool_calls[0].call_id, "tool_1");
        assert_eq!(choice.tool_calls[1].call_id, "tool_2");
    }

    #[test]
    fn finish_reason_and_usage_latch_from_done_event() {
        let mut acc = Accumulator::new();
        acc.feed(&StreamEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            finish_reason: Some("stop".into()),
        });
        assert_eq!(acc.usage().unwrap().total_tokens, 15);
        let choice = acc.finalize();
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn tool_call_finished_overrides_started_name_bytes_not_reparsed_mid_stream() {
        let mut acc = Accumulator::new();
        acc.feed(&StreamEvent::ToolCallStarted {
            call_id: "c".into(),
            tool_name: "".into(),
        });
        acc.feed(&StreamEvent::ToolCallDelta {
            call_id: "c".into(),
            delta: "{\"a\":1".into(), // deliberately incomplete JSON mid-stream
        });
        acc.feed(&StreamEvent::ToolCallFinished {
            call_id: "c".into(),
            tool_name: "calc".into(),
            arguments: serde_json::json!({"a": 1}),
        });
        let choice = acc.finalize();
        assert_eq!(choice.tool_calls[0].tool_name, "calc");
        assert_eq!(choice.tool_calls[0].argument_bytes, "{\"a\":1}");
    }
}
