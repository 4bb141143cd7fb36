//! Stream observer interface: the tool orchestrator reports progress
//! through this trait rather than writing directly to an HTTP response,
//! so the same loop can back a synchronous call, an SSE stream, or a
//! test spy.

use crate::tool::{Message, ToolCall};

/// Receives orchestration progress events in source order.
///
/// Implementors see `on_delta*` in source order, then `on_tool_call`
/// before the matching `on_tool_result`, then further deltas for the
/// next round. All methods are synchronous hooks; implementations that
/// need to do async work (e.g. writing to a channel) should use a
/// non-blocking send and let the receiver do the awaiting.
pub trait Observer: Send + Sync {
    /// A text token delta for the given choice index.
    fn on_delta(&self, _choice_index: usize, _text: &str) {}

    /// A tool call has been fully parsed and is about to be dispatched.
    fn on_tool_call(&self, _call: &ToolCall) {}

    /// A tool call finished, successfully or not. `result_text` is the
    /// flattened text that will be fed back to the model.
    fn on_tool_result(&self, _call_id: &str, _result_text: &str, _is_error: bool) {}

    /// The loop produced a final, tool-free assistant message.
    fn on_final(&self, _message: &Message) {}

    /// The loop terminated with an error (including `DepthExceeded`).
    fn on_error(&self, _message: &str) {}
}

/// An observer that does nothing, for callers that only want the
/// non-streaming return value.
pub struct NullObserver;

impl Observer for NullObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        deltas: AtomicUsize,
        tool_calls: AtomicUsize,
    }

    impl Observer for CountingObserver {
        fn on_delta(&self, _choice_index: usize, _text: &str) {
            self.deltas.fetch_add(1, Ordering::SeqCst);
        }
        fn on_tool_call(&self, _call: &ToolCall) {
            self.tool_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn null_observer_accepts_all_calls_without_panicking() {
        let obs = NullObserver;
        obs.on_delta(0, "hi");
        obs.on_error("boom");
    }

    #[test]
    fn custom_observer_counts_events() {
        let obs = CountingObserver {
            deltas: AtomicUsize::new(0),
            tool_calls: AtomicUsize::new(0),
        };
        obs.on_delta(0, "a");
        obs.on_delta(0, "b");
        obs.on_tool_call(&ToolCall {
            call_id: "c1".into(),
            tool_name: "get_weather".into(),
            arguments: serde_json::json!({}),
        });
        assert_eq!(obs.deltas.load(Ordering::SeqCst), 2);
        assert_eq!(obs.tool_calls.load(Ordering::SeqCst), 1);
    }
}
