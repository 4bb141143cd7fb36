//! `rae-orchestrator` — the bounded, tool-augmented chat loop.
//!
//! [`accumulator`] reconstructs a complete choice from a stream of
//! deltas; [`execute`] drives the ReAct loop (call the model, dispatch
//! any tool calls against the MCP client, feed results back) until the
//! model answers without tool calls or the configured depth is
//! exhausted.

pub mod accumulator;
pub mod execute;

pub use accumulator::{AccumulatedChoice, AccumulatedToolCall, Accumulator};
pub use execute::{execute, ExecuteOutcome, ExecuteParams, ToolExecution};
