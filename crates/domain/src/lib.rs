//! `rae-domain` — shared types for the Response API's plan-driven
//! tool-orchestration engine: chat message/tool shapes, stream events,
//! the closed error taxonomy, the status/transition/retry model,
//! observer hooks, public ID generation, and configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod observer;
pub mod status;
pub mod stream;
pub mod tool;
