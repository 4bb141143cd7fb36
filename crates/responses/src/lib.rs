pub mod idempotency;
pub mod model;
pub mod service;
pub mod status;
pub mod webhook;

pub use idempotency::{hash_request, IdempotencyOutcome, IdempotencyStore};
pub use model::{ConversationRow, ItemRow, ResponseErrorPublic, ResponsePublic, ResponseRow, ToolExecutionRow};
pub use service::{CreateResponseRequest, ResponseService, ResponseServiceConfig};
pub use status::ResponseStatus;
pub use webhook::{WebhookDispatcher, WebhookPayload};
