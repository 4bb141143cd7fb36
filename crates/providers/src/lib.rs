pub mod openai_compat;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatChoice, ChatRequest, ChatResponse, LlmProvider};
pub use util::resolve_api_key;
