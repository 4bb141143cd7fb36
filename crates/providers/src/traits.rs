use rae_domain::error::Result;
use rae_domain::stream::Usage;
use rae_domain::stream::{BoxStream, StreamEvent};
use rae_domain::tool::{Message, ToolCall, ToolChoice, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Directive controlling whether/which tool the model must call.
    pub tool_choice: Option<ToolChoice>,
    /// Sampling temperature (0.0 – 2.0). `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
}

/// A single reconstructed choice in a chat completion response.
#[derive(Debug, Clone)]
pub struct ChatChoice {
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// A provider-agnostic chat completion response. Carries one or more
/// choices per spec.md §4.1; the orchestrator always uses choice 0.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
    pub model: String,
}

impl ChatResponse {
    pub fn first_choice(&self) -> Option<&ChatChoice> {
        self.choices.first()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements: a synchronous call and a
/// streaming call against an OpenAI-compatible chat-completions
/// endpoint. spec.md §1 treats the endpoint itself as an external
/// collaborator — this trait is the contract the orchestrator programs
/// against.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    /// Fails with `External` on a non-2xx upstream response, `Timeout`
    /// when the deadline elapses, `Internal` on malformed JSON.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Send a chat completion request and return a stream of delta
    /// events. The returned stream is lazy, finite, and
    /// non-restartable; dropping it cancels the underlying transport.
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
