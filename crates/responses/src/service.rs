//! High-level response intake: validates, checks idempotency, persists a
//! response row, and branches into a synchronous orchestrator run or a
//! background queue hand-off.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;

use rae_domain::error::{Error, Result};
use rae_domain::ids::ResponseId;
use rae_domain::observer::Observer;
use rae_domain::status::ErrorSeverity;
use rae_domain::tool::{Message, MessageContent, Role, ToolChoice, ToolDefinition};
use rae_mcp_client::McpClient;
use rae_orchestrator::{execute, ExecuteOutcome, ExecuteParams, ToolExecution};
use rae_plans::{PlanRepository, Task};
use rae_providers::LlmProvider;
use rae_queue::QueueRepository;

use crate::model::{ItemRow, ResponseRow, ToolExecutionRow};
use crate::status::{to_str as status_str, ResponseStatus};
use crate::webhook::{WebhookDispatcher, WebhookPayload};

/// The only agent behavior this deployment runs today; kept as a named
/// constant rather than a request field since plan.agent_type exists for
/// a future multi-agent-type deployment, not this one.
const DEFAULT_AGENT_TYPE: &str = "default";

/// `POST /v1/responses` request body (the subset relevant to the core).
#[derive(Debug, Clone)]
pub struct CreateResponseRequest {
    pub caller_identity: String,
    pub model: String,
    pub instructions: Option<String>,
    pub input: Vec<Message>,
    pub conversation_id: Option<String>,
    pub previous_response_id: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
    pub background: bool,
    pub store: bool,
    pub metadata: Value,
    pub webhook_url: Option<String>,
    pub idempotency_key: Option<String>,
    pub request_body_hash: Option<String>,
}

pub struct ResponseServiceConfig {
    pub max_input_tokens: u32,
    pub max_tool_loop_depth: u32,
    pub tool_call_timeout: Duration,
    pub auto_create_conversation: bool,
}

pub struct ResponseService {
    pool: PgPool,
    provider: Arc<dyn LlmProvider>,
    mcp: Arc<McpClient>,
    queue: Arc<QueueRepository>,
    plans: Arc<PlanRepository>,
    webhooks: Arc<WebhookDispatcher>,
    idempotency: Arc<crate::idempotency::IdempotencyStore>,
    config: ResponseServiceConfig,
}

/// Rough token estimate: this core does not embed a tokenizer, so input
/// size is bounded by a conservative chars-per-token ratio (spec.md names
/// only the cap, not a specific counting algorithm).
fn estimate_tokens(messages: &[Message]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.content.extract_all_text().len()).sum();
    (chars / 4) as u32
}

impl ResponseService {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn LlmProvider>,
        mcp: Arc<McpClient>,
        queue: Arc<QueueRepository>,
        plans: Arc<PlanRepository>,
        webhooks: Arc<WebhookDispatcher>,
        idempotency: Arc<crate::idempotency::IdempotencyStore>,
        config: ResponseServiceConfig,
    ) -> Self {
        Self {
            pool,
            provider,
            mcp,
            queue,
            plans,
            webhooks,
            idempotency,
            config,
        }
    }

    /// `CreateResponse` — validate, dedup, materialize, persist, branch.
    pub async fn create_response(&self, req: CreateResponseRequest) -> Result<ResponseRow> {
        if req.model.trim().is_empty() {
            return Err(Error::Validation("model is required".into()));
        }
        if req.input.is_empty() && req.conversation_id.is_none() {
            return Err(Error::Validation("input must be non-empty when no conversation is given".into()));
        }

        let mut messages = self.materialize_messages(&req).await?;
        if let Some(instructions) = &req.instructions {
            messages.insert(0, Message::system(instructions.clone()));
        }

        if estimate_tokens(&messages) > self.config.max_input_tokens {
            return Err(Error::Validation("input_too_large".into()));
        }

        if let (Some(key), Some(hash)) = (&req.idempotency_key, &req.request_body_hash) {
            match self.idempotency.check(&req.caller_identity, key, hash).await? {
                crate::idempotency::IdempotencyOutcome::Replay(response_id) => {
                    return self.get(&response_id).await;
                }
                crate::idempotency::IdempotencyOutcome::Fresh => {}
            }
        }

        let conversation_id = self.resolve_conversation(&req).await?;

        let id = ResponseId::new().to_string();
        let input_json = serde_json::to_value(&messages)?;
        let _row: ResponseRow = sqlx::query_as(
            "INSERT INTO responses (id, caller_identity, model, system_prompt, input, status, \
             stream, background, store, metadata, conversation_id, previous_response_id, \
             webhook_url, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now(), now()) \
             RETURNING *",
        )
        .bind(&id)
        .bind(&req.caller_identity)
        .bind(&req.model)
        .bind(&req.instructions)
        .bind(&input_json)
        .bind(status_str(ResponseStatus::Pending))
        .bind(req.stream)
        .bind(req.background)
        .bind(req.store)
        .bind(&req.metadata)
        .bind(&conversation_id)
        .bind(&req.previous_response_id)
        .bind(&req.webhook_url)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        if let (Some(key), Some(hash)) = (&req.idempotency_key, &req.request_body_hash) {
            self.idempotency.record(&req.caller_identity, key, hash, &id).await?;
        }

        let plan = self.plans.create(&id, DEFAULT_AGENT_TYPE).await?;
        self.plans.create_task(plan.id, 0, "respond").await?;

        if req.background {
            self.set_status_unchecked(&id, ResponseStatus::Queued).await?;
            self.queue.enqueue(&id, input_json).await?;
            return self.get(&id).await;
        }

        self.run_inline(&id, messages, &req, None).await
    }

    /// Tool Execution Records for a response, in emission order. Used by
    /// the gateway's streaming endpoint to reconstruct `tool_call`/
    /// `tool_result` frames once a response has finished.
    pub async fn list_tool_executions(&self, response_id: &str) -> Result<Vec<ToolExecutionRow>> {
        let rows: Vec<ToolExecutionRow> = sqlx::query_as(
            "SELECT * FROM tool_executions WHERE response_id = $1 ORDER BY execution_order ASC",
        )
        .bind(response_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows)
    }

    pub async fn get(&self, id: &str) -> Result<ResponseRow> {
        let row: ResponseRow = sqlx::query_as("SELECT * FROM responses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("response {id}")))?;
        Ok(row)
    }

    /// `POST /v1/responses/{id}/cancel` — 409 if already terminal.
    pub async fn cancel(&self, id: &str) -> Result<ResponseRow> {
        let row = self.get(id).await?;
        if row.status().is_terminal() {
            return Err(Error::Conflict(format!("response {id} is already {}", row.status)));
        }
        let row: ResponseRow = sqlx::query_as(
            "UPDATE responses SET status = $1, cancelled_at = now(), updated_at = now() \
             WHERE id = $2 RETURNING *",
        )
        .bind(status_str(ResponseStatus::Cancelled))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row)
    }

    /// Background execution entry point, invoked by the queue worker.
    /// Safe to run twice: re-reads the row and aborts if already terminal.
    pub async fn execute_background(&self, id: &str) -> Result<()> {
        let row = self.get(id).await?;
        if row.status().is_terminal() {
            tracing::info!(response_id = id, status = %row.status, "skipping already-terminal response");
            return Ok(());
        }

        let messages: Vec<Message> = serde_json::from_value(row.input.clone())?;
        let req = CreateResponseRequest {
            caller_identity: row.caller_identity.clone(),
            model: row.model.clone(),
            instructions: None,
            input: Vec::new(),
            conversation_id: row.conversation_id.clone(),
            previous_response_id: row.previous_response_id.clone(),
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            background: true,
            store: row.store,
            metadata: row.metadata.clone(),
            webhook_url: row.webhook_url.clone(),
            idempotency_key: None,
            request_body_hash: None,
        };
        self.run_inline(id, messages, &req, None).await?;
        Ok(())
    }

    async fn run_inline(
        &self,
        id: &str,
        messages: Vec<Message>,
        req: &CreateResponseRequest,
        observer: Option<&dyn Observer>,
    ) -> Result<ResponseRow> {
        self.set_status_unchecked(id, ResponseStatus::Processing).await?;

        let params = ExecuteParams {
            messages,
            tools: req.tools.clone(),
            tool_choice: req.tool_choice.clone(),
            model: Some(req.model.clone()),
            max_depth: self.config.max_tool_loop_depth,
            tool_call_timeout: Some(self.config.tool_call_timeout),
        };

        match execute(self.provider.as_ref(), &self.mcp, observer, params).await {
            Ok(outcome) => self.finalize_success(id, req, outcome).await,
            Err(e) => self.finalize_failure(id, e).await,
        }
    }

    async fn finalize_success(&self, id: &str, req: &CreateResponseRequest, outcome: ExecuteOutcome) -> Result<ResponseRow> {
        let output = serde_json::to_value(&outcome.final_message)?;
        let usage = serde_json::to_value(&outcome.usage)?;

        let row: ResponseRow = sqlx::query_as(
            "UPDATE responses SET status = $1, output = $2, usage = $3, completed_at = now(), \
             updated_at = now() WHERE id = $4 RETURNING *",
        )
        .bind(status_str(ResponseStatus::Completed))
        .bind(&output)
        .bind(&usage)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        if req.store {
            if let Some(conversation_id) = &row.conversation_id {
                self.append_conversation_items(conversation_id, id, &outcome.final_message).await?;
            }
        }

        for execution in &outcome.executions {
            if let Err(e) = self.insert_tool_execution_row(id, execution).await {
                tracing::error!(response_id = id, error = %e, "failed to persist tool execution record");
            }
        }
        self.drive_plan_on_success(id, &outcome).await;

        self.dispatch_webhook_if_configured(&row);
        Ok(row)
    }

    /// Map error kind to terminal status: `Cancelled` -> `cancelled`,
    /// everything else (`Timeout`, `DepthExceeded`, `Validation`, ...) -> `failed`.
    async fn finalize_failure(&self, id: &str, err: Error) -> Result<ResponseRow> {
        let target = match &err {
            Error::Cancelled(_) => ResponseStatus::Cancelled,
            _ => ResponseStatus::Failed,
        };
        let timestamp_column = if target == ResponseStatus::Cancelled { "cancelled_at" } else { "failed_at" };

        let query = format!(
            "UPDATE responses SET status = $1, error_kind = $2, error_message = $3, \
             {timestamp_column} = now(), updated_at = now() WHERE id = $4 RETURNING *"
        );
        let row: ResponseRow = sqlx::query_as(&query)
            .bind(status_str(target))
            .bind(err.kind())
            .bind(err.to_string())
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        self.drive_plan_on_failure(id, &err).await;

        self.dispatch_webhook_if_configured(&row);
        Ok(row)
    }

    /// Tool Execution Record persistence (spec.md §3): one row per tool
    /// call, ordered densely by `execution_order` within the response, so
    /// execution ordering survives independently of the plan/step tree.
    async fn insert_tool_execution_row(&self, response_id: &str, execution: &ToolExecution) -> Result<()> {
        let row = ToolExecutionRow {
            id: uuid::Uuid::new_v4(),
            response_id: response_id.to_string(),
            call_id: execution.call_id.clone(),
            tool_name: execution.tool_name.clone(),
            arguments: execution.arguments.clone(),
            result: Some(serde_json::json!({ "text": execution.result_text })),
            status: if execution.is_error { "failed".to_string() } else { "completed".to_string() },
            error_message: execution.is_error.then(|| execution.result_text.clone()),
            execution_order: execution.order as i32,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        sqlx::query(
            "INSERT INTO tool_executions (id, response_id, call_id, tool_name, arguments, result, \
             status, error_message, execution_order, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())",
        )
        .bind(row.id)
        .bind(&row.response_id)
        .bind(&row.call_id)
        .bind(&row.tool_name)
        .bind(&row.arguments)
        .bind(&row.result)
        .bind(&row.status)
        .bind(&row.error_message)
        .bind(row.execution_order)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Drive the plan created for this response through its one task:
    /// one step per tool execution (in emitted order), then a final step
    /// for the assistant's last message, then complete the task and plan.
    /// Plan bookkeeping is best-effort: a failure here is logged but never
    /// prevents the already-computed response from being returned.
    async fn drive_plan_on_success(&self, response_id: &str, outcome: &ExecuteOutcome) {
        let Some(plan) = self.plan_for_response(response_id).await else { return };
        let Some(task) = self.start_task(&plan).await else { return };

        for execution in &outcome.executions {
            if let Err(e) = self.record_tool_step(&task, execution).await {
                tracing::error!(response_id, error = %e, "failed to record plan step for tool execution");
            }
        }

        let final_sequence = outcome.executions.len() as i32 + 1;
        if let Err(e) = self.record_final_step(&task, final_sequence, &outcome.final_message).await {
            tracing::error!(response_id, error = %e, "failed to record plan step for final message");
        }

        match self.plans.complete_task(task.id).await {
            Ok(_) => {
                if let Err(e) = self.plans.complete_plan(plan.id, None).await {
                    tracing::warn!(response_id, plan_id = %plan.id, error = %e, "plan did not reach completed");
                }
            }
            Err(e) => {
                tracing::warn!(response_id, task_id = %task.id, error = %e, "plan task did not reach completed");
            }
        }
    }

    /// Record a single terminal `llm_call` step and fail the plan through
    /// it: this response already failed, so the step's fate mirrors that
    /// outcome rather than going through its own retry loop. A cancelled
    /// response cancels the plan instead of failing it.
    async fn drive_plan_on_failure(&self, response_id: &str, err: &Error) {
        let Some(plan) = self.plan_for_response(response_id).await else { return };

        if matches!(err, Error::Cancelled(_)) {
            if let Err(e) = self.plans.cancel(plan.id, "response cancelled").await {
                tracing::warn!(response_id, plan_id = %plan.id, error = %e, "failed to cancel plan");
            }
            return;
        }

        self.fail_plan_with_message(&plan, response_id, &err.to_string()).await;
    }

    async fn fail_plan_with_message(&self, plan: &rae_plans::Plan, response_id: &str, message: &str) {
        let Some(task) = self.start_task(plan).await else { return };
        let step = match self.plans.create_step(task.id, 0, "llm_call", 0).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(response_id, error = %e, "failed to create plan step for failed response");
                return;
            }
        };
        if let Err(e) = self.plans.start_step(step.id).await {
            tracing::error!(response_id, error = %e, "failed to start plan step for failed response");
            return;
        }
        if let Err(e) = self.plans.fail_step(step.id, message, ErrorSeverity::Fatal).await {
            tracing::error!(response_id, error = %e, "failed to fail plan step for failed response");
        }
    }

    async fn plan_for_response(&self, response_id: &str) -> Option<rae_plans::Plan> {
        match self.plans.get_by_response_id(response_id).await {
            Ok(Some(plan)) => Some(plan),
            Ok(None) => {
                tracing::warn!(response_id, "no plan found for response");
                None
            }
            Err(e) => {
                tracing::error!(response_id, error = %e, "failed to load plan for response");
                None
            }
        }
    }

    async fn start_task(&self, plan: &rae_plans::Plan) -> Option<Task> {
        match self.plans.start_next_task(plan.id).await {
            Ok(Some(task)) => Some(task),
            Ok(None) => {
                tracing::warn!(plan_id = %plan.id, "plan has no pending task to start");
                None
            }
            Err(e) => {
                tracing::error!(plan_id = %plan.id, error = %e, "failed to start plan task");
                None
            }
        }
    }

    async fn record_tool_step(&self, task: &Task, execution: &ToolExecution) -> Result<()> {
        let action = format!("tool_call:{}", execution.tool_name);
        let step = self.plans.create_step(task.id, execution.order as i32, &action, 0).await?;
        self.plans.start_step(step.id).await?;
        if execution.is_error {
            self.plans.fail_step(step.id, &execution.result_text, ErrorSeverity::Skippable).await?;
        } else {
            let output = serde_json::json!({ "result": execution.result_text });
            self.plans.complete_step(step.id, output).await?;
        }
        Ok(())
    }

    async fn record_final_step(&self, task: &Task, sequence: i32, final_message: &Message) -> Result<()> {
        let step = self.plans.create_step(task.id, sequence, "llm_call", 0).await?;
        self.plans.start_step(step.id).await?;
        let output = serde_json::to_value(final_message)?;
        self.plans.complete_step(step.id, output).await?;
        Ok(())
    }

    /// Spawns delivery rather than awaiting it: the dispatcher's own retry
    /// schedule can run for minutes, and a synchronous `POST /v1/responses`
    /// must not block on a caller's webhook endpoint being slow or down.
    fn dispatch_webhook_if_configured(&self, row: &ResponseRow) {
        let Some(url) = row.webhook_url.clone() else { return };
        let payload = WebhookPayload {
            id: row.id.clone(),
            status: row.status.clone(),
            created_at: row.created_at,
            completed_at: row.completed_at,
            error: row.error_kind.clone().map(|kind| {
                serde_json::json!({ "kind": kind, "message": row.error_message.clone().unwrap_or_default() })
            }),
        };
        let webhooks = self.webhooks.clone();
        tokio::spawn(async move {
            webhooks.dispatch(&url, &payload).await;
        });
    }

    async fn materialize_messages(&self, req: &CreateResponseRequest) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        if let Some(conversation_id) = &req.conversation_id {
            let items: Vec<ItemRow> = sqlx::query_as(
                "SELECT * FROM conversation_items WHERE conversation_id = $1 \
                 AND branch = (SELECT active_branch FROM conversations WHERE id = $1) \
                 ORDER BY sequence_number ASC",
            )
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            for item in items {
                let role = match item.role.as_str() {
                    "user" => Role::User,
                    "assistant" => Role::Assistant,
                    "tool" => Role::Tool,
                    _ => Role::System,
                };
                let content: MessageContent = serde_json::from_value(item.content)?;
                messages.push(Message {
                    role,
                    content,
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                });
            }
        }
        messages.extend(req.input.clone());
        Ok(messages)
    }

    /// Open Question: `store=true` with a missing `conversation_id`
    /// auto-creates a conversation when configured to (default true).
    async fn resolve_conversation(&self, req: &CreateResponseRequest) -> Result<Option<String>> {
        if let Some(id) = &req.conversation_id {
            return Ok(Some(id.clone()));
        }
        if req.store && self.config.auto_create_conversation {
            let conversation_id = rae_domain::ids::ConversationId::new().to_string();
            sqlx::query(
                "INSERT INTO conversations (id, owner_identity, active_branch, metadata, created_at, updated_at) \
                 VALUES ($1, $2, 'MAIN', '{}'::jsonb, now(), now())",
            )
            .bind(&conversation_id)
            .bind(&req.caller_identity)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            return Ok(Some(conversation_id));
        }
        Ok(None)
    }

    async fn append_conversation_items(&self, conversation_id: &str, response_id: &str, message: &Message) -> Result<()> {
        let next_sequence: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), -1) + 1 FROM conversation_items \
             WHERE conversation_id = $1 AND branch = (SELECT active_branch FROM conversations WHERE id = $1)",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let item_id = rae_domain::ids::ItemId::new().to_string();
        let content = serde_json::to_value(&message.content)?;
        sqlx::query(
            "INSERT INTO conversation_items (id, conversation_id, branch, sequence_number, role, \
             content, response_id, created_at) \
             VALUES ($1, $2, (SELECT active_branch FROM conversations WHERE id = $2), $3, $4, $5, $6, now())",
        )
        .bind(&item_id)
        .bind(conversation_id)
        .bind(next_sequence)
        .bind("assistant")
        .bind(&content)
        .bind(response_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_status_unchecked(&self, id: &str, status: ResponseStatus) -> Result<()> {
        sqlx::query("UPDATE responses SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status_str(status))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl rae_queue::TaskRunner for ResponseService {
    async fn run(&self, public_id: &str, _payload: Value) -> Result<()> {
        self.execute_background(public_id).await
    }

    /// The queue exhausted its retry budget for this background response
    /// (spec.md §4.8 MarkFailed's terminal branch): mark the response
    /// `failed` if it isn't already terminal, and dispatch its webhook —
    /// none was ever sent for this response, since background responses
    /// skip webhook dispatch until they reach a terminal state.
    async fn on_exhausted(&self, public_id: &str, last_error: &str) {
        let row = match self.get(public_id).await {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(public_id, error = %e, "on_exhausted: failed to load response");
                return;
            }
        };
        if row.status().is_terminal() {
            return;
        }

        let row: ResponseRow = match sqlx::query_as(
            "UPDATE responses SET status = $1, error_kind = $2, error_message = $3, \
             failed_at = now(), updated_at = now() WHERE id = $4 RETURNING *",
        )
        .bind(status_str(ResponseStatus::Failed))
        .bind("queue_exhausted")
        .bind(last_error)
        .bind(public_id)
        .fetch_one(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(public_id, error = %db_err(e), "on_exhausted: failed to mark response failed");
                return;
            }
        };

        if let Some(plan) = self.plan_for_response(public_id).await {
            self.fail_plan_with_message(&plan, public_id, last_error).await;
        }
        self.dispatch_webhook_if_configured(&row);
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Internal(format!("database error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_scales_with_content_length() {
        let short = vec![Message::user("hi")];
        let long = vec![Message::user("a".repeat(4000))];
        assert!(estimate_tokens(&long) > estimate_tokens(&short));
    }

    #[test]
    fn estimate_tokens_of_empty_messages_is_zero() {
        assert_eq!(estimate_tokens(&[]), 0);
    }

    #[test]
    fn content_extracted_from_text_message() {
        let msg = Message::user("hello");
        assert_eq!(msg.content.extract_all_text(), "hello");
    }
}
