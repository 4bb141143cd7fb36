//! Plan state machine persistence.
//!
//! All mutations run inside a short transaction with `SELECT ... FOR
//! UPDATE` locking the owning plan row, so concurrent step completions
//! against the same plan serialize through that lock.

use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use rae_domain::error::{Error, Result};
use rae_domain::status::{ErrorSeverity, Status};

use crate::model::{self, Plan, Step, Task};

pub struct PlanRepository {
    pool: PgPool,
}

impl PlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `Create(plan)` — persist a new plan in `pending` with an empty task set.
    pub async fn create(&self, response_id: &str, agent_type: &str) -> Result<Plan> {
        let plan: Plan = sqlx::query_as(
            "INSERT INTO plans (id, response_id, agent_type, status, progress, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 0.0, now(), now()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(response_id)
        .bind(agent_type)
        .bind(model::status_str(Status::Pending))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(plan)
    }

    /// Look up the plan created for a given response, if any.
    pub async fn get_by_response_id(&self, response_id: &str) -> Result<Option<Plan>> {
        let plan: Option<Plan> = sqlx::query_as("SELECT * FROM plans WHERE response_id = $1")
            .bind(response_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(plan)
    }

    /// Add a task to a plan. Tasks run in `sequence` order via
    /// `start_next_task`.
    pub async fn create_task(&self, plan_id: Uuid, sequence: i32, title: &str) -> Result<Task> {
        let task: Task = sqlx::query_as(
            "INSERT INTO tasks (id, plan_id, sequence, title, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, now(), now()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(plan_id)
        .bind(sequence)
        .bind(title)
        .bind(model::status_str(Status::Pending))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(task)
    }

    /// Add a step to a task. Steps are driven in `sequence` order by the
    /// caller via `start_step`/`complete_step`/`fail_step`.
    pub async fn create_step(
        &self,
        task_id: Uuid,
        sequence: i32,
        action: &str,
        max_retries: i32,
    ) -> Result<Step> {
        let step: Step = sqlx::query_as(
            "INSERT INTO steps (id, task_id, sequence, action, status, retry_count, max_retries, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 0, $6, now(), now()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(task_id)
        .bind(sequence)
        .bind(action)
        .bind(model::status_str(Status::Pending))
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(step)
    }

    /// `StartNextTask(planID)` — select the pending task of lowest
    /// `sequence`, transition it `pending -> in_progress`, and the plan
    /// `pending|planning -> in_progress`. Returns `Ok(None)` if no
    /// pending tasks remain.
    pub async fn start_next_task(&self, plan_id: Uuid) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1 FOR UPDATE")
            .bind(plan_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("plan {plan_id}")))?;

        let next: Option<Task> = sqlx::query_as(
            "SELECT * FROM tasks WHERE plan_id = $1 AND status = $2 \
             ORDER BY sequence ASC LIMIT 1 FOR UPDATE",
        )
        .bind(plan_id)
        .bind(model::status_str(Status::Pending))
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(task) = next else {
            tx.commit().await.map_err(db_err)?;
            return Ok(None);
        };

        Status::Pending.transition_to(Status::InProgress)?;
        let task: Task = sqlx::query_as(
            "UPDATE tasks SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(model::status_str(Status::InProgress))
        .bind(task.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let plan_status = plan.status();
        if matches!(plan_status, Status::Pending | Status::Planning) {
            plan_status.transition_to(Status::InProgress)?;
            sqlx::query("UPDATE plans SET status = $1, updated_at = now() WHERE id = $2")
                .bind(model::status_str(Status::InProgress))
                .bind(plan_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(Some(task))
    }

    /// `StartStep(stepID)` — transition a step `pending -> in_progress`.
    pub async fn start_step(&self, step_id: Uuid) -> Result<Step> {
        self.transition_step(step_id, Status::InProgress, |_| Ok(())).await
    }

    /// `CompleteStep(stepID, output)` — transition `in_progress ->
    /// completed`, store output, then touch the owning plan's progress
    /// bookkeeping.
    pub async fn complete_step(&self, step_id: Uuid, output: Value) -> Result<Step> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let step: Step = sqlx::query_as("SELECT * FROM steps WHERE id = $1 FOR UPDATE")
            .bind(step_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("step {step_id}")))?;

        step.status().transition_to(Status::Completed)?;

        let step: Step = sqlx::query_as(
            "UPDATE steps SET status = $1, output = $2, updated_at = now() \
             WHERE id = $3 RETURNING *",
        )
        .bind(model::status_str(Status::Completed))
        .bind(output)
        .bind(step_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let task: Task = sqlx::query_as("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(step.task_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        recompute_plan_progress(&mut tx, task.plan_id).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(step)
    }

    /// `FailStep(stepID, message, severity)` — record error, transition
    /// to `failed`, recompute plan progress. Fatal severity also
    /// transitions the owning plan to `failed` even from a single step.
    pub async fn fail_step(&self, step_id: Uuid, message: &str, severity: ErrorSeverity) -> Result<Step> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let step: Step = sqlx::query_as("SELECT * FROM steps WHERE id = $1 FOR UPDATE")
            .bind(step_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("step {step_id}")))?;

        step.status().transition_to(Status::Failed)?;

        let step: Step = sqlx::query_as(
            "UPDATE steps SET status = $1, error_message = $2, error_severity = $3, \
             updated_at = now() WHERE id = $4 RETURNING *",
        )
        .bind(model::status_str(Status::Failed))
        .bind(message)
        .bind(model::severity_str(severity))
        .bind(step_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let task: Task = sqlx::query_as("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(step.task_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        recompute_plan_progress(&mut tx, task.plan_id).await?;

        if severity == ErrorSeverity::Fatal {
            let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1 FOR UPDATE")
                .bind(task.plan_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;

            if plan.status().can_transition_to(Status::Failed) {
                sqlx::query("UPDATE plans SET status = $1, updated_at = now() WHERE id = $2")
                    .bind(model::status_str(Status::Failed))
                    .bind(task.plan_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(step)
    }

    /// `RetryStep(stepID)` — transition `failed -> pending`, increment
    /// `retry_count`. Permitted only when the step's last recorded error
    /// severity was `retryable` and the retry budget isn't exhausted;
    /// otherwise the step is terminal and this returns `Conflict`.
    pub async fn retry_step(&self, step_id: Uuid) -> Result<Step> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let step: Step = sqlx::query_as("SELECT * FROM steps WHERE id = $1 FOR UPDATE")
            .bind(step_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("step {step_id}")))?;

        step.status().transition_to(Status::Pending)?;

        if step.error_severity() != Some(ErrorSeverity::Retryable) {
            return Err(Error::Conflict(format!(
                "step {step_id} cannot retry: last error severity was not retryable"
            )));
        }
        if step.retry_count >= step.max_retries {
            return Err(Error::Conflict(format!(
                "step {step_id} cannot retry: retry budget ({}) exhausted",
                step.max_retries
            )));
        }

        let step: Step = sqlx::query_as(
            "UPDATE steps SET status = $1, retry_count = retry_count + 1, updated_at = now() \
             WHERE id = $2 RETURNING *",
        )
        .bind(model::status_str(Status::Pending))
        .bind(step_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(step)
    }

    /// `CompleteTask(taskID)` — permitted only when all child steps are
    /// terminal and at least one is `completed`.
    pub async fn complete_task(&self, task_id: Uuid) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let task: Task = sqlx::query_as("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        let steps: Vec<Step> = sqlx::query_as("SELECT * FROM steps WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;

        let all_terminal = steps.iter().all(|s| s.status().is_terminal() || s.status() == Status::Skipped);
        let any_completed = steps.iter().any(|s| s.status() == Status::Completed);
        if !all_terminal || !any_completed {
            return Err(Error::Conflict(format!(
                "task {task_id} cannot complete: steps must all be terminal with at least one completed"
            )));
        }

        task.status().transition_to(Status::Completed)?;

        let task: Task = sqlx::query_as(
            "UPDATE tasks SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(model::status_str(Status::Completed))
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(task)
    }

    /// `Cancel(planID, reason)` — transition the plan to `cancelled` and
    /// cascade to in-flight tasks/steps as `cancelled`.
    pub async fn cancel(&self, plan_id: Uuid, reason: &str) -> Result<Plan> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1 FOR UPDATE")
            .bind(plan_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("plan {plan_id}")))?;

        plan.status().transition_to(Status::Cancelled)?;

        tracing::info!(plan_id = %plan_id, reason, "cancelling plan");

        let plan: Plan = sqlx::query_as(
            "UPDATE plans SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(model::status_str(Status::Cancelled))
        .bind(plan_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE tasks SET status = $1, updated_at = now() \
             WHERE plan_id = $2 AND status = ANY($3)",
        )
        .bind(model::status_str(Status::Cancelled))
        .bind(plan_id)
        .bind(active_status_strings())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "UPDATE steps SET status = $1, updated_at = now() \
             WHERE task_id IN (SELECT id FROM tasks WHERE plan_id = $2) AND status = ANY($3)",
        )
        .bind(model::status_str(Status::Cancelled))
        .bind(plan_id)
        .bind(active_status_strings())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(plan)
    }

    /// Fetch a plan by id.
    pub async fn get(&self, plan_id: Uuid) -> Result<Plan> {
        let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("plan {plan_id}")))?;
        Ok(plan)
    }

    /// `CompletePlan(planID, finalArtifactID)` — permitted once every
    /// task is terminal; transitions the plan to `completed` and records
    /// the artifact produced by its final step, if any. Not one of
    /// spec's abridged op list, but the plan's `final_artifact_id`
    /// attribute needs some setter and a plan can't sit `in_progress`
    /// forever once its tasks are done.
    pub async fn complete_plan(&self, plan_id: Uuid, final_artifact_id: Option<String>) -> Result<Plan> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let plan: Plan = sqlx::query_as("SELECT * FROM plans WHERE id = $1 FOR UPDATE")
            .bind(plan_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("plan {plan_id}")))?;

        let tasks: Vec<Task> = sqlx::query_as("SELECT * FROM tasks WHERE plan_id = $1")
            .bind(plan_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?;
        if !tasks.iter().all(|t| t.status().is_terminal()) {
            return Err(Error::Conflict(format!(
                "plan {plan_id} cannot complete: not all tasks are terminal"
            )));
        }

        plan.status().transition_to(Status::Completed)?;

        let plan: Plan = sqlx::query_as(
            "UPDATE plans SET status = $1, final_artifact_id = $2, updated_at = now() \
             WHERE id = $3 RETURNING *",
        )
        .bind(model::status_str(Status::Completed))
        .bind(final_artifact_id)
        .bind(plan_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(plan)
    }

    /// `SetUserSelection(planID, value)` — store the resume payload; the
    /// plan remains `wait_for_user` until the orchestrator lifts it.
    pub async fn set_user_selection(&self, plan_id: Uuid, value: Value) -> Result<Plan> {
        let plan: Plan = sqlx::query_as(
            "UPDATE plans SET user_selection = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(value)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("plan {plan_id}")))?;
        Ok(plan)
    }

    async fn transition_step(
        &self,
        step_id: Uuid,
        target: Status,
        extra: impl FnOnce(&Step) -> Result<()>,
    ) -> Result<Step> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let step: Step = sqlx::query_as("SELECT * FROM steps WHERE id = $1 FOR UPDATE")
            .bind(step_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("step {step_id}")))?;

        step.status().transition_to(target)?;
        extra(&step)?;

        let step: Step = sqlx::query_as(
            "UPDATE steps SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(model::status_str(target))
        .bind(step_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(step)
    }
}

fn active_status_strings() -> Vec<&'static str> {
    vec!["pending", "planning", "in_progress", "wait_for_user"]
}

/// `progress = (completed + skipped steps) / total steps`, counted
/// across every task in the plan. Call within the caller's transaction
/// so it's consistent with whatever step mutation triggered it.
async fn recompute_plan_progress(tx: &mut Transaction<'_, Postgres>, plan_id: Uuid) -> Result<()> {
    let steps: Vec<Step> = sqlx::query_as(
        "SELECT s.* FROM steps s JOIN tasks t ON t.id = s.task_id WHERE t.plan_id = $1",
    )
    .bind(plan_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(db_err)?;

    let progress = if steps.is_empty() {
        0.0
    } else {
        let done = steps
            .iter()
            .filter(|s| matches!(s.status(), Status::Completed | Status::Skipped))
            .count();
        done as f64 / steps.len() as f64
    };

    sqlx::query("UPDATE plans SET progress = $1, updated_at = now() WHERE id = $2")
        .bind(progress)
        .bind(plan_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(())
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Internal(format!("database error: {e}"))
}
