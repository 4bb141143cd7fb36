//! Plan / Task / Step row shapes.
//!
//! Plan, task, and step all move through the same closed status enum
//! (`rae_domain::status::Status`) — a plan is composed of tasks in
//! sequence order, each task of steps, and "the plan state machine" is
//! really one shared state machine applied at three levels.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use rae_domain::status::{ErrorSeverity, Status};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    /// Public id of the response this plan was created for.
    pub response_id: String,
    /// Which agent behavior drove this plan; a single fixed value today,
    /// kept as a column so a future multi-agent-type deployment doesn't
    /// need a schema change.
    pub agent_type: String,
    pub status: String,
    /// `(completed + skipped steps) / total steps` across every task,
    /// recomputed on each step's terminal transition.
    pub progress: f64,
    pub final_artifact_id: Option<String>,
    pub user_selection: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn status(&self) -> Status {
        parse_status(&self.status)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub sequence: i32,
    pub title: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn status(&self) -> Status {
        parse_status(&self.status)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Step {
    pub id: Uuid,
    pub task_id: Uuid,
    pub sequence: i32,
    /// What this step does: `llm_call`, `tool_call:<tool_name>`, etc.
    pub action: String,
    pub status: String,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    pub error_severity: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    pub fn status(&self) -> Status {
        parse_status(&self.status)
    }

    pub fn error_severity(&self) -> Option<ErrorSeverity> {
        self.error_severity.as_deref().map(parse_severity)
    }
}

pub fn status_str(status: Status) -> &'static str {
    match status {
        Status::Pending => "pending",
        Status::Planning => "planning",
        Status::InProgress => "in_progress",
        Status::WaitForUser => "wait_for_user",
        Status::Completed => "completed",
        Status::Failed => "failed",
        Status::Cancelled => "cancelled",
        Status::Expired => "expired",
        Status::Skipped => "skipped",
    }
}

pub fn parse_status(s: &str) -> Status {
    match s {
        "pending" => Status::Pending,
        "planning" => Status::Planning,
        "in_progress" => Status::InProgress,
        "wait_for_user" => Status::WaitForUser,
        "completed" => Status::Completed,
        "failed" => Status::Failed,
        "cancelled" => Status::Cancelled,
        "expired" => Status::Expired,
        "skipped" => Status::Skipped,
        other => panic!("unknown status in database row: {other}"),
    }
}

pub fn severity_str(severity: ErrorSeverity) -> &'static str {
    match severity {
        ErrorSeverity::Retryable => "retryable",
        ErrorSeverity::Fallback => "fallback",
        ErrorSeverity::Skippable => "skippable",
        ErrorSeverity::Fatal => "fatal",
    }
}

fn parse_severity(s: &str) -> ErrorSeverity {
    match s {
        "retryable" => ErrorSeverity::Retryable,
        "fallback" => ErrorSeverity::Fallback,
        "skippable" => ErrorSeverity::Skippable,
        "fatal" => ErrorSeverity::Fatal,
        other => panic!("unknown error severity in database row: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [
            Status::Pending,
            Status::Planning,
            Status::InProgress,
            Status::WaitForUser,
            Status::Completed,
            Status::Failed,
            Status::Cancelled,
            Status::Expired,
            Status::Skipped,
        ] {
            assert_eq!(parse_status(status_str(status)), status);
        }
    }

    #[test]
    fn severity_round_trips_through_its_string_form() {
        for severity in [
            ErrorSeverity::Retryable,
            ErrorSeverity::Fallback,
            ErrorSeverity::Skippable,
            ErrorSeverity::Fatal,
        ] {
            assert_eq!(parse_severity(severity_str(severity)), severity);
        }
    }
}
