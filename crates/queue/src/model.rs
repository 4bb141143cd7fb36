//! The Postgres-backed work queue row.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => QueueStatus::Queued,
            "processing" => QueueStatus::Processing,
            "done" => QueueStatus::Done,
            "failed" => QueueStatus::Failed,
            other => panic!("unknown queue status in database row: {other}"),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: Uuid,
    pub public_id: String,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub visible_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn status(&self) -> QueueStatus {
        QueueStatus::parse(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_status_round_trips_through_its_string_form() {
        for status in [
            QueueStatus::Queued,
            QueueStatus::Processing,
            QueueStatus::Done,
            QueueStatus::Failed,
        ] {
            assert_eq!(QueueStatus::parse(status.as_str()), status);
        }
    }
}
