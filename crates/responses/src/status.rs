//! The response lifecycle, distinct from `rae_domain::status::Status`
//! (used by plan/task/step): spec.md §3 describes responses moving
//! `pending -> (queued -> processing)* -> terminal`, a different shape
//! than the plan machine's `planning`/`wait_for_user`/`skipped`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl ResponseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResponseStatus::Completed | ResponseStatus::Failed | ResponseStatus::Cancelled | ResponseStatus::Expired
        )
    }
}

pub fn to_str(status: ResponseStatus) -> &'static str {
    match status {
        ResponseStatus::Pending => "pending",
        ResponseStatus::Queued => "queued",
        ResponseStatus::Processing => "processing",
        ResponseStatus::Completed => "completed",
        ResponseStatus::Failed => "failed",
        ResponseStatus::Cancelled => "cancelled",
        ResponseStatus::Expired => "expired",
    }
}

pub fn parse(s: &str) -> ResponseStatus {
    match s {
        "pending" => ResponseStatus::Pending,
        "queued" => ResponseStatus::Queued,
        "processing" => ResponseStatus::Processing,
        "completed" => ResponseStatus::Completed,
        "failed" => ResponseStatus::Failed,
        "cancelled" => ResponseStatus::Cancelled,
        "expired" => ResponseStatus::Expired,
        other => panic!("unknown response status in database row: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [
            ResponseStatus::Pending,
            ResponseStatus::Queued,
            ResponseStatus::Processing,
            ResponseStatus::Completed,
            ResponseStatus::Failed,
            ResponseStatus::Cancelled,
            ResponseStatus::Expired,
        ] {
            assert_eq!(parse(to_str(status)), status);
        }
    }

    #[test]
    fn only_completed_failed_cancelled_expired_are_terminal() {
        assert!(!ResponseStatus::Pending.is_terminal());
        assert!(!ResponseStatus::Queued.is_terminal());
        assert!(!ResponseStatus::Processing.is_terminal());
        assert!(ResponseStatus::Completed.is_terminal());
        assert!(ResponseStatus::Failed.is_terminal());
        assert!(ResponseStatus::Cancelled.is_terminal());
        assert!(ResponseStatus::Expired.is_terminal());
    }
}
