//! The status model shared by responses, plans, tasks, and steps: a
//! closed status enum with a fixed transition table, error severities,
//! and retry-delay computation with backoff and jitter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Error;

/// Lifecycle status for a response, plan, task, or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Planning,
    InProgress,
    WaitForUser,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Skipped,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Completed | Status::Failed | Status::Cancelled | Status::Expired
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            Status::Pending | Status::Planning | Status::InProgress | Status::WaitForUser
        )
    }

    /// Whether transitioning from `self` to `target` is permitted by the
    /// closed transition table. Terminal states other than `Failed` have
    /// no outgoing transitions; `Skipped` is a step-only terminal state
    /// reached directly, not via this table.
    pub fn can_transition_to(self, target: Status) -> bool {
        use Status::*;
        matches!(
            (self, target),
            (Pending, Planning)
                | (Pending, InProgress)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Planning, InProgress)
                | (Planning, Failed)
                | (Planning, Cancelled)
                | (InProgress, WaitForUser)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (WaitForUser, InProgress)
                | (WaitForUser, Expired)
                | (WaitForUser, Cancelled)
                | (Failed, InProgress)
        )
    }

    /// Validate and describe the transition, producing the closed
    /// `InvalidTransition` error `InvalidTransition` is a programmer-level
    /// assertion and must never reach a client unmapped.
    pub fn transition_to(self, target: Status) -> Result<Status, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidTransition(format!(
                "{self:?} -> {target:?} is not a permitted transition"
            )))
        }
    }
}

/// Severity of a single step/tool-call error, controlling how the
/// orchestrator and plan machine respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Retry permitted, subject to the retry policy's budget.
    Retryable,
    /// Ask the planner for an alternate step (out of core scope here).
    Fallback,
    /// Mark the step `skipped` and continue the task.
    Skippable,
    /// Transition the owning plan to `failed` even from a single step.
    Fatal,
}

/// Backoff shape for computing a retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

/// Retry policy: how many attempts, how long to wait between them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: BackoffKind,
    /// Jitter fraction in `[0, 1]`; delay is perturbed by up to this
    /// fraction of itself, uniformly, in either direction.
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// The undamped delay for attempt `n` before clamping or jitter:
    /// attempt 0 is always zero (no wait before the first try).
    fn undamped_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.backoff {
            BackoffKind::Fixed => self.initial_delay,
            BackoffKind::Linear => self.initial_delay * attempt,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_delay.saturating_mul(factor)
            }
        }
    }

    /// Compute this attempt's undamped (pre-jitter) delay, clamped to
    /// `max_delay`. Exposed so callers can verify the jitter bound
    /// `[floor, ceil]` against this exact value.
    pub fn clamped_delay(&self, attempt: u32) -> Duration {
        self.undamped_delay(attempt).min(self.max_delay)
    }

    /// Compute the actual delay to sleep for `attempt`, including
    /// jitter. `rng` supplies a uniform sample in `[-1.0, 1.0]` used to
    /// perturb the clamped delay by up to `jitter_factor` of itself.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let base = self.clamped_delay(attempt);
        if attempt == 0 || self.jitter_factor <= 0.0 {
            return base;
        }
        let base_secs = base.as_secs_f64();
        let noise = base_secs * self.jitter_factor * jitter_sample.clamp(-1.0, 1.0);
        let jittered = (base_secs + noise).max(0.0).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_transition_table_matches_spec() {
        use Status::*;
        assert!(Pending.can_transition_to(Planning));
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));

        assert!(InProgress.can_transition_to(WaitForUser));
        assert!(InProgress.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Planning));

        assert!(WaitForUser.can_transition_to(InProgress));
        assert!(WaitForUser.can_transition_to(Expired));
        assert!(!WaitForUser.can_transition_to(Completed));

        assert!(Failed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn terminal_states_other_than_failed_have_no_outgoing_transitions() {
        for target in [
            Status::Pending,
            Status::Planning,
            Status::InProgress,
            Status::WaitForUser,
            Status::Completed,
            Status::Failed,
            Status::Cancelled,
            Status::Expired,
        ] {
            assert!(!Status::Completed.can_transition_to(target));
            assert!(!Status::Cancelled.can_transition_to(target));
            assert!(!Status::Expired.can_transition_to(target));
        }
    }

    #[test]
    fn invalid_transition_is_rejected_with_invalid_transition_kind() {
        let err = Status::Completed.transition_to(Status::InProgress).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn is_terminal_and_is_active_partition_the_enum() {
        for s in [
            Status::Pending,
            Status::Planning,
            Status::InProgress,
            Status::WaitForUser,
            Status::Completed,
            Status::Failed,
            Status::Cancelled,
            Status::Expired,
        ] {
            assert_ne!(s.is_terminal(), s.is_active());
        }
        assert!(!Status::Skipped.is_terminal());
        assert!(!Status::Skipped.is_active());
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff: BackoffKind::Fixed,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.clamped_delay(0), Duration::ZERO);
        assert_eq!(policy.clamped_delay(1), Duration::from_secs(2));
        assert_eq!(policy.clamped_delay(3), Duration::from_secs(2));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff: BackoffKind::Linear,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.clamped_delay(1), Duration::from_secs(2));
        assert_eq!(policy.clamped_delay(3), Duration::from_secs(6));
    }

    #[test]
    fn exponential_backoff_doubles_and_clamps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff: BackoffKind::Exponential,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.clamped_delay(1), Duration::from_secs(1));
        assert_eq!(policy.clamped_delay(2), Duration::from_secs(2));
        assert_eq!(policy.clamped_delay(3), Duration::from_secs(4));
        assert_eq!(policy.clamped_delay(5), Duration::from_secs(10)); // would be 16, clamped
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(100),
            backoff: BackoffKind::Fixed,
            jitter_factor: 0.2,
        };
        let d = policy.clamped_delay(1).as_secs_f64();
        let floor = (d * (1.0 - policy.jitter_factor)).max(0.0);
        let ceil = (d * (1.0 + policy.jitter_factor)).min(policy.max_delay.as_secs_f64());
        for sample in [-1.0, -0.5, 0.0, 0.5, 1.0] {
            let delay = policy.delay_with_jitter(1, sample).as_secs_f64();
            assert!(delay >= floor - 1e-9 && delay <= ceil + 1e-9, "delay {delay} out of [{floor}, {ceil}]");
        }
    }

    #[test]
    fn jitter_does_not_exceed_max_delay_once_backoff_has_saturated() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(20),
            backoff: BackoffKind::Exponential,
            jitter_factor: 0.5,
        };
        // attempt 3 would be 40s undamped, clamped to the 20s cap; a
        // positive jitter sample must not push it back above the cap.
        let delay = policy.delay_with_jitter(3, 1.0);
        assert_eq!(delay, policy.max_delay);
    }

    #[test]
    fn attempt_zero_has_zero_delay_regardless_of_jitter() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(100),
            backoff: BackoffKind::Exponential,
            jitter_factor: 0.5,
        };
        assert_eq!(policy.delay_with_jitter(0, 1.0), Duration::ZERO);
    }
}
