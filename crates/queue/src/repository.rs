//! Queue table mutations: enqueue, lease acquisition, lease maintenance,
//! completion, failure with backoff, and orphan reaping.
//!
//! At-most-one delivery is `SELECT ... FOR UPDATE SKIP LOCKED` plus lease
//! expiration; at-least-once comes from the reaper reverting abandoned
//! leases back to `queued` for another worker to pick up.

use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use rae_domain::error::{Error, Result};
use rae_domain::status::{BackoffKind, RetryPolicy};

use crate::model::QueueEntry;

pub struct QueueRepository {
    pool: PgPool,
    max_attempts: u32,
    retry_policy: RetryPolicy,
}

impl QueueRepository {
    pub fn new(pool: PgPool, max_attempts: u32, task_timeout: std::time::Duration) -> Self {
        let retry_policy = RetryPolicy {
            max_retries: max_attempts,
            initial_delay: std::time::Duration::from_secs(1),
            max_delay: task_timeout,
            backoff: BackoffKind::Exponential,
            jitter_factor: 0.1,
        };
        Self {
            pool,
            max_attempts,
            retry_policy,
        }
    }

    /// `Enqueue(publicID, payload)` — insert with `status=queued`,
    /// `visible_at=now`.
    pub async fn enqueue(&self, public_id: &str, payload: Value) -> Result<QueueEntry> {
        let entry: QueueEntry = sqlx::query_as(
            "INSERT INTO queue_entries (id, public_id, payload, status, attempts, visible_at, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, 'queued', 0, now(), now(), now()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(public_id)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(entry)
    }

    /// `Dequeue(ctx, workerID)` — lock and claim the next visible row.
    /// Returns `None` when no row is ready, so the worker sleeps for the
    /// polling interval.
    pub async fn dequeue(&self, worker_id: &str, lease_duration: std::time::Duration) -> Result<Option<QueueEntry>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row: Option<QueueEntry> = sqlx::query_as(
            "SELECT * FROM queue_entries WHERE status = 'queued' AND visible_at <= now() \
             ORDER BY visible_at ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            tx.commit().await.map_err(db_err)?;
            return Ok(None);
        };

        let lease_expires_at = Utc::now() + chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::seconds(120));

        let entry: QueueEntry = sqlx::query_as(
            "UPDATE queue_entries SET status = 'processing', lease_owner = $1, \
             lease_expires_at = $2, attempts = attempts + 1, updated_at = now() \
             WHERE id = $3 RETURNING *",
        )
        .bind(worker_id)
        .bind(lease_expires_at)
        .bind(row.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(entry))
    }

    /// `Heartbeat` — extend `lease_expires_at` for a worker still
    /// processing `public_id`.
    pub async fn heartbeat(&self, public_id: &str, worker_id: &str, lease_duration: std::time::Duration) -> Result<()> {
        let lease_expires_at = Utc::now() + chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::seconds(120));

        let result = sqlx::query(
            "UPDATE queue_entries SET lease_expires_at = $1, updated_at = now() \
             WHERE public_id = $2 AND status = 'processing' AND lease_owner = $3",
        )
        .bind(lease_expires_at)
        .bind(public_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "heartbeat failed: {public_id} is no longer leased by {worker_id}"
            )));
        }
        Ok(())
    }

    /// `MarkDone(publicID)` — mark `done`.
    pub async fn mark_done(&self, public_id: &str) -> Result<()> {
        sqlx::query("UPDATE queue_entries SET status = 'done', updated_at = now() WHERE public_id = $1")
            .bind(public_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// `MarkFailed(publicID, err)` — requeue with backoff while attempts
    /// remain, otherwise terminal `failed` with `last_error` persisted
    /// for C10 webhook dispatch.
    pub async fn mark_failed(&self, public_id: &str, err: &str) -> Result<QueueEntry> {
        let entry: QueueEntry = sqlx::query_as("SELECT * FROM queue_entries WHERE public_id = $1")
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("queue entry {public_id}")))?;

        if (entry.attempts as u32) < self.max_attempts {
            let delay = self.retry_policy.clamped_delay(entry.attempts as u32);
            let visible_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());

            let entry: QueueEntry = sqlx::query_as(
                "UPDATE queue_entries SET status = 'queued', visible_at = $1, last_error = $2, \
                 updated_at = now() WHERE public_id = $3 RETURNING *",
            )
            .bind(visible_at)
            .bind(err)
            .bind(public_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(entry)
        } else {
            let entry: QueueEntry = sqlx::query_as(
                "UPDATE queue_entries SET status = 'failed', last_error = $1, updated_at = now() \
                 WHERE public_id = $2 RETURNING *",
            )
            .bind(err)
            .bind(public_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(entry)
        }
    }

    /// Reaper: revert abandoned leases (`processing` past
    /// `lease_expires_at`) back to `queued` for another worker to claim.
    pub async fn reap_expired_leases(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE queue_entries SET status = 'queued', lease_owner = NULL, \
             lease_expires_at = NULL, updated_at = now() \
             WHERE status = 'processing' AND lease_expires_at < now()",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Internal(format!("database error: {e}"))
}
