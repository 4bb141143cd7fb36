//! Idempotency-key dedup: scoped to (caller identity, key), storing the
//! first completed response's public ID and a content hash of the
//! request body. Re-requests within the TTL window with the same hash
//! return the stored response; a differing hash conflicts.

use sha2::{Digest, Sha256};
use sqlx::PgPool;

use rae_domain::error::{Error, Result};

use crate::model::IdempotencyKeyRow;

pub struct IdempotencyStore {
    pool: PgPool,
    ttl_hours: u64,
}

pub enum IdempotencyOutcome {
    /// No prior entry for this (caller, key) — the caller should proceed
    /// and record the result via [`IdempotencyStore::record`].
    Fresh,
    /// A prior entry exists with a matching request hash — the caller
    /// should return this response id without re-executing.
    Replay(String),
}

/// Hash the request body so re-requests with a different payload under
/// the same key are rejected as a conflict rather than silently replayed.
pub fn hash_request(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

impl IdempotencyStore {
    pub fn new(pool: PgPool, ttl_hours: u64) -> Self {
        Self { pool, ttl_hours }
    }

    pub async fn check(&self, caller_identity: &str, key: &str, request_hash: &str) -> Result<IdempotencyOutcome> {
        let existing: Option<IdempotencyKeyRow> = sqlx::query_as(
            "SELECT * FROM idempotency_keys WHERE caller_identity = $1 AND key = $2 \
             AND created_at > now() - ($3 || ' hours')::interval",
        )
        .bind(caller_identity)
        .bind(key)
        .bind(self.ttl_hours.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match existing {
            None => Ok(IdempotencyOutcome::Fresh),
            Some(row) if row.request_hash == request_hash => Ok(IdempotencyOutcome::Replay(row.response_id)),
            Some(_) => Err(Error::Conflict(format!(
                "idempotency key {key} was already used with a different request body"
            ))),
        }
    }

    pub async fn record(&self, caller_identity: &str, key: &str, request_hash: &str, response_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO idempotency_keys (caller_identity, key, request_hash, response_id, created_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (caller_identity, key) DO NOTHING",
        )
        .bind(caller_identity)
        .bind(key)
        .bind(request_hash)
        .bind(response_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Internal(format!("database error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_request_is_deterministic() {
        let a = hash_request(b"{\"model\":\"default\"}");
        let b = hash_request(b"{\"model\":\"default\"}");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_request_differs_for_different_bodies() {
        let a = hash_request(b"{\"model\":\"default\"}");
        let b = hash_request(b"{\"model\":\"other\"}");
        assert_ne!(a, b);
    }
}
