//! The closed error taxonomy shared by every crate in this workspace.
//!
//! Every fallible operation, from config validation to tool dispatch to
//! HTTP handlers, eventually resolves to one of these kinds. Each kind
//! carries a fixed severity and HTTP status so a handler never has to
//! guess how to report it.

use serde::Serialize;

/// A closed classification of everything that can go wrong.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("external: {0}")]
    External(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("depth exceeded: {0}")]
    DepthExceeded(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Severity drives whether a background worker retries or gives up, and
/// whether an observer logs at `warn` or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Caller's fault; retrying without changing the request is pointless.
    Permanent,
    /// Transient; a retry may succeed.
    Transient,
}

impl Error {
    /// Stable machine-readable kind name, used as the `error.type` field
    /// in the HTTP error envelope and as an observer/metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::RateLimited(_) => "rate_limited",
            Error::Timeout(_) => "timeout",
            Error::External(_) => "external",
            Error::Internal(_) => "internal",
            Error::InvalidTransition(_) => "invalid_transition",
            Error::DepthExceeded(_) => "depth_exceeded",
            Error::Cancelled(_) => "cancelled",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Error::Timeout(_) | Error::External(_) | Error::RateLimited(_) => Severity::Transient,
            _ => Severity::Permanent,
        }
    }

    /// Whether a background worker should retry the unit of work that
    /// produced this error, per its retry policy.
    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Transient
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Conflict(_) | Error::InvalidTransition(_) => 409,
            Error::DepthExceeded(_) => 422,
            Error::RateLimited(_) => 429,
            Error::Cancelled(_) => 499,
            Error::Internal(_) | Error::External(_) => 500,
            Error::Timeout(_) => 504,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                r#type: self.kind().to_string(),
                message: self.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(format!("json: {e}"))
    }
}

/// The wire shape of an error response: `{"error": {"type": ..., "message": ...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub r#type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient_and_retryable() {
        let e = Error::Timeout("provider took too long".into());
        assert_eq!(e.severity(), Severity::Transient);
        assert!(e.is_retryable());
        assert_eq!(e.http_status(), 504);
    }

    #[test]
    fn validation_is_permanent_and_not_retryable() {
        let e = Error::Validation("missing field".into());
        assert_eq!(e.severity(), Severity::Permanent);
        assert!(!e.is_retryable());
        assert_eq!(e.http_status(), 400);
    }

    #[test]
    fn envelope_matches_wire_shape() {
        let e = Error::NotFound("response resp_abc123 not found".into());
        let env = e.envelope();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["error"]["type"], "not_found");
        assert_eq!(json["error"]["message"], "not found: response resp_abc123 not found");
    }

    #[test]
    fn cancelled_maps_to_499() {
        assert_eq!(Error::Cancelled("client disconnected".into()).http_status(), 499);
    }
}
