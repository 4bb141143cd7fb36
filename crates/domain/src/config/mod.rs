mod database;
mod idempotency;
mod llm;
mod mcp;
mod queue;
mod responses;
mod server;
mod webhook;

pub use database::*;
pub use idempotency::*;
pub use llm::*;
pub use mcp::*;
pub use queue::*;
pub use responses::*;
pub use server::*;
pub use webhook::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub responses: ResponsesConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Config {
    /// Validate the configuration and return a list of issues. An empty
    /// vec (or one containing only `Warning`s) means the config is safe
    /// to run with.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.http_port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.http_port".into(),
                message: "http_port must be greater than 0".into(),
            });
        }
        if self.server.metrics_port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.metrics_port".into(),
                message: "metrics_port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        if self.database.dsn.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "database.dsn".into(),
                message: "dsn must not be empty".into(),
            });
        }
        if self.database.max_connections == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "database.max_connections".into(),
                message: "max_connections must be greater than 0".into(),
            });
        }

        if !is_http_url(&self.llm.base_url) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.llm.base_url
                ),
            });
        }
        if self.llm.api_key_env.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.api_key_env".into(),
                message: "api_key_env must not be empty".into(),
            });
        } else if std::env::var(&self.llm.api_key_env).is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "llm.api_key_env".into(),
                message: format!(
                    "environment variable \"{}\" is not set",
                    self.llm.api_key_env
                ),
            });
        }

        if !is_http_url(&self.mcp.endpoint_url) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "mcp.endpoint_url".into(),
                message: format!(
                    "endpoint_url must start with http:// or https:// (got \"{}\")",
                    self.mcp.endpoint_url
                ),
            });
        }

        if self.queue.worker_count == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "queue.worker_count".into(),
                message: "worker_count must be greater than 0".into(),
            });
        }
        if self.queue.max_attempts == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "queue.max_attempts".into(),
                message: "max_attempts must be greater than 0".into(),
            });
        }

        if self.webhook.max_attempts as usize != self.webhook.retry_delays_secs.len() + 1 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "webhook.max_attempts".into(),
                message: format!(
                    "max_attempts ({}) does not match retry_delays_secs length + 1 ({})",
                    self.webhook.max_attempts,
                    self.webhook.retry_delays_secs.len() + 1
                ),
            });
        }
        let mut seen_delays: HashSet<u64> = HashSet::new();
        for (i, d) in self.webhook.retry_delays_secs.iter().enumerate() {
            if !seen_delays.insert(*d) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("webhook.retry_delays_secs[{i}]"),
                    message: format!("duplicate retry delay {d}s"),
                });
            }
        }

        if self.idempotency.ttl_hours == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "idempotency.ttl_hours".into(),
                message: "ttl_hours must be greater than 0".into(),
            });
        }

        if self.responses.max_tool_loop_depth == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "responses.max_tool_loop_depth".into(),
                message: "max_tool_loop_depth must be greater than 0".into(),
            });
        }

        issues
    }

    pub fn has_errors(&self, issues: &[ConfigIssue]) -> bool {
        let _ = self;
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(issues: &'a [ConfigIssue], field: &str) -> Option<&'a ConfigIssue> {
        issues.iter().find(|i| i.field == field)
    }

    #[test]
    fn default_config_has_no_errors() {
        let cfg = Config::default();
        let issues = cfg.validate();
        assert!(!cfg.has_errors(&issues), "unexpected errors: {issues:?}");
    }

    #[test]
    fn zero_http_port_is_error() {
        let mut cfg = Config::default();
        cfg.server.http_port = 0;
        let issues = cfg.validate();
        assert_eq!(find(&issues, "server.http_port").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn empty_host_is_error() {
        let mut cfg = Config::default();
        cfg.server.host = String::new();
        let issues = cfg.validate();
        assert_eq!(find(&issues, "server.host").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn wildcard_cors_is_warning_not_error() {
        let mut cfg = Config::default();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = find(&issues, "server.cors.allowed_origins").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
        assert!(!cfg.has_errors(&issues));
    }

    #[test]
    fn rate_limit_zero_values_are_errors() {
        let mut cfg = Config::default();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 0,
            burst_size: 0,
        });
        let issues = cfg.validate();
        assert_eq!(find(&issues, "server.rate_limit.requests_per_second").unwrap().severity, ConfigSeverity::Error);
        assert_eq!(find(&issues, "server.rate_limit.burst_size").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn llm_base_url_must_have_scheme() {
        let mut cfg = Config::default();
        cfg.llm.base_url = "localhost:11434".into();
        let issues = cfg.validate();
        assert_eq!(find(&issues, "llm.base_url").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn mcp_endpoint_url_must_have_scheme() {
        let mut cfg = Config::default();
        cfg.mcp.endpoint_url = "ftp://nope".into();
        let issues = cfg.validate();
        assert_eq!(find(&issues, "mcp.endpoint_url").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn queue_worker_count_zero_is_error() {
        let mut cfg = Config::default();
        cfg.queue.worker_count = 0;
        let issues = cfg.validate();
        assert_eq!(find(&issues, "queue.worker_count").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn webhook_max_attempts_mismatch_is_warning() {
        let mut cfg = Config::default();
        cfg.webhook.max_attempts = 2;
        let issues = cfg.validate();
        assert_eq!(find(&issues, "webhook.max_attempts").unwrap().severity, ConfigSeverity::Warning);
    }

    #[test]
    fn duplicate_retry_delay_is_warning() {
        let mut cfg = Config::default();
        cfg.webhook.retry_delays_secs = vec![1, 1, 5];
        cfg.webhook.max_attempts = 4;
        let issues = cfg.validate();
        assert!(find(&issues, "webhook.retry_delays_secs[1]").is_some());
    }

    #[test]
    fn zero_idempotency_ttl_is_error() {
        let mut cfg = Config::default();
        cfg.idempotency.ttl_hours = 0;
        let issues = cfg.validate();
        assert_eq!(find(&issues, "idempotency.ttl_hours").unwrap().severity, ConfigSeverity::Error);
    }

    #[test]
    fn toml_round_trip_preserves_defaults() {
        let cfg = Config::default();
        let s = toml::to_string(&cfg).expect("serialize");
        let back: Config = toml::from_str(&s).expect("deserialize");
        assert_eq!(back.server.http_port, cfg.server.http_port);
        assert_eq!(back.responses.auto_create_conversation, cfg.responses.auto_create_conversation);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let s = r#"
            [server]
            http_port = 9000
        "#;
        let cfg: Config = toml::from_str(s).expect("deserialize");
        assert_eq!(cfg.server.http_port, 9000);
        assert_eq!(cfg.server.metrics_port, 9090);
        assert_eq!(cfg.webhook.retry_delays_secs, vec![1, 5, 30, 300]);
    }
}
