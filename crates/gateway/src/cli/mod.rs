pub mod config;

use clap::{Parser, Subcommand};

/// rae-gateway — a plan-driven tool-orchestration engine for the Response API.
#[derive(Debug, Parser)]
#[command(name = "rae-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Env vars that override specific config fields after the TOML file (or
/// defaults) are loaded, named per the external-interfaces surface.
const ENV_OVERRIDES: &[(&str, fn(&mut rae_domain::config::Config, &str))] = &[
    ("RAE_HTTP_PORT", |c, v| {
        if let Ok(p) = v.parse() {
            c.server.http_port = p;
        }
    }),
    ("RAE_METRICS_PORT", |c, v| {
        if let Ok(p) = v.parse() {
            c.server.metrics_port = p;
        }
    }),
    ("DATABASE_URL", |c, v| c.database.dsn = v.to_string()),
    ("RAE_LLM_BASE_URL", |c, v| c.llm.base_url = v.to_string()),
    ("RAE_MCP_ENDPOINT_URL", |c, v| c.mcp.endpoint_url = v.to_string()),
    ("RAE_WORKER_COUNT", |c, v| {
        if let Ok(n) = v.parse() {
            c.queue.worker_count = n;
        }
    }),
    ("RAE_TASK_TIMEOUT_SECS", |c, v| {
        if let Ok(n) = v.parse() {
            c.queue.task_timeout_secs = n;
        }
    }),
];

/// Load the configuration from the path named by `RAE_CONFIG` (or
/// `config.toml` by default), then apply the named env-var overrides.
/// `RAE_LLM_API_KEY` and `RAE_WEBHOOK_SECRET` are read directly by the
/// LLM provider and webhook dispatcher via `llm.api_key_env` /
/// `webhook.secret_env` indirection, not overlaid here.
pub fn load_config() -> anyhow::Result<(rae_domain::config::Config, String)> {
    let config_path = std::env::var("RAE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        rae_domain::config::Config::default()
    };

    for (env_var, apply) in ENV_OVERRIDES {
        if let Ok(value) = std::env::var(env_var) {
            apply(&mut config, &value);
        }
    }

    Ok((config, config_path))
}
