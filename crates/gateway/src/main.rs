use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

mod api;
mod cli;
mod state;

use cli::{Cli, Command, ConfigCommand};
use rae_domain::config::{Config, ConfigSeverity};
use state::AppState;
use rae_mcp_client::McpClient;
use rae_providers::OpenAiCompatProvider;
use rae_queue::{spawn_worker_pool, WorkerPoolConfig};
use rae_responses::{IdempotencyStore, ResponseService, ResponseServiceConfig, WebhookDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("rae-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rae_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("rae-gateway starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Database ──────────────────────────────────────────────────────
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.dsn)
        .await
        .context("connecting to database")?;
    tracing::info!("database pool ready");

    // ── LLM provider ──────────────────────────────────────────────────
    let api_key = rae_providers::resolve_api_key(&config.llm.api_key_env).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "LLM service token not set — upstream calls will be unauthenticated");
        String::new()
    });
    let provider = Arc::new(OpenAiCompatProvider::new(
        "default",
        config.llm.base_url.clone(),
        api_key,
        config.llm.default_model.clone(),
        config.llm.timeout_secs,
    )?);
    tracing::info!(base_url = %config.llm.base_url, "LLM provider ready");

    // ── MCP client ────────────────────────────────────────────────────
    let mcp = Arc::new(McpClient::new(&config.mcp));
    tracing::info!(endpoint = %config.mcp.endpoint_url, "MCP client ready");

    // ── Queue + background worker pool ───────────────────────────────
    let queue = Arc::new(rae_queue::QueueRepository::new(
        pool.clone(),
        config.queue.max_attempts,
        Duration::from_secs(config.queue.task_timeout_secs),
    ));

    // ── Plan state machine ────────────────────────────────────────────
    let plans = Arc::new(rae_plans::PlanRepository::new(pool.clone()));

    // ── Idempotency + webhooks ────────────────────────────────────────
    let idempotency = Arc::new(IdempotencyStore::new(pool.clone(), config.idempotency.ttl_hours));
    let webhook_secret = std::env::var(&config.webhook.secret_env).unwrap_or_else(|_| {
        tracing::warn!(env_var = %config.webhook.secret_env, "webhook signing secret not set — signatures will use an empty key");
        String::new()
    });
    let webhooks = Arc::new(WebhookDispatcher::new(
        webhook_secret,
        config.webhook.retry_delays_secs.clone(),
        config.webhook.max_attempts,
    ));

    // ── Response service ──────────────────────────────────────────────
    let responses = Arc::new(ResponseService::new(
        pool.clone(),
        provider,
        mcp,
        queue.clone(),
        plans,
        webhooks,
        idempotency,
        ResponseServiceConfig {
            max_input_tokens: config.responses.max_input_tokens,
            max_tool_loop_depth: config.responses.max_tool_loop_depth,
            tool_call_timeout: Duration::from_secs(config.responses.tool_call_timeout_secs),
            auto_create_conversation: config.responses.auto_create_conversation,
        },
    ));

    let cancel = CancellationToken::new();
    let worker_handles = spawn_worker_pool(
        queue.clone(),
        responses.clone(),
        WorkerPoolConfig {
            worker_count: config.queue.worker_count,
            poll_interval: Duration::from_secs(config.queue.poll_interval_secs),
            task_timeout: Duration::from_secs(config.queue.task_timeout_secs),
            shutdown_drain: Duration::from_secs(config.queue.shutdown_drain_secs),
        },
        cancel.clone(),
    );
    tracing::info!(workers = config.queue.worker_count, "worker pool started");

    {
        let queue = queue.clone();
        let cancel = cancel.clone();
        let interval = Duration::from_secs(config.queue.poll_interval_secs.max(1) * 5);
        tokio::spawn(async move {
            rae_queue::run_reaper(queue, interval, cancel).await;
        });
    }
    tracing::info!("lease reaper started");

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = match std::env::var("RAE_API_TOKEN") {
        Ok(token) if !token.is_empty() => {
            tracing::info!("API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!("API bearer-token auth DISABLED — set RAE_API_TOKEN to enable");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        responses,
        api_token_hash,
    };

    // ── CORS / concurrency / rate limit ──────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent = std::env::var("RAE_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );

        GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        }
    });

    let router = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state)
    } else {
        router.with_state(state)
    };

    // ── Bind and serve ────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "rae-gateway listening");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await
        .context("axum server error")?;

    rae_queue::shutdown(worker_handles, cancel, Duration::from_secs(config.queue.shutdown_drain_secs)).await;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). These are expanded into a predicate that
/// matches any port on that host. A literal `"*"` allows all origins.
fn build_cors_layer(cors: &rae_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
