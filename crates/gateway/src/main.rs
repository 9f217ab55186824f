use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use guru_composer::LessonComposer;
use guru_domain::config::{Config, ConfigSeverity};
use guru_gateway::api;
use guru_gateway::runtime::{CancelMap, LessonStore, WorkerPool};
use guru_gateway::state::{AppState, Services};
use guru_progress::ProgressTracker;
use guru_registry::TaskRegistry;
use guru_upstream::{
    RestEncyclopediaClient, RestKnowledgeClient, RestSimulationClient, RestTtsClient,
    RestTutoringClient, UpstreamClient,
};

#[derive(Parser)]
#[command(name = "gurukul-core", about = "Gurukul orchestration core")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default).
    Serve {
        /// Path to config.toml.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
        /// Override the listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the configuration and exit.
    ConfigValidate {
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => {
            init_tracing();
            let config = load_config(&PathBuf::from("config.toml"))?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Serve { config, port }) => {
            init_tracing();
            let mut config = load_config(&config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(Arc::new(config)).await
        }
        Some(Command::ConfigValidate { config }) => {
            let config = load_config(&config)?;
            let issues = config.validate();
            for issue in &issues {
                match issue.severity {
                    ConfigSeverity::Warning => eprintln!("warning: {issue}"),
                    ConfigSeverity::Error => eprintln!("error: {issue}"),
                }
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration is valid");
            Ok(())
        }
        Some(Command::Version) => {
            println!("gurukul-core {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,guru_gateway=debug")),
        )
        .json()
        .init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    Config::load(path).map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("gurukul orchestration core starting");

    // ── Config validation ────────────────────────────────────────────
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
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Task registry ────────────────────────────────────────────────
    let registry = Arc::new(TaskRegistry::new(
        config.registry.task_ttl(),
        config.registry.events_page_limit,
    ));
    tracing::info!(
        ttl_secs = config.registry.task_ttl_secs,
        "task registry ready"
    );

    // ── Upstream client + typed services ─────────────────────────────
    let upstream = Arc::new(
        UpstreamClient::new(config.upstreams.knowledge.connect_timeout())
            .map_err(|e| anyhow::anyhow!("building upstream client: {e}"))?,
    );
    let knowledge = Arc::new(RestKnowledgeClient::new(
        upstream.clone(),
        &config.upstreams.knowledge,
    ));
    let encyclopedia = Arc::new(RestEncyclopediaClient::new(
        upstream.clone(),
        &config.upstreams.encyclopedia,
    ));
    let services = Arc::new(Services {
        tutoring: Arc::new(RestTutoringClient::new(
            upstream.clone(),
            &config.upstreams.tutoring,
        )),
        tts: Arc::new(RestTtsClient::new(upstream.clone(), &config.upstreams.tts)),
        simulation: Arc::new(RestSimulationClient::new(
            upstream.clone(),
            &config.upstreams.simulation,
        )),
    });
    tracing::info!("upstream clients ready");

    // ── Lesson composer + store ──────────────────────────────────────
    let composer = Arc::new(LessonComposer::new(knowledge, encyclopedia));
    let lessons = Arc::new(LessonStore::new());
    tracing::info!("lesson composer ready");

    // ── Progress tracker ─────────────────────────────────────────────
    let tracker = Arc::new(ProgressTracker::new(config.interventions.clone()));
    tracing::info!("progress tracker ready");

    // ── Worker pool + cancel map ─────────────────────────────────────
    let cancel_map = Arc::new(CancelMap::new());
    let pool = Arc::new(WorkerPool::new(
        &config.pool,
        registry.clone(),
        cancel_map.clone(),
    ));
    tracing::info!("worker pool ready");

    // ── API token (read once, hash for constant-time comparison) ─────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "API bearer-token auth DISABLED — set {env_var} to enable"
                );
                None
            }
        }
    };

    let state = AppState {
        config: config.clone(),
        registry: registry.clone(),
        pool: pool.clone(),
        cancel_map,
        lessons,
        composer,
        tracker,
        upstream,
        services,
        api_token_hash,
    };

    // ── TTL sweeper ──────────────────────────────────────────────────
    {
        let registry = registry.clone();
        let interval = Duration::from_secs(config.registry.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = registry.sweep(chrono::Utc::now());
                if removed > 0 {
                    tracing::info!(removed, "swept expired terminal tasks");
                }
            }
        });
    }

    // ── CORS ─────────────────────────────────────────────────────────
    let origins: Vec<HeaderValue> = config
        .server
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    let app = api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // ── Serve ────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Drain in-flight jobs before exiting.
    let grace = Duration::from_secs(config.pool.shutdown_grace_secs);
    tracing::info!(grace_secs = grace.as_secs(), "draining worker pool");
    pool.shutdown(grace).await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
