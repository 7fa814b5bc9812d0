#![forbid(unsafe_code)]

//! `repoql-bridge` binary: the MCP stdio bridge.
//!
//! Bootstraps configuration, resolves the RepoQL executable, starts the
//! instance registry, and serves the four `repoql_*` tools over stdio
//! until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use repoql_bridge::config::BridgeConfig;
use repoql_bridge::lifecycle::InstanceRegistry;
use repoql_bridge::server::handler::AppState;
use repoql_bridge::server::transport;
use repoql_bridge::service::BridgeService;
use repoql_bridge::{BridgeError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "repoql-bridge", about = "MCP bridge to RepoQL workspaces", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.  Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the workspace root served by this bridge.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("repoql-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| BridgeError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };

    // Override workspace root from CLI if provided.
    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| BridgeError::Config(format!("invalid workspace override: {err}")))?;
        config.workspace = Some(canonical);
    }

    let workspace_root = match &config.workspace {
        Some(ws) => ws.clone(),
        None => std::env::current_dir().map_err(|err| {
            BridgeError::Config(format!("cannot determine working directory: {err}"))
        })?,
    };

    // ── Resolve the RepoQL executable ───────────────────
    let exe_path = config.find_executable()?;
    info!(
        exe = %exe_path.display(),
        workspace = %workspace_root.display(),
        "configuration loaded"
    );

    // ── Build shared application state ──────────────────
    let registry = InstanceRegistry::new(config.registry_config(exe_path));
    let service = BridgeService::new(registry.clone(), workspace_root.clone());

    let state = Arc::new(AppState {
        config: Arc::new(config),
        registry,
        workspace_root,
    });

    // ── Start supervision ───────────────────────────────
    service.start().await;

    // ── Start transport ─────────────────────────────────
    let ct = CancellationToken::new();
    let stdio_ct = ct.clone();
    let stdio_state = Arc::clone(&state);
    let stdio_handle = tokio::spawn(async move {
        if let Err(err) = transport::serve_stdio(stdio_state, stdio_ct).await {
            error!(%err, "stdio transport failed");
        }
    });

    info!("MCP server ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Graceful shutdown: stop child processes ─────────
    service.stop().await;

    let _ = stdio_handle.await;
    info!("repoql-bridge shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Stdout carries the MCP protocol stream; logs go to stderr.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| BridgeError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| BridgeError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
