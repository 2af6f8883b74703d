//! gitrelay node - git smart HTTP relay.

use anyhow::Context;
use clap::Parser;
use gitrelay_auth::spawn_cache_purge;
use gitrelay_git::ProcessTracker;
use gitrelay_node::api::{create_router, AppState};
use gitrelay_node::config::NodeConfig;
use gitrelay_node::observability::{init_logging, LogFormat};
use gitrelay_telemetry::{spawn_retention, MetricsRecorder};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// gitrelay node - git smart HTTP relay with per-RPC telemetry
#[derive(Parser, Debug)]
#[command(name = "gitrelay-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gitrelay.yaml")]
    config: PathBuf,

    /// Listen address (overrides the configuration)
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_logging(
        &config.logging.level,
        LogFormat::parse(&config.logging.format),
    );
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting gitrelay node");
    tracing::info!(
        addr = %config.server.addr,
        data_dir = %config.server.data_dir.display(),
        repos_root = %config.git.repos_root.display(),
        "Node configuration"
    );

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.server.data_dir.display()
        )
    })?;

    let tracker = ProcessTracker::new();
    #[cfg(unix)]
    let reaper = gitrelay_git::spawn_reaper(tracker.clone());

    let recorder = Arc::new(MetricsRecorder::from_config(
        &config.metrics,
        &config.server.data_dir,
    ));
    let background = CancellationToken::new();
    let retention = recorder
        .destination()
        .and_then(|d| d.directory())
        .map(|dir| {
            spawn_retention(
                dir.to_path_buf(),
                config.metrics.retention_days,
                config.metrics.cleanup_interval(),
                background.clone(),
            )
        });

    let state = AppState::from_config(&config, recorder.clone(), tracker)?;
    let auth_purge = spawn_cache_purge(
        state.auth.clone(),
        config.auth.cache_ttl().max(Duration::from_secs(1)),
        background.clone(),
    );
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.server.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.addr))?;
    tracing::info!(addr = %config.server.addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("Shutting down");
    background.cancel();
    if let Some(handle) = retention {
        let _ = handle.await;
    }
    let _ = auth_purge.await;
    #[cfg(unix)]
    if let Some(handle) = reaper {
        handle.abort();
    }
    recorder.shutdown().await;
    tracing::info!("Metrics flushed, bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
