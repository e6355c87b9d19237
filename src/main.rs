use anyhow::{Context, Result};
use chgate::{AppState, Config, ProxyMetrics, ReverseProxy, build_router, logging};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Reverse proxy for ClickHouse clusters
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long)]
    config: PathBuf,

    /// Listen address, overrides `listen_addr` from the configuration
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_file(&args.config)
        .with_context(|| format!("failed to load config {:?}", args.config))?;
    let log_handle = logging::init(config.log_debug);

    let metrics = Arc::new(ProxyMetrics::new());
    let proxy = ReverseProxy::new(&config, metrics.clone())
        .context("failed to apply configuration")?
        .with_log_handle(log_handle);
    let proxy = Arc::new(proxy);

    tokio::spawn(reload_on_hangup(Arc::clone(&proxy), args.config.clone()));

    let addr = args.listen.unwrap_or(config.listen_addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(address = %addr, "chgate started");

    axum::serve(listener, build_router(AppState::new(proxy, metrics)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(proxy: Arc<ReverseProxy>, path: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(err) => {
            error!(error = %err, "unable to install SIGHUP handler");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!(path = ?path, "SIGHUP received, reloading configuration");
        if let Err(err) = proxy.reload_config(&path).await {
            error!(error = %err, "configuration reload failed, keeping previous configuration");
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_proxy: Arc<ReverseProxy>, _path: PathBuf) {}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
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
