use anyhow::Context;
use clap::Parser;
use dockmgr::api::{AppState, router};
use dockmgr::config::ServiceConfig;
use dockmgr::container::EngineClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dockmgr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Container management service for Docker/Podman workloads")]
#[command(long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Address to listen on
    #[arg(long = "host")]
    host: Option<String>,
    /// Port to listen on
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Log filter directive, e.g. `dockmgr=debug`
    #[arg(long = "log-filter")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(filter) = args.log_filter {
        config.logging.filter = filter;
    }
    config.validate().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting dockmgr {}", env!("CARGO_PKG_VERSION"));
    match &config.source {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("No configuration file found, using defaults"),
    }

    let client = Arc::new(
        EngineClient::connect(&config.engine)
            .await
            .context("failed to connect to the container engine")?,
    );

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    let app = router(AppState::new(client.clone(), config.container.clone()));
    let (notify_tx, notify_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = notify_tx.send(());
            })
            .await
    });

    wait_for_server(server, notify_rx, config.server.shutdown_timeout()).await?;

    if let Err(e) = client.close().await {
        warn!("Failed to close engine client: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}

/// Wait for the server to exit, bounding the drain after a shutdown signal.
async fn wait_for_server(
    mut server: tokio::task::JoinHandle<std::io::Result<()>>,
    signalled: tokio::sync::oneshot::Receiver<()>,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    tokio::select! {
        result = &mut server => return result?.context("server error"),
        _ = signalled => {}
    }

    info!("Draining in-flight requests (up to {:?})", drain_timeout);
    match tokio::time::timeout(drain_timeout, &mut server).await {
        Ok(result) => result?.context("server error"),
        Err(_) => {
            error!("Graceful shutdown timed out after {:?}", drain_timeout);
            server.abort();
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
