use anyhow::{Context, Result};
use std::net::SocketAddr;
use telemon_common::proto::metrics_server::MetricsServer;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

use telemon_server::app;
use telemon_server::config::ServerConfig;
use telemon_server::grpc::MetricsService;
use telemon_server::state::AppState;
use telemon_server::storage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load(&config_path)?;
    tracing::info!(config = %config_path, "Loaded configuration");

    let shutdown = CancellationToken::new();
    let opened = storage::open_store(&config, shutdown.clone())?;
    let state = AppState::from_config(&config, opened.store.clone())?;

    let grpc_addr: SocketAddr = config
        .grpc_addr
        .parse()
        .with_context(|| format!("invalid grpc_addr '{}'", config.grpc_addr))?;
    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;

    let mut servers = JoinSet::new();

    let grpc_server = TonicServer::builder()
        .add_service(MetricsServer::new(MetricsService::new(state.clone())))
        .serve_with_shutdown(grpc_addr, shutdown.clone().cancelled_owned());
    servers.spawn(async move {
        grpc_server.await.context("gRPC server")
    });
    tracing::info!(addr = %grpc_addr, "gRPC server listening");

    let http_app = app::build_http_app(state);
    let http_shutdown = shutdown.clone();
    servers.spawn(async move {
        axum::serve(
            listener,
            http_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(http_shutdown.cancelled_owned())
        .await
        .context("HTTP server")
    });
    tracing::info!(addr = %config.http_addr, "HTTP server listening");

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("listening for ctrl-c")?;
            tracing::info!("Shutting down gracefully");
        }
        Some(res) = servers.join_next() => {
            match res {
                Ok(Ok(())) => tracing::warn!("Server stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Server failed"),
                Err(e) => tracing::error!(error = %e, "Server task panicked"),
            }
        }
    }
    shutdown.cancel();

    let store = opened.store;
    let flusher = opened.flusher;
    let drain = async move {
        while let Some(res) = servers.join_next().await {
            if let Ok(Err(e)) = res {
                tracing::error!(error = %e, "Server failed during shutdown");
            }
        }
        if let Some(flusher) = flusher {
            let _ = flusher.await;
        }
        store.close()
    };
    tokio::time::timeout(config.shutdown_timeout(), drain)
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "shutdown did not finish within {}s",
                config.shutdown_timeout_secs
            )
        })??;

    tracing::info!("Server stopped");
    Ok(())
}
