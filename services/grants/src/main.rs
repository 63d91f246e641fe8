use anyhow::{Context, Result};
use guestlens_grants::{start_api_server, AppState, Config, S3ObjectStore, StaticAccessPolicy};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level, &config.service.log_format);
    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        "Starting Guestlens grant service"
    );

    init_metrics(config.service.metrics_port)?;

    let store = S3ObjectStore::new(&config.s3).await;
    info!(bucket = %store.bucket(), access_mode = ?config.access.mode, "Grant authority ready");

    let api_config = config.api.clone();
    let state = AppState {
        store: Arc::new(store),
        access: Arc::new(StaticAccessPolicy::from_config(&config.access)),
        config: Arc::new(config),
    };

    start_api_server(state, &api_config, shutdown_signal()).await?;

    info!("Grant service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
