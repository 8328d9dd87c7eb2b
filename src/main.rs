//! ckd-risk: CKD mortality risk calculator.
//!
//! Main entry point for the web service.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ckd_risk::adapters::sanitize::SanitizingMakeWriter;
use ckd_risk::adapters::ArtifactBundle;
use ckd_risk::application::RiskService;
use ckd_risk::config::ServerConfig;
use ckd_risk::http::{router, AppState};

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // stdout by default so platform log collection works; file on request.
    let log_mode = std::env::var("RISKCALC_LOG_MODE").unwrap_or_else(|_| "stdout".to_string());

    let (writer, guard) = if log_mode == "file" {
        let log_file = std::env::var("RISKCALC_LOG_FILE")
            .unwrap_or_else(|_| "logs/ckd-risk.log".to_string());

        if let Some(parent) = std::path::Path::new(&log_file).parent() {
            // Best-effort: the open below reports the real failure.
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("failed to open log file {log_file}"))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging()?;

    tracing::info!("Starting ckd-risk...");

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let bundle = ArtifactBundle::load(&config.artifact_dir, &config.integrity)
        .with_context(|| format!("failed to load artifacts from {:?}", config.artifact_dir))?;
    let service = RiskService::from_bundle(bundle, Arc::new(config.explainer()))
        .context("artifacts are inconsistent")?;

    let app = router(AppState::new(service));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("ckd-risk shutdown complete.");
    Ok(())
}
