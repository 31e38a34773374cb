use std::net::SocketAddr;

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use hunyuan_studio::config::{Config, Section};
use hunyuan_studio::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads .env before anything looks at the environment
    let config = Config::from_env();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    match &config.runpod {
        Section::Ready(rp) => tracing::info!("Using RunPod endpoint: {}", rp.endpoint_id),
        Section::Missing(vars) => tracing::warn!("RunPod not configured, missing: {}", vars.join(", ")),
    }
    match &config.r2 {
        Section::Ready(r2) => tracing::info!("Using R2 bucket: {}", r2.bucket),
        Section::Missing(vars) => tracing::warn!("R2 not configured, missing: {}", vars.join(", ")),
    }
    tracing::info!(
        "Polling every {:?}, at most {} checks; finished jobs kept for {:?}",
        config.poll.interval,
        config.poll.max_attempts,
        config.tracked_retention
    );

    let app = router(AppState::from_config(&config));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
    }
    tracing::info!("Shutting down");
}
