//! seqstream server binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use seqstream::config::{self, CliArgs};
use seqstream::server::{routes, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server_config = config::load_config(&args.config_path).with_context(|| {
        format!("loading configuration from {}", args.config_path.display())
    })?;

    let state = ServerState::new(
        &server_config,
        Duration::from_secs(args.sequence_cleaner_poll_wait_seconds),
        Duration::from_secs(args.max_sequence_idle_seconds),
    )
    .await?;
    let _sweeper_task = Arc::clone(state.sweeper()).start();

    let app = routes::create_router(Arc::clone(&state));
    let addr = format!("0.0.0.0:{}", args.rest_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding REST listener on {addr}"))?;
    info!(%addr, "serving REST and metrics endpoints");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("REST server terminated")?;
    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
