mod app;
mod cli;
mod config;
mod exec;
mod jobs;
mod logging;
mod routes;
mod staging;
#[cfg(test)]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use token_gate::{TokenGate, TokenVerifier};
use tracing::info;

use crate::app::{build_router, AppState};
use crate::cli::Args;
use crate::config::ServiceConfig;
use crate::exec::Supervisor;
use crate::logging::init_tracing;

// Headroom past the grace period for the final SIGKILL and reaping.
const DRAIN_SLACK: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = match args.config.as_deref() {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    let log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| config.logging.dir_path());
    let _log_guard = init_tracing(&config.logging, &log_dir, args.log_to_stderr)?;

    if let Some(listen_addr) = args.listen_addr.clone() {
        config.server.listen_addr = listen_addr;
    }
    info!(
        event = "service.starting",
        listen_addr = %config.server.listen_addr,
        config = ?args.config,
        storage_root = %config.storage.root_path().display(),
        "run service starting"
    );

    let public_key = config
        .auth
        .load_public_key()
        .context("failed to load token public key")?;
    let verifier =
        TokenVerifier::from_rsa_pem(&public_key).context("token public key is not a valid RSA PEM")?;
    let gate = Arc::new(TokenGate::new(config.auth.gate.clone(), verifier));

    let storage_root = config.storage.root_path();
    std::fs::create_dir_all(&storage_root)
        .with_context(|| format!("failed to create storage root {}", storage_root.display()))?;

    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::new(shutdown.clone());
    let state = AppState::new(&config, supervisor.clone());
    state
        .jobs
        .spawn_sweeper(config.limits.sweep_interval(), config.limits.job_retention());
    let app = build_router(state, gate, config.storage.max_upload_bytes);

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "run service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .await?;
    info!("run service shutting down");
    let limit = Duration::from_secs(config.limits.grace_period_secs) + DRAIN_SLACK;
    if !supervisor.drain(limit).await {
        tracing::warn!(
            event = "service.drain_timeout",
            limit_secs = limit.as_secs(),
            "running processes did not stop in time"
        );
    }
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to listen for ctrl-c");
                shutdown.cancelled().await;
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        }
    }
}
