mod config;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Semaphore;
use tracing::info;
use warden_core::Checker;
use warden_core::IpPolicyPermissioner;
use warden_core::Runner;

use crate::config::Config;
use crate::handlers::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let policies = config.ip_policies();
    info!(policies = ?policies, listen_addr = %config.listen_addr, "starting");

    let permissioner = Arc::new(IpPolicyPermissioner::disallow(policies));
    let state = AppState {
        runner: Arc::new(Runner::new(config.bootstrap_script.clone(), permissioner)),
        checker: Arc::new(Checker::new()),
        run_slots: Arc::new(Semaphore::new(config.max_concurrency)),
        run_timeout: Duration::from_secs(config.run_timeout_seconds),
    };

    let app = axum::Router::new()
        .route("/run", axum::routing::post(handlers::run))
        .route("/check", axum::routing::post(handlers::check))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install the shutdown signal handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
