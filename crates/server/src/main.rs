mod billing;
mod bootstrap;
mod bots;
mod errors;
mod health;
mod jobs;
mod oauth;
mod webhook;

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use marketbot_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use marketbot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    // The billing sweep runs only on this cadence; no request handler can
    // trigger it, which is what keeps it once-per-period.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let billing = app.billing.clone();
    let billing_job = tokio::spawn(jobs::run_periodic(
        "billing-sweep",
        Duration::from_secs(app.config.billing.sweep_interval_secs),
        shutdown_rx,
        move || {
            let sweep = billing.clone();
            async move {
                sweep.run_once().await?;
                Ok(())
            }
        },
    ));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "marketbot-server started"
    );

    let _ = &app.bot_service;
    axum::serve(listener, bootstrap::api_router(&app))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "marketbot-server stopping; letting the current job iteration finish"
    );
    let _ = shutdown_tx.send(true);
    billing_job.await?;

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
