//! Lander Race Server - authoritative server for a 2D lander race
//!
//! One run (map plus ships) is simulated at a fixed tick rate. Players
//! steer their ship over WebSocket, spectators watch and control the run.

mod app;
mod config;
mod game;
mod http;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::{MapCatalog, OrchestratorSettings, RunDriver, RunOrchestrator};
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Lander Race Server");
    info!(
        addr = %config.server_addr,
        mode = ?config.mode,
        run_id = %config.run_id,
        tick_rate = config.tick_rate,
        snapshot_rate = config.snapshot_rate,
        "Configuration loaded"
    );

    // Discover maps and load the initial one
    let catalog = MapCatalog::scan(&config.maps_dir).await?;
    let initial_name = catalog.initial(&config.map_name).to_string();
    if initial_name != config.map_name {
        info!(requested = %config.map_name, using = %initial_name, "Requested map not found");
    }
    let initial = catalog.load(&initial_name).await?;
    info!(maps = catalog.names().len(), map = %initial_name, "Map catalog ready");

    // Spawn the run driver
    let orchestrator = RunOrchestrator::new(
        OrchestratorSettings {
            run_id: config.run_id.clone(),
            tick_rate: config.tick_rate,
            snapshot_rate: config.snapshot_rate,
        },
        initial,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (driver, run) = RunDriver::new(orchestrator, shutdown_rx.clone());
    let driver_handle = tokio::spawn(driver.run());

    // Create application state and router
    let addr: SocketAddr = config.server_addr;
    let state = AppState::new(config, catalog, run, shutdown_rx);
    let router = build_router(state);

    // Start server
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    driver_handle.await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
