//! tidb-operator - A Kubernetes operator for managing TidbCluster custom resources.
//!
//! This is the main entry point that:
//! - Parses configuration from flags and environment
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Starts the health server and the controller

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use tidb_operator::config::{LogFormat, OperatorConfig};
use tidb_operator::health::{HealthState, run_health_server};
use tidb_operator::run_controller;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::parse();

    // Initialize tracing subscriber
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("tidb_operator=info".parse()?)
        .add_directive("kube=info".parse()?);
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting tidb-operator");

    // Create Kubernetes client
    let client = config.kube_client().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately so probes work while caches fill
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Relay the signal through a channel the controller can hold across threads
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let controller_handle = {
        let health_state = health_state.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            run_controller(client, &config, Some(health_state), shutdown).await;
        })
    };

    // The controller drains in-flight reconciliations on shutdown, then returns
    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
    }

    health_state.set_ready(false).await;
    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the operator cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
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

    info!("Received shutdown signal, initiating graceful shutdown...");
}
