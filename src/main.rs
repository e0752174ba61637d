//! Whack-a-mole controller - reactive single-flight robot controller
//!
//! This is the main entry point for the controller process. It handles:
//! - Training the decision tree policy from the configured datasets
//! - The fixed-cadence control loop that gates and dispatches actions
//! - The bridge WebSocket that carries sensor events in and commands out
//! - HTTP health and status endpoints

mod app;
mod config;
mod control;
mod http;
mod policy;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::{Config, PolicyConfig};
use crate::control::Controller;
use crate::http::build_router;
use crate::policy::{build_policy, Policy};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize process time tracking
    init_server_time();

    info!("Starting whack-a-mole controller");
    info!("Server address: {}", config.server_addr);

    let policy = load_policy(&config.policy);

    // Spawn the control loop
    let (controller, handle) = Controller::new(
        config.control.clone(),
        policy,
        config.event_buffer,
        config.command_buffer,
    );
    tokio::spawn(controller.run());

    // Create application state
    let state = AppState::new(config.clone(), handle);

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Bridge endpoint: ws://{}/ws", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Build the policy. Failure leaves the controller in manual-only mode.
fn load_policy(config: &PolicyConfig) -> Option<Arc<dyn Policy>> {
    match build_policy(config) {
        Ok(tree) => {
            if config.dump {
                debug!("Trained decision tree:\n{}", tree.describe());
            }
            Some(Arc::new(tree))
        }
        Err(e) => {
            error!(error = %e, "Policy construction failed");
            warn!("Autonomous mode unavailable for this process; manual control only");
            None
        }
    }
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
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
