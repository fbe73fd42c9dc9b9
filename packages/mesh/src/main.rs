// packages/mesh/src/main.rs
//! Sentra Lab Agent Mesh Host
//!
//! Accepts worker connections and routes envelopes between their agents.

use anyhow::Result;
use sentra_lab_mesh::host::HostHandle;
use sentra_lab_mesh::observability::{init_metrics, init_tracing, shutdown_tracing};
use sentra_lab_mesh::utils::config::MeshConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (defaults, file, SENTRA_MESH__* environment)
    let config = MeshConfig::load()?;

    // Initialize observability (tracing, metrics, logging)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("Starting Sentra Lab Agent Mesh Host v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {:?}", config);

    let host = HostHandle::new(config.host.clone());
    let addr = host.start().await?;
    info!("Workers can connect to {}", addr);

    // Graceful shutdown handler
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Received shutdown signal, cleaning up...");

    let result = host.stop().await;
    shutdown_tracing();

    match result {
        Ok(()) => {
            info!("Host stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Host shutdown error: {}", e);
            Err(e.into())
        }
    }
}
