//! # fiscal-agent Entry Point
//!
//! ## Startup Sequence
//! 1. Initialize tracing
//! 2. Load configuration (`FISCAL_CONFIG` path, else the platform default)
//! 3. Start the agent (database, engine, watcher)
//! 4. Serve the control API until Ctrl+C / SIGTERM
//! 5. Stop the watcher, then the engine, then close the database

use std::path::PathBuf;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use fiscal_agent::app::Agent;
use fiscal_agent::{init_tracing, routes, shutdown_signal};
use fiscal_sync::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting fiscal agent...");

    let config_path = std::env::var_os("FISCAL_CONFIG").map(PathBuf::from);
    let config = AgentConfig::load(config_path).context("failed to load agent configuration")?;
    let bind_addr = config.control.bind_address();
    info!(
        name = %config.agent.name,
        backend = %config.backend.kind,
        inbox = %config.watcher.inbox_dir.display(),
        "Configuration loaded"
    );

    let agent = Agent::start(config).await.context("failed to start agent")?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind control API to {}", bind_addr))?;
    info!(addr = %bind_addr, "Control API listening");

    axum::serve(listener, routes::router(agent.api.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control API server failed")?;

    agent.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}
