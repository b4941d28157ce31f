//! # Chatter
//!
//! Real-time chat server entry point. Initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Database pool, hub and optional message bus
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use chatter::config::Settings;
use chatter::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    chatter::telemetry::init_tracing();

    info!("Starting Chatter...");

    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        bus_enabled = settings.bus.enabled,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
