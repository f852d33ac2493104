//! Relay Server Application
//!
//! Accepts WebSocket connections, tracks rooms and fans out audio frames
//! from each room's host to its listeners.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomcast::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;

    tracing::info!("Starting roomcast relay server");
    roomcast::server::serve(config).await?;

    Ok(())
}
