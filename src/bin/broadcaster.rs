//! Broadcaster Application
//!
//! Captures the default input device and streams it to every listener in
//! a room on the relay server.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomcast::audio::device::list_devices;
use roomcast::client::{Broadcaster, SessionEvent};
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

    let room_code = std::env::args().nth(1).unwrap_or_else(|| {
        uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase()
    });
    let server_url = std::env::args()
        .nth(2)
        .unwrap_or_else(|| format!("ws://127.0.0.1:{}/ws", config.server.port));

    // List available input devices
    println!("\n=== Available Input Devices ===");
    for device in list_devices() {
        if device.is_input {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}", device.name, default_marker);
        }
    }
    println!();

    let broadcaster = Broadcaster::new(config.audio.clone());

    let mut events = broadcaster.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::RoomCount(count) => {
                    tracing::info!("Listeners: {}", count.saturating_sub(1));
                }
                SessionEvent::ParticipantJoined(conn) => {
                    tracing::info!("Participant joined: {}", conn);
                }
                SessionEvent::ParticipantLeft(conn) => {
                    tracing::info!("Participant left: {}", conn);
                }
                SessionEvent::Error(message) => {
                    tracing::error!("Broadcast failed: {}", message);
                }
                other => tracing::debug!("Event: {:?}", other),
            }
        }
    });

    broadcaster.start(&server_url, &room_code).await?;
    println!("Broadcasting live. Room code: {}", room_code);
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    broadcaster.stop();
    tracing::info!("Broadcast stopped");

    Ok(())
}
