//! Listener Application
//!
//! Joins a room by code and plays the broadcast through the default
//! output device.

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roomcast::client::{ConnectionStatus, Listener, SessionEvent};
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

    let room_code = match std::env::args().nth(1) {
        Some(code) => code,
        None => bail!("Usage: listener <ROOM_CODE> [SERVER_URL]"),
    };
    let server_url = std::env::args()
        .nth(2)
        .unwrap_or_else(|| format!("ws://127.0.0.1:{}/ws", config.server.port));

    let listener = Listener::new(config.audio.clone());

    let mut events = listener.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::RoomCount(count) => {
                    tracing::info!("Room occupancy: {}", count);
                }
                SessionEvent::StateUpdate(state) => {
                    tracing::info!(
                        "Host state: playing={} position={:.1}s",
                        state.is_playing,
                        state.position
                    );
                }
                SessionEvent::RoomClosed => {
                    tracing::info!("Broadcast has ended");
                }
                SessionEvent::Error(message) => {
                    tracing::error!("{}", message);
                }
                other => tracing::debug!("Event: {:?}", other),
            }
        }
    });

    listener.join(&server_url, &room_code).await?;
    println!("Listening to room {}. Press Ctrl+C to leave.", room_code);

    let mut status = listener.status();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            listener.leave();
        }
        _ = async {
            // Ends when the session drops back to Idle (room closed)
            while status.changed().await.is_ok() {
                if *status.borrow() == ConnectionStatus::Idle {
                    break;
                }
            }
        } => {
            tracing::info!("Session ended");
        }
    }

    Ok(())
}
