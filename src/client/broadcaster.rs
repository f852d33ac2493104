//! Broadcasting endpoint
//!
//! Owns the capture pipeline and the WebSocket to the relay server. The
//! capture callback fills a lock-free ring buffer; a send loop drains it
//! into frame envelopes, interleaving host playback-state updates on the
//! same connection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use crate::audio::buffer::create_shared_buffer;
use crate::audio::capture::AudioCapture;
use crate::client::{is_terminal, session_event, ConnectionStatus, SessionEvent};
use crate::config::AudioConfig;
use crate::constants::RING_BUFFER_CAPACITY;
use crate::error::{Error, TransportError};
use crate::protocol::{encode_samples, ClientMessage, FrameEnvelope, PlaybackControl};

struct ActiveBroadcast {
    room_code: String,
    capture: AudioCapture,
    send_task: JoinHandle<()>,
    recv_task: JoinHandle<()>,
    control_tx: mpsc::Sender<ClientMessage>,
}

/// Host-side connection supervisor
pub struct Broadcaster {
    audio: AudioConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
    active: Mutex<Option<ActiveBroadcast>>,
}

impl Broadcaster {
    pub fn new(audio: AudioConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            audio,
            status_tx,
            events_tx,
            active: Mutex::new(None),
        }
    }

    /// Watchable connection status
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribe to session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Connect, acquire the capture device and announce the room.
    ///
    /// The capture device is acquired after the transport opens; if it is
    /// unavailable the transport is rolled back before the error
    /// propagates, leaving the supervisor back on `Idle`.
    pub async fn start(&self, server_url: &str, room_code: &str) -> Result<(), Error> {
        if self.active.lock().is_some() {
            return Ok(());
        }
        self.status_tx.send_replace(ConnectionStatus::Connecting);

        let (ws, _) = match tokio_tungstenite::connect_async(server_url).await {
            Ok(ok) => ok,
            Err(e) => {
                self.status_tx.send_replace(ConnectionStatus::Idle);
                return Err(TransportError::ConnectFailed(e.to_string()).into());
            }
        };

        let buffer = create_shared_buffer(RING_BUFFER_CAPACITY);
        let mut capture = match AudioCapture::new(self.audio.clone(), buffer.clone()) {
            Ok(capture) => capture,
            Err(e) => {
                drop(ws);
                self.status_tx.send_replace(ConnectionStatus::Idle);
                return Err(e.into());
            }
        };
        if let Err(e) = capture.start() {
            drop(ws);
            self.status_tx.send_replace(ConnectionStatus::Idle);
            return Err(e.into());
        }

        let (mut sink, mut stream) = ws.split();

        let create = ClientMessage::CreateRoom {
            room_code: room_code.to_string(),
        };
        let json = match serde_json::to_string(&create) {
            Ok(json) => json,
            Err(e) => {
                capture.stop();
                self.status_tx.send_replace(ConnectionStatus::Idle);
                return Err(TransportError::SendFailed(e.to_string()).into());
            }
        };
        if let Err(e) = sink.send(WsMessage::Text(json)).await {
            capture.stop();
            self.status_tx.send_replace(ConnectionStatus::Idle);
            return Err(TransportError::SendFailed(e.to_string()).into());
        }

        let (control_tx, mut control_rx) = mpsc::channel::<ClientMessage>(16);

        let room = room_code.to_string();
        let send_task = tokio::spawn(async move {
            loop {
                while let Some(chunk) = buffer.try_pop() {
                    let envelope = FrameEnvelope::new(room.clone(), encode_samples(&chunk.samples));
                    match envelope.encode() {
                        Ok(bytes) => {
                            if sink.send(WsMessage::Binary(bytes.to_vec())).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("Dropping unencodable frame: {}", e),
                    }
                }

                while let Ok(message) = control_rx.try_recv() {
                    if let Ok(json) = serde_json::to_string(&message) {
                        if sink.send(WsMessage::Text(json)).await.is_err() {
                            return;
                        }
                    }
                }

                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let status_tx = self.status_tx.clone();
        let events_tx = self.events_tx.clone();
        let recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = stream.next().await {
                if let WsMessage::Text(text) = message {
                    match serde_json::from_str(&text) {
                        Ok(message) => {
                            if let Some(event) = session_event(&message) {
                                let _ = events_tx.send(event);
                            }
                            if is_terminal(&message) {
                                status_tx.send_replace(ConnectionStatus::Idle);
                                break;
                            }
                        }
                        Err(e) => warn!("Bad server message: {}", e),
                    }
                }
            }
            // Transport gone or session over either way
            status_tx.send_replace(ConnectionStatus::Idle);
        });

        *self.active.lock() = Some(ActiveBroadcast {
            room_code: room_code.to_string(),
            capture,
            send_task,
            recv_task,
            control_tx,
        });
        self.status_tx.send_replace(ConnectionStatus::Live);
        info!("Broadcasting to room {}", room_code);
        Ok(())
    }

    /// Publish playback control for this room; dropped when not live
    pub fn sync_state(&self, state: PlaybackControl) {
        if let Some(active) = self.active.lock().as_ref() {
            let message = ClientMessage::SyncState {
                room_code: active.room_code.clone(),
                state,
            };
            let _ = active.control_tx.try_send(message);
        }
    }

    /// Release capture and transport; idempotent and safe from
    /// partial-failure paths.
    pub fn stop(&self) {
        if let Some(mut active) = self.active.lock().take() {
            active.capture.stop();
            active.send_task.abort();
            active.recv_task.abort();
            info!("Stopped broadcasting to room {}", active.room_code);
        }
        self.status_tx.send_replace(ConnectionStatus::Idle);
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_rolls_back_to_idle() {
        let broadcaster = Broadcaster::new(AudioConfig::default());
        let result = broadcaster.start("ws://127.0.0.1:1/ws", "ROOM").await;
        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::ConnectFailed(_)))
        ));
        assert_eq!(*broadcaster.status().borrow(), ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let broadcaster = Broadcaster::new(AudioConfig::default());
        broadcaster.stop();
        broadcaster.stop();
        assert_eq!(*broadcaster.status().borrow(), ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_sync_state_when_idle_is_dropped() {
        let broadcaster = Broadcaster::new(AudioConfig::default());
        broadcaster.sync_state(PlaybackControl {
            is_playing: true,
            position: 1.0,
        });
        assert_eq!(*broadcaster.status().borrow(), ConnectionStatus::Idle);
    }
}
