//! Listening endpoint
//!
//! Joins a room, decodes arriving frames and drives the playback
//! scheduler against the sink's clock. A join is confirmed before any
//! audio resources are acquired, so a rejected code never touches the
//! output device.

use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::audio::buffer::PcmChunk;
use crate::audio::playback::ScheduledOutput;
use crate::audio::scheduler::FrameScheduler;
use crate::client::{is_terminal, session_event, ConnectionStatus, SessionEvent};
use crate::config::AudioConfig;
use crate::error::{Error, SessionError, TransportError};
use crate::protocol::{decode_samples, ClientMessage, ServerMessage};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

struct ActiveListen {
    room_code: String,
    task: JoinHandle<()>,
}

/// Listener-side connection supervisor
pub struct Listener {
    audio: AudioConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
    active: Mutex<Option<ActiveListen>>,
}

impl Listener {
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

    /// Join a room and start playback.
    ///
    /// A rejected join (`Room not found`) is terminal: the supervisor
    /// returns to `Idle` and the caller must explicitly re-join.
    pub async fn join(&self, server_url: &str, room_code: &str) -> Result<(), Error> {
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
        let (mut sink, mut stream) = ws.split();

        let join = ClientMessage::JoinRoom {
            room_code: room_code.to_string(),
        };
        let send_result = match serde_json::to_string(&join) {
            Ok(json) => sink.send(WsMessage::Text(json)).await,
            Err(e) => {
                self.status_tx.send_replace(ConnectionStatus::Idle);
                return Err(TransportError::SendFailed(e.to_string()).into());
            }
        };
        if let Err(e) = send_result {
            self.status_tx.send_replace(ConnectionStatus::Idle);
            return Err(TransportError::SendFailed(e.to_string()).into());
        }

        if let Err(e) = self.await_confirmation(&mut stream).await {
            self.status_tx.send_replace(ConnectionStatus::Idle);
            return Err(e);
        }

        // Join confirmed; now acquire the playback sink
        let sink_out = match ScheduledOutput::open(self.audio.sample_rate) {
            Ok(sink_out) => sink_out,
            Err(e) => {
                self.status_tx.send_replace(ConnectionStatus::Idle);
                return Err(e.into());
            }
        };
        let mut scheduler = FrameScheduler::new(self.audio.sample_rate, self.audio.lookahead());

        let status_tx = self.status_tx.clone();
        let events_tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            // Keep the write half alive for the duration of the session
            let _sink = sink;
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    WsMessage::Binary(bytes) => match decode_samples(&bytes) {
                        Ok(samples) => {
                            let now = sink_out.position();
                            if let Some(at) = scheduler.schedule(samples.len(), now) {
                                sink_out.schedule_at(PcmChunk::new(samples), at);
                            }
                        }
                        Err(e) => debug!("Dropping bad frame: {}", e),
                    },
                    WsMessage::Text(text) => match serde_json::from_str(&text) {
                        Ok(message) => {
                            if let Some(event) = session_event(&message) {
                                let _ = events_tx.send(event);
                            }
                            if is_terminal(&message) {
                                // Frames already handed to the sink are
                                // left to play out
                                scheduler.stop();
                                status_tx.send_replace(ConnectionStatus::Idle);
                                break;
                            }
                        }
                        Err(e) => warn!("Bad server message: {}", e),
                    },
                    WsMessage::Close(_) => {
                        scheduler.stop();
                        status_tx.send_replace(ConnectionStatus::Idle);
                        break;
                    }
                    _ => {}
                }
            }
            // Transport gone or session over either way
            status_tx.send_replace(ConnectionStatus::Idle);
        });

        *self.active.lock() = Some(ActiveListen {
            room_code: room_code.to_string(),
            task,
        });
        self.status_tx.send_replace(ConnectionStatus::Live);
        info!("Listening to room {}", room_code);
        Ok(())
    }

    async fn await_confirmation<S>(&self, stream: &mut S) -> Result<(), Error>
    where
        S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let deadline = tokio::time::timeout(JOIN_TIMEOUT, async {
            while let Some(Ok(message)) = stream.next().await {
                if let WsMessage::Text(text) = message {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::RoomJoined { .. }) => return Ok(()),
                        Ok(ServerMessage::Error { message }) => {
                            return Err(Error::Session(SessionError::Rejected(message)));
                        }
                        Ok(_) | Err(_) => {}
                    }
                }
            }
            Err(Error::Transport(TransportError::Closed))
        })
        .await;

        match deadline {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(TransportError::ConnectFailed(
                "timed out waiting for join confirmation".to_string(),
            ))),
        }
    }

    /// Leave the room and release the sink; idempotent
    pub fn leave(&self) {
        if let Some(active) = self.active.lock().take() {
            active.task.abort();
            info!("Left room {}", active.room_code);
        }
        self.status_tx.send_replace(ConnectionStatus::Idle);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.leave();
    }
}
