//! Endpoint-side session supervision
//!
//! The broadcaster and listener each own their transport connection and
//! expose the same two surfaces to the (out-of-scope) UI layer: a watchable
//! connection status and a multi-subscriber event channel. Every failure
//! path lands back on `Idle`; nothing retries.

pub mod broadcaster;
pub mod listener;

pub use broadcaster::Broadcaster;
pub use listener::Listener;

use crate::protocol::{ConnectionId, PlaybackState, ServerMessage};

/// Connection lifecycle as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Live,
}

/// Session events surfaced to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Occupancy including the host
    RoomCount(usize),
    StateUpdate(PlaybackState),
    ParticipantJoined(ConnectionId),
    ParticipantLeft(ConnectionId),
    /// The host left; the session is gone
    RoomClosed,
    /// Request-level failure reported by the server
    Error(String),
}

/// Map a server message onto the subscriber event surface
pub(crate) fn session_event(message: &ServerMessage) -> Option<SessionEvent> {
    match message {
        ServerMessage::RoomJoined { .. } => None,
        ServerMessage::RoomCountUpdate { count } => Some(SessionEvent::RoomCount(*count)),
        ServerMessage::ParticipantJoined { connection_id } => {
            Some(SessionEvent::ParticipantJoined(*connection_id))
        }
        ServerMessage::ParticipantLeft { connection_id } => {
            Some(SessionEvent::ParticipantLeft(*connection_id))
        }
        ServerMessage::RoomClosed => Some(SessionEvent::RoomClosed),
        ServerMessage::StateUpdate { state } => Some(SessionEvent::StateUpdate(*state)),
        ServerMessage::Error { message } => Some(SessionEvent::Error(message.clone())),
    }
}

/// Whether a message ends the session for this endpoint
pub(crate) fn is_terminal(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::RoomClosed | ServerMessage::Error { .. }
    )
}
