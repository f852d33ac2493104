//! Wire protocol
//!
//! One bidirectional WebSocket per participant. Text messages are tagged
//! JSON variants validated at the deserialization boundary; binary messages
//! carry raw PCM frames (see [`frame`]). No message carries a sequence
//! number, protocol version, or authentication token.

pub mod frame;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use frame::{decode_samples, encode_samples, FrameEnvelope};

/// Ephemeral identifier bound to one transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Host-mutated playback control, as sent in `sync-state`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackControl {
    pub is_playing: bool,
    /// Playback position in seconds
    pub position: f64,
}

/// Authoritative per-room playback state, replaced wholesale on each
/// accepted `sync-state`. Not versioned; last write wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub is_playing: bool,
    pub position: f64,
    pub updated_at: DateTime<Utc>,
}

impl PlaybackState {
    /// Stamp a control update into a fresh authoritative state
    pub fn from_control(control: PlaybackControl) -> Self {
        Self {
            is_playing: control.is_playing,
            position: control.position,
            updated_at: Utc::now(),
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            position: 0.0,
            updated_at: Utc::now(),
        }
    }
}

/// Messages sent from client to server over WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CreateRoom { room_code: String },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_code: String },
    #[serde(rename_all = "camelCase")]
    SyncState {
        room_code: String,
        state: PlaybackControl,
    },
}

/// Messages sent from server to client over WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_code: String },
    /// Current occupancy including the host
    RoomCountUpdate { count: usize },
    #[serde(rename_all = "camelCase")]
    ParticipantJoined { connection_id: ConnectionId },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { connection_id: ConnectionId },
    /// Host left; the session is gone
    RoomClosed,
    StateUpdate { state: PlaybackState },
    Error { message: String },
}
