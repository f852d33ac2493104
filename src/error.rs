//! Error types for the broadcasting application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Room and membership errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Room code already in use")]
    RoomCodeInUse,

    /// A request-level failure reported by the server, e.g. a rejected join.
    #[error("{0}")]
    Rejected(String),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Playback unavailable: {0}")]
    PlaybackUnavailable(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),
}

/// Transport connection errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed")]
    Closed,
}

/// Wire format errors, raised at the deserialization boundary
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
