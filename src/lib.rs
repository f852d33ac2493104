//! # Roomcast
//!
//! Low-latency live audio broadcasting over WebSocket, coordinated through
//! short-lived, code-addressed rooms.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐
//! │         BROADCASTER          │
//! │  ┌─────────┐   ┌──────────┐  │
//! │  │ Capture │──▶│  Chunker │  │
//! │  └─────────┘   └────┬─────┘  │
//! │                     ▼        │
//! │        ┌────────────────────┐│
//! │        │ WebSocket (frames, ││
//! │        │ sync-state)        ││
//! │        └─────────┬──────────┘│
//! └──────────────────┼───────────┘
//!                    ▼
//! ┌──────────────────────────────┐
//! │            SERVER            │
//! │  ┌─────────────────────────┐ │
//! │  │ SessionRegistry (rooms) │ │
//! │  └───────────┬─────────────┘ │
//! │  ┌───────────▼─────────────┐ │
//! │  │ FrameRelay / StateSync  │ │
//! │  │ fan-out, drop-oldest    │ │
//! │  │ per-listener queues     │ │
//! │  └───────────┬─────────────┘ │
//! └──────────────┼───────────────┘
//!        ┌───────┴───────┐
//!        ▼               ▼
//! ┌──────────────┐ ┌──────────────┐
//! │  LISTENER 1  │ │  LISTENER N  │
//! │ ┌──────────┐ │ │ ┌──────────┐ │
//! │ │ Frame    │ │ │ │ Frame    │ │
//! │ │ Scheduler│ │ │ │ Scheduler│ │
//! │ └────┬─────┘ │ │ └────┬─────┘ │
//! │      ▼       │ │      ▼       │
//! │ ┌──────────┐ │ │ ┌──────────┐ │
//! │ │ Scheduled│ │ │ │ Scheduled│ │
//! │ │ Output   │ │ │ │ Output   │ │
//! │ └──────────┘ │ │ └──────────┘ │
//! └──────────────┘ └──────────────┘
//! ```
//!
//! The server keeps an in-memory table of rooms, each owned by exactly one
//! broadcasting host. Audio frames are raw PCM blocks fanned out unmodified
//! to every listener; delivery is best-effort at-most-once. Listeners absorb
//! arrival jitter with a fixed lookahead margin rather than a sequence-aware
//! jitter buffer: the WebSocket transport (TCP) already guarantees in-order
//! delivery per connection, so frames carry no sequence numbers.

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Sample rate shared by capture, transport and playback
    pub const SAMPLE_RATE: u32 = 44_100;

    /// Channel count (mono)
    pub const CHANNELS: u16 = 1;

    /// Samples per broadcast frame
    pub const CHUNK_SAMPLES: usize = 4_096;

    /// Scheduling lookahead absorbing arrival jitter
    pub const LOOKAHEAD: Duration = Duration::from_millis(50);

    /// Transport ceiling for a single audio frame
    pub const MAX_FRAME_BYTES: usize = 10_000_000;

    /// Default WebSocket server port (override with PORT)
    pub const DEFAULT_PORT: u16 = 3001;

    /// Per-connection outbound queue capacity (frames + control messages)
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

    /// Capture-side ring buffer capacity (in chunks)
    pub const RING_BUFFER_CAPACITY: usize = 64;
}
