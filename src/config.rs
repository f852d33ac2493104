//! Application configuration
//!
//! Loaded from an optional TOML file in the platform config directory,
//! with the server port overridable through the `PORT` environment
//! variable.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::Error;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
}

/// Server bind settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Audio format settings shared by both endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per broadcast frame
    pub chunk_samples: usize,
    /// Scheduling lookahead in milliseconds
    pub lookahead_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            chunk_samples: CHUNK_SAMPLES,
            lookahead_ms: LOOKAHEAD.as_millis() as u64,
        }
    }
}

impl AudioConfig {
    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.lookahead_ms)
    }

    /// Duration of one broadcast frame
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_samples as f64 / self.sample_rate as f64)
    }
}

/// Transport limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Ceiling for a single inbound frame in bytes
    pub max_frame_bytes: usize,
    /// Per-connection outbound queue capacity
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
            outbound_queue: OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Load configuration: file if present, defaults otherwise,
    /// then environment overrides.
    pub fn load() -> Result<Self, Error> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)?;
                toml::from_str(&contents)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Platform config file location (`<config dir>/roomcast/config.toml`)
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "roomcast")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply environment variable overrides (`PORT`)
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }
    }

    /// Socket address the server binds to
    pub fn bind_addr(&self) -> Result<SocketAddr, Error> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {}", e)))
    }
}
