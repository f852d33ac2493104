//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod scheduler;

pub use buffer::{ChunkAccumulator, PcmChunk, RingBuffer};
pub use capture::AudioCapture;
pub use device::{default_input, default_output, list_devices, AudioDevice};
pub use playback::ScheduledOutput;
pub use scheduler::FrameScheduler;
