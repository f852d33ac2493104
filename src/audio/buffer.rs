//! Sample buffers between the capture callback and the send loop
//!
//! The ring buffer is a lock-free SPSC queue sized for real-time use: the
//! capture callback pushes, the network loop pops, and neither side ever
//! blocks.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One block of mono f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    pub samples: Vec<f32>,
}

impl PcmChunk {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration at the given sample rate
    pub fn duration(&self, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / sample_rate as f64)
    }
}

/// Lock-free ring buffer of PCM chunks
pub struct RingBuffer {
    queue: ArrayQueue<PcmChunk>,
    overflow_count: AtomicUsize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a chunk; returns false on overflow (chunk discarded)
    pub fn push(&self, chunk: PcmChunk) -> bool {
        match self.queue.push(chunk) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn try_pop(&self) -> Option<PcmChunk> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

/// Accumulates arbitrarily-sized capture callbacks into fixed-size chunks
pub struct ChunkAccumulator {
    pending: Vec<f32>,
    chunk_samples: usize,
}

impl ChunkAccumulator {
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            pending: Vec::with_capacity(chunk_samples * 2),
            chunk_samples,
        }
    }

    /// Append samples from a capture callback
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    /// Drain the next complete chunk, if one is available
    pub fn next_chunk(&mut self) -> Option<PcmChunk> {
        if self.pending.len() < self.chunk_samples {
            return None;
        }
        let samples: Vec<f32> = self.pending.drain(..self.chunk_samples).collect();
        Some(PcmChunk::new(samples))
    }

    /// Samples waiting for a complete chunk
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
