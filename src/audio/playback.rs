//! Scheduled audio output
//!
//! The sink side of the playback pipeline: chunks are queued at absolute
//! sample positions, the cpal output callback advances a sample clock and
//! fills whatever is due, emitting silence for gaps. There is no
//! cancellation; a queued chunk always plays out (or ages past the clock
//! and is skipped as late).

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::PcmChunk;
use crate::audio::device::default_output;
use crate::error::AudioError;

/// A chunk pinned to an absolute position on the output timeline
#[derive(Debug, PartialEq)]
struct Scheduled {
    start_sample: u64,
    samples: Vec<f32>,
}

impl Eq for Scheduled {}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start_sample
            .cmp(&other.start_sample)
            .then(self.samples.len().cmp(&other.samples.len()))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// State shared with the output callback
struct Timeline {
    /// Samples played since the stream opened
    clock: AtomicU64,
    queue: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    late_drops: AtomicUsize,
}

/// Copy due chunks into an interleaved output buffer starting at clock
/// position `start`, leaving silence where nothing is scheduled. Returns
/// the number of chunks dropped for arriving entirely in the past.
fn fill_output(
    queue: &mut BinaryHeap<Reverse<Scheduled>>,
    start: u64,
    out: &mut [f32],
    channels: usize,
) -> usize {
    out.fill(0.0);
    let frames = out.len() / channels;
    let end = start + frames as u64;
    let mut late = 0;

    while let Some(Reverse(top)) = queue.peek() {
        if top.start_sample >= end {
            break;
        }
        let Some(Reverse(mut chunk)) = queue.pop() else {
            break;
        };
        let chunk_end = chunk.start_sample + chunk.samples.len() as u64;
        if chunk_end <= start {
            late += 1;
            continue;
        }

        let from = start.max(chunk.start_sample);
        let until = end.min(chunk_end);
        let src_off = (from - chunk.start_sample) as usize;
        let dst_off = (from - start) as usize;
        let count = (until - from) as usize;

        for i in 0..count {
            let sample = chunk.samples[src_off + i];
            let base = (dst_off + i) * channels;
            for ch in 0..channels {
                out[base + ch] = sample;
            }
        }

        if chunk_end > end {
            // Remainder continues in the next callback window
            chunk.samples.drain(..src_off + count);
            chunk.start_sample = end;
            queue.push(Reverse(chunk));
        }
    }

    late
}

/// Playback sink bound to the default output device
pub struct ScheduledOutput {
    shared: Arc<Timeline>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    sample_rate: u32,
}

impl ScheduledOutput {
    /// Open the default output device and start the stream
    pub fn open(sample_rate: u32) -> Result<Self, AudioError> {
        let device = default_output()?;
        let device_channels = device.default_output_config()?.channels();

        let shared = Arc::new(Timeline {
            clock: AtomicU64::new(0),
            queue: Mutex::new(BinaryHeap::new()),
            late_drops: AtomicUsize::new(0),
        });

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let running = Arc::new(AtomicBool::new(true));

        let stream_config = StreamConfig {
            channels: device_channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared_for_callback = shared.clone();
        let running_for_loop = running.clone();
        let channels = device_channels as usize;
        let error_tx_build = error_tx.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let timeline = &shared_for_callback;
                        let start = timeline.clock.load(Ordering::Relaxed);
                        let late = {
                            let mut queue = timeline.queue.lock();
                            fill_output(&mut queue, start, data, channels)
                        };
                        if late > 0 {
                            timeline.late_drops.fetch_add(late, Ordering::Relaxed);
                        }
                        let frames = (data.len() / channels) as u64;
                        timeline.clock.store(start + frames, Ordering::Relaxed);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = error_tx_build
                                .try_send(AudioError::StreamError(e.to_string()));
                            return;
                        }

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        let _ = error_tx_build
                            .try_send(AudioError::PlaybackUnavailable(e.to_string()));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            shared,
            running,
            thread_handle: Some(handle),
            error_rx: Some(error_rx),
            sample_rate,
        })
    }

    /// Current clock position, the scheduler's `now`
    pub fn position(&self) -> Duration {
        let samples = self.shared.clock.load(Ordering::Relaxed);
        Duration::from_secs_f64(samples as f64 / self.sample_rate as f64)
    }

    /// Queue a chunk to begin playing at `at` on the output timeline
    pub fn schedule_at(&self, chunk: PcmChunk, at: Duration) {
        if chunk.is_empty() {
            return;
        }
        let start_sample = (at.as_secs_f64() * self.sample_rate as f64).round() as u64;
        let mut queue = self.shared.queue.lock();
        queue.push(Reverse(Scheduled {
            start_sample,
            samples: chunk.samples,
        }));
    }

    /// Chunks skipped for arriving entirely behind the clock
    pub fn late_drops(&self) -> usize {
        self.shared.late_drops.load(Ordering::Relaxed)
    }

    /// Latest stream error raised inside the callback, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    /// Stop the stream; idempotent
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ScheduledOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(chunks: Vec<(u64, Vec<f32>)>) -> BinaryHeap<Reverse<Scheduled>> {
        chunks
            .into_iter()
            .map(|(start_sample, samples)| {
                Reverse(Scheduled {
                    start_sample,
                    samples,
                })
            })
            .collect()
    }

    #[test]
    fn test_fill_silence_when_empty() {
        let mut queue = BinaryHeap::new();
        let mut out = vec![1.0f32; 8];
        let late = fill_output(&mut queue, 0, &mut out, 1);
        assert_eq!(late, 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fill_places_chunk_at_offset() {
        let mut queue = queue_of(vec![(4, vec![0.5; 2])]);
        let mut out = vec![0.0f32; 8];
        fill_output(&mut queue, 0, &mut out, 1);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fill_carries_remainder_across_windows() {
        let mut queue = queue_of(vec![(6, vec![0.25; 6])]);

        let mut first = vec![0.0f32; 8];
        fill_output(&mut queue, 0, &mut first, 1);
        assert_eq!(&first[6..], &[0.25, 0.25]);

        let mut second = vec![0.0f32; 8];
        fill_output(&mut queue, 8, &mut second, 1);
        assert_eq!(&second[..4], &[0.25, 0.25, 0.25, 0.25]);
        assert!(second[4..].iter().all(|&s| s == 0.0));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fill_skips_fully_late_chunk() {
        let mut queue = queue_of(vec![(0, vec![0.5; 4])]);
        let mut out = vec![0.0f32; 4];
        let late = fill_output(&mut queue, 100, &mut out, 1);
        assert_eq!(late, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fill_plays_tail_of_partially_late_chunk() {
        let mut queue = queue_of(vec![(0, vec![0.5; 6])]);
        let mut out = vec![0.0f32; 4];
        let late = fill_output(&mut queue, 4, &mut out, 1);
        assert_eq!(late, 0);
        assert_eq!(out, vec![0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_interleaves_channels() {
        let mut queue = queue_of(vec![(0, vec![0.5, -0.5])]);
        let mut out = vec![0.0f32; 8];
        fill_output(&mut queue, 0, &mut out, 2);
        assert_eq!(&out[..4], &[0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_back_to_back_chunks_are_gapless() {
        let mut queue = queue_of(vec![(0, vec![0.1; 4]), (4, vec![0.2; 4])]);
        let mut out = vec![0.0f32; 8];
        fill_output(&mut queue, 0, &mut out, 1);
        assert_eq!(out, vec![0.1, 0.1, 0.1, 0.1, 0.2, 0.2, 0.2, 0.2]);
    }
}
