//! Audio capture from the default input device
//!
//! The cpal stream lives on a dedicated thread. Its callback downmixes to
//! mono, accumulates fixed-size chunks, and pushes them into a lock-free
//! ring buffer for the send loop to drain.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{ChunkAccumulator, SharedRingBuffer};
use crate::audio::device::default_input;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Capture instance bound to the default input device
pub struct AudioCapture {
    running: Arc<AtomicBool>,

    /// Destination for complete chunks
    output_buffer: SharedRingBuffer,

    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors raised inside the cpal callback
    error_rx: Option<Receiver<AudioError>>,

    samples_captured: Arc<AtomicU64>,

    config: AudioConfig,

    /// Channel count the device actually delivers
    device_channels: u16,
}

impl AudioCapture {
    /// Prepare capture on the default input device.
    ///
    /// Fails with `CaptureUnavailable` when no input device exists; the
    /// caller is responsible for rolling back any resources it acquired
    /// before this point.
    pub fn new(config: AudioConfig, output_buffer: SharedRingBuffer) -> Result<Self, AudioError> {
        let device = default_input()?;
        let device_channels = device.default_input_config()?.channels();

        Ok(Self {
            running: Arc::new(AtomicBool::new(false)),
            output_buffer,
            thread_handle: None,
            error_rx: None,
            samples_captured: Arc::new(AtomicU64::new(0)),
            config,
            device_channels,
        })
    }

    /// Start the capture stream
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = default_input()?;
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let stream_config = StreamConfig {
            channels: self.device_channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let output_buffer = self.output_buffer.clone();
        let samples_captured = self.samples_captured.clone();
        let channels = self.device_channels as usize;
        let chunk_samples = self.config.chunk_samples;
        let error_tx_build = error_tx.clone();

        self.samples_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let mut accumulator = ChunkAccumulator::new(chunk_samples);
                let mut mono = Vec::new();

                let stream = cpal_device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        // Downmix interleaved device channels to mono
                        mono.clear();
                        if channels == 1 {
                            mono.extend_from_slice(data);
                        } else {
                            mono.extend(data.chunks_exact(channels).map(|frame| {
                                frame.iter().sum::<f32>() / channels as f32
                            }));
                        }

                        samples_captured.fetch_add(mono.len() as u64, Ordering::Relaxed);

                        accumulator.push(&mono);
                        while let Some(chunk) = accumulator.next_chunk() {
                            // May fail on overflow when the send loop stalls
                            let _ = output_buffer.push(chunk);
                        }
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

                        // Keep thread alive while running
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }

                        // Stream is dropped here, stopping capture
                    }
                    Err(e) => {
                        let _ = error_tx_build
                            .try_send(AudioError::CaptureUnavailable(e.to_string()));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop capturing; idempotent
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    /// Latest stream error raised inside the callback, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;

    #[test]
    fn test_capture_creation() {
        // Only meaningful on machines with an input device; on CI the
        // expected failure is CaptureUnavailable.
        let buffer = create_shared_buffer(16);
        match AudioCapture::new(AudioConfig::default(), buffer) {
            Ok(capture) => assert!(!capture.is_running()),
            Err(e) => assert!(matches!(
                e,
                AudioError::CaptureUnavailable(_) | AudioError::StreamError(_)
            )),
        }
    }
}
