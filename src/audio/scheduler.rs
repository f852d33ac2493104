//! Gapless frame scheduling against a local audio clock
//!
//! Converts a sequence of discretely-arriving PCM frames into back-to-back,
//! monotonically-scheduled playback. Each frame starts either where the
//! previous one ends or one lookahead margin from now, whichever is later;
//! arrival jitter up to the margin is absorbed at the cost of the same
//! amount of added latency. The margin is static. Frames are assumed to
//! arrive in send order (the transport is a single TCP stream); a frame
//! arriving out of order would be scheduled as-is and produce an audible
//! artifact, not a protocol error.

use std::time::Duration;

/// Per-session playback scheduler state
pub struct FrameScheduler {
    /// End of the last scheduled frame, in the sink's clock domain
    next_start: Duration,
    lookahead: Duration,
    sample_rate: u32,
    stopped: bool,
    frames_scheduled: u64,
}

impl FrameScheduler {
    pub fn new(sample_rate: u32, lookahead: Duration) -> Self {
        Self {
            next_start: Duration::ZERO,
            lookahead,
            sample_rate,
            stopped: false,
            frames_scheduled: 0,
        }
    }

    /// Compute the start time for a frame of `frame_samples` mono samples
    /// arriving when the sink clock reads `now`.
    ///
    /// Returns `None` once the scheduler is stopped; frames already handed
    /// to the sink are unaffected and play out naturally.
    pub fn schedule(&mut self, frame_samples: usize, now: Duration) -> Option<Duration> {
        if self.stopped || frame_samples == 0 {
            return None;
        }

        let start = self.next_start.max(now + self.lookahead);
        let duration =
            Duration::from_secs_f64(frame_samples as f64 / self.sample_rate as f64);
        self.next_start = start + duration;
        self.frames_scheduled += 1;
        Some(start)
    }

    /// Stop issuing schedule calls (session teardown)
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn lookahead(&self) -> Duration {
        self.lookahead
    }

    /// Where the next frame would begin if it arrived with no waiting
    pub fn next_start(&self) -> Duration {
        self.next_start
    }

    pub fn frames_scheduled(&self) -> u64 {
        self.frames_scheduled
    }
}
