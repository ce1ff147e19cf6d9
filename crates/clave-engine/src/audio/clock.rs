//! Hardware-derived audio clock
//!
//! Time for the whole engine is counted in rendered frames, not wall
//! time. The render path advances the counter once per block, so the
//! clock freezes while the context is suspended and never drifts from
//! what the device actually played.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Frame-counting clock shared between the render path, the lookahead
/// sequencer, and anything that timestamps engine data.
///
/// All operations use `Ordering::Relaxed`: readers only need visibility,
/// not synchronization with other memory operations.
pub struct AudioClock {
    frames: AtomicU64,
    sample_rate: AtomicU32,
}

impl AudioClock {
    /// Create a clock at zero
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate: AtomicU32::new(sample_rate),
        }
    }

    /// Total frames rendered so far (lock-free)
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Current hardware time in seconds
    #[inline]
    pub fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate() as f64
    }

    /// Current hardware time in milliseconds
    #[inline]
    pub fn now_ms(&self) -> f64 {
        self.now() * 1000.0
    }

    /// Sample rate the clock is counting at
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Advance the clock by a rendered block (render path only)
    #[inline]
    pub(crate) fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Update the rate after device negotiation
    pub(crate) fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }
}
