//! Common types for the Clave audio engine
//!
//! Fundamental audio types shared across the engine: the mono buffer
//! used on every bus, stem identifiers, and engine-wide constants.

/// Default sample rate assumed by the engine (44.1kHz)
/// This is the preferred rate; the actual rate is negotiated with the
/// device at stream creation and published through the audio clock.
pub const SAMPLE_RATE: u32 = 44_100;

/// Size of the rolling microphone analysis window, in samples
pub const ANALYSIS_WINDOW: usize = 2048;

/// Number of stem channels feeding the music bus
pub const NUM_STEMS: usize = 5;

/// Maximum render block size to pre-allocate for real-time safety
/// Covers all common device configurations (64 .. 4096 frames).
/// Pre-allocating to this size eliminates allocations in the audio callback.
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Audio sample type (32-bit float throughout the engine)
pub type Sample = f32;

/// Stem identifiers for the music bed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Stem {
    Vocals = 0,
    Drums = 1,
    Bass = 2,
    Other = 3,
    Backing = 4,
}

impl Stem {
    /// Get all stems in order
    pub const ALL: [Stem; NUM_STEMS] = [
        Stem::Vocals,
        Stem::Drums,
        Stem::Bass,
        Stem::Other,
        Stem::Backing,
    ];

    /// Convert from index (0-4) to Stem
    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Stem::Vocals),
            1 => Some(Stem::Drums),
            2 => Some(Stem::Bass),
            3 => Some(Stem::Other),
            4 => Some(Stem::Backing),
            _ => None,
        }
    }

    /// Get the name of this stem
    pub fn name(&self) -> &'static str {
        match self {
            Stem::Vocals => "Vocals",
            Stem::Drums => "Drums",
            Stem::Bass => "Bass",
            Stem::Other => "Other",
            Stem::Backing => "Backing",
        }
    }
}

/// A buffer of mono samples
///
/// The primary audio buffer type used throughout the engine. Every bus
/// is mono: the capture contract delivers mono PCM and the rendered
/// output is duplicated across device channels at the stream boundary.
#[derive(Debug, Clone)]
pub struct MonoBuffer {
    samples: Vec<Sample>,
}

impl MonoBuffer {
    /// Create a buffer filled with silence
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    /// Create a buffer from an existing Vec of samples
    pub fn from_vec(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Get the number of samples in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// Panics in debug builds if new_len > capacity. Use for pre-allocated
    /// buffers only. Newly exposed elements are silenced.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        let current_len = self.samples.len();
        if new_len > current_len {
            debug_assert!(
                new_len <= self.samples.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            self.samples.resize(new_len, 0.0);
        } else {
            self.samples.truncate(new_len);
        }
    }

    /// Fill the buffer with silence
    pub fn fill_silence(&mut self) {
        self.samples.fill(0.0);
    }

    /// Get a slice of the samples
    #[inline]
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Get a mutable slice of the samples
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// Append samples to the buffer
    pub fn extend_from_slice(&mut self, samples: &[Sample]) {
        self.samples.extend_from_slice(samples);
    }

    /// Scale all samples by a factor
    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    /// Get the peak amplitude in the buffer
    pub fn peak(&self) -> Sample {
        self.samples.iter().map(|s| s.abs()).fold(0.0, Sample::max)
    }

    /// Root-mean-square amplitude of the buffer
    pub fn rms(&self) -> Sample {
        crate::graph::meter::rms(&self.samples)
    }
}

impl Default for MonoBuffer {
    fn default() -> Self {
        Self { samples: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_enumeration() {
        assert_eq!(Stem::ALL.len(), NUM_STEMS);
        assert_eq!(Stem::Backing.name(), "Backing");
        assert_eq!(Stem::Drums as usize, 1);
        assert_eq!(Stem::from_index(4), Some(Stem::Backing));
        assert_eq!(Stem::from_index(5), None);
    }

    #[test]
    fn test_mono_buffer_length_management() {
        let mut buf = MonoBuffer::silence(MAX_BLOCK_FRAMES);
        buf.set_len_from_capacity(256);
        assert_eq!(buf.len(), 256);

        buf.as_mut_slice()[0] = 1.0;
        buf.set_len_from_capacity(512);
        assert_eq!(buf.len(), 512);
        // Old contents survive, new tail is silent
        assert_eq!(buf.as_slice()[0], 1.0);
        assert_eq!(buf.as_slice()[511], 0.0);
    }

    #[test]
    fn test_mono_buffer_peak_and_scale() {
        let mut buf = MonoBuffer::from_vec(vec![0.25, -0.5, 0.1]);
        assert_eq!(buf.peak(), 0.5);

        buf.scale(2.0);
        assert_eq!(buf.peak(), 1.0);
        assert_eq!(buf.as_slice()[0], 0.5);
    }
}
