//! Autocorrelation pitch estimation
//!
//! Estimates the fundamental of a mono window by finding the lag that
//! maximizes the signal's self-similarity, then snaps it to the nearest
//! semitone with a cents deviation. Every failure mode (silence, no
//! clear period, implausible frequency) is reported as `detected=false`,
//! never as an error or a wild guess.

use serde::{Deserialize, Serialize};

use crate::pitch::note;
use crate::types::Sample;

/// Tuning parameters for the detector
///
/// The defaults are the empirical values the product ships with; they
/// are plain numbers, not physics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Windows with RMS below this are treated as silence
    pub silence_rms: f32,
    /// Magnitude a sample must exceed to count as signal when trimming
    /// edge artifacts off the window
    pub trim_threshold: f32,
    /// Lowest frequency considered a plausible instrumental pitch
    pub min_frequency: f32,
    /// Highest frequency considered a plausible instrumental pitch
    pub max_frequency: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            silence_rms: 0.01,
            trim_threshold: 0.2,
            min_frequency: 50.0,
            max_frequency: 1000.0,
        }
    }
}

/// One pitch reading
///
/// When `detected` is false the numeric fields are zeroed and carry no
/// meaning beyond the timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchSample {
    pub frequency_hz: f32,
    /// Nearest note index (MIDI numbering, A4 = 69)
    pub note_index: i32,
    /// Deviation from the note center, clamped to [-50, 50]
    pub cents_offset: i32,
    pub detected: bool,
    pub timestamp_ms: f64,
}

impl PitchSample {
    pub fn undetected(timestamp_ms: f64) -> Self {
        Self {
            frequency_hz: 0.0,
            note_index: 0,
            cents_offset: 0,
            detected: false,
            timestamp_ms,
        }
    }
}

/// Stateless-per-call pitch estimator
///
/// The struct only exists to reuse scratch allocations between calls;
/// each `analyze` depends on nothing but the window it is given.
pub struct PitchDetector {
    sample_rate: f32,
    config: DetectorConfig,
    correlation: Vec<f32>,
}

impl PitchDetector {
    pub fn new(sample_rate: u32, config: DetectorConfig) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            config,
            correlation: Vec::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Analyze one window of time-domain samples
    pub fn analyze(&mut self, window: &[Sample], timestamp_ms: f64) -> PitchSample {
        let rms = crate::graph::meter::rms(window);
        if rms < self.config.silence_rms {
            return PitchSample::undetected(timestamp_ms);
        }

        // Trim to the span that actually carries signal; the quiet edges
        // of the window otherwise smear the correlation peaks.
        let thres = self.config.trim_threshold;
        let start = window.iter().position(|s| s.abs() > thres);
        let end = window.iter().rposition(|s| s.abs() > thres);
        let trimmed = match (start, end) {
            (Some(a), Some(b)) if b > a + 1 => &window[a..=b],
            _ => window,
        };

        let size = trimmed.len();
        self.correlation.clear();
        self.correlation.resize(size, 0.0);
        for lag in 0..size {
            let mut sum = 0.0;
            for j in 0..size - lag {
                sum += trimmed[j] * trimmed[j + lag];
            }
            self.correlation[lag] = sum;
        }

        let Some(lag) = best_lag(&self.correlation) else {
            return PitchSample::undetected(timestamp_ms);
        };

        let frequency_hz = self.sample_rate / lag;
        if frequency_hz < self.config.min_frequency || frequency_hz > self.config.max_frequency {
            return PitchSample::undetected(timestamp_ms);
        }

        let note_index = note::note_index_for(frequency_hz);
        let cents = note::cents_from(frequency_hz, note_index).clamp(-50.0, 50.0);

        PitchSample {
            frequency_hz,
            note_index,
            cents_offset: cents.round() as i32,
            detected: true,
            timestamp_ms,
        }
    }
}

/// Find the period as the argmax of the correlation past the zero-lag
/// peak, refined by parabolic interpolation around the maximum.
fn best_lag(correlation: &[f32]) -> Option<f32> {
    // Skip the monotonically decreasing run off the zero-lag peak
    let mut d = 0;
    while d + 1 < correlation.len() && correlation[d] > correlation[d + 1] {
        d += 1;
    }
    if d == 0 || d + 1 >= correlation.len() {
        return None;
    }

    let mut max_pos = d;
    let mut max_val = correlation[d];
    for (i, &v) in correlation.iter().enumerate().skip(d) {
        if v > max_val {
            max_val = v;
            max_pos = i;
        }
    }
    if max_pos == 0 || max_pos + 1 >= correlation.len() {
        return Some(max_pos as f32);
    }

    // Parabolic fit through the peak and its neighbors
    let x1 = correlation[max_pos - 1];
    let x2 = correlation[max_pos];
    let x3 = correlation[max_pos + 1];
    let denom = 2.0 * (2.0 * x2 - x1 - x3);
    let shift = if denom.abs() > f32::EPSILON {
        (x3 - x1) / denom
    } else {
        0.0
    };
    Some(max_pos as f32 + shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ANALYSIS_WINDOW;

    fn sine(freq: f32, amplitude: f32, sample_rate: f32) -> Vec<Sample> {
        (0..ANALYSIS_WINDOW)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * freq / sample_rate).sin() * amplitude)
            .collect()
    }

    fn detector() -> PitchDetector {
        PitchDetector::new(44_100, DetectorConfig::default())
    }

    #[test]
    fn test_detects_a440() {
        let mut det = detector();
        let result = det.analyze(&sine(440.0, 0.5, 44_100.0), 0.0);

        assert!(result.detected);
        assert_eq!(result.note_index, 69);
        assert!((result.frequency_hz - 440.0).abs() < 3.0);
        assert!(result.cents_offset.abs() <= 6);
    }

    #[test]
    fn test_detects_middle_c() {
        let mut det = detector();
        let result = det.analyze(&sine(261.63, 0.4, 44_100.0), 0.0);

        assert!(result.detected);
        assert_eq!(result.note_index, 60);
    }

    #[test]
    fn test_low_string_within_a_semitone() {
        let mut det = detector();
        let result = det.analyze(&sine(82.41, 0.5, 44_100.0), 0.0);

        assert!(result.detected);
        assert!((result.note_index - 40).abs() <= 1);
    }

    #[test]
    fn test_silence_gate() {
        let mut det = detector();
        assert!(!det.analyze(&vec![0.0; ANALYSIS_WINDOW], 5.0).detected);
        // Spectral content below the RMS gate still counts as silence
        assert!(!det.analyze(&sine(440.0, 0.005, 44_100.0), 5.0).detected);
    }

    #[test]
    fn test_implausible_frequencies_rejected() {
        let mut det = detector();
        // Above the plausible range
        assert!(!det.analyze(&sine(1500.0, 0.5, 44_100.0), 0.0).detected);
    }

    #[test]
    fn test_cents_shrink_toward_note_center() {
        let mut det = detector();
        let near = det.analyze(&sine(441.0, 0.5, 44_100.0), 0.0);
        let far = det.analyze(&sine(450.0, 0.5, 44_100.0), 0.0);

        assert!(near.detected && far.detected);
        assert_eq!(near.note_index, 69);
        assert_eq!(far.note_index, 69);
        assert!(near.cents_offset.abs() < far.cents_offset.abs());
    }

    #[test]
    fn test_undetected_sample_is_inert() {
        let s = PitchSample::undetected(123.0);
        assert!(!s.detected);
        assert_eq!(s.frequency_hz, 0.0);
        assert_eq!(s.timestamp_ms, 123.0);
    }
}
