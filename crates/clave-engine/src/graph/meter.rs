//! Level metering and the resonance proxy

use serde::{Deserialize, Serialize};

use crate::types::Sample;

/// Metering tunables
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Multiplier mapping bus RMS onto the 0..1 meter range. Typical
    /// program material sits well below full scale, so raw RMS is
    /// scaled up before clamping. A tuning parameter, not physics.
    pub level_scale: f32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self { level_scale: 3.0 }
    }
}

/// Root-mean-square amplitude of a block
pub fn rms(samples: &[Sample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Map a raw RMS level onto 0..1
pub fn normalized(rms: f32, config: &MeterConfig) -> f32 {
    (rms * config.level_scale).clamp(0.0, 1.0)
}

/// How closely the performer's energy tracks the backing track's
///
/// `1 - |music - mic|` over normalized levels: 1.0 when both move
/// together (including both silent), falling toward 0.0 as they
/// diverge. An explainable proxy for "playing along", not a loudness
/// model.
pub fn resonance(music_rms: f32, mic_rms: f32, config: &MeterConfig) -> f32 {
    1.0 - (normalized(music_rms, config) - normalized(mic_rms, config)).abs()
}

/// Point-in-time bus levels, already normalized
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelLevels {
    pub music: f32,
    pub mic: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_known_signals() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 64]), 0.0);
        // Full-scale square wave
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-6);
        // Sine RMS is amplitude over sqrt(2)
        let sine: Vec<f32> = (0..4410)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 100.0 / 44_100.0).sin())
            .collect();
        assert!((rms(&sine) - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);
    }

    #[test]
    fn test_normalization_clamps() {
        let config = MeterConfig::default();
        assert_eq!(normalized(0.0, &config), 0.0);
        assert_eq!(normalized(10.0, &config), 1.0);
        assert!(normalized(0.1, &config) > 0.0 && normalized(0.1, &config) < 1.0);
    }

    #[test]
    fn test_resonance_tracks_level_agreement() {
        let config = MeterConfig::default();
        // Both silent: trivially together
        assert_eq!(resonance(0.0, 0.0, &config), 1.0);
        // Matched levels
        assert!((resonance(0.2, 0.2, &config) - 1.0).abs() < 1e-6);
        // Music playing, performer silent
        assert!(resonance(0.5, 0.0, &config) < 0.1);
        // Partial agreement sits in between
        let partial = resonance(0.2, 0.1, &config);
        assert!(partial > 0.5 && partial < 1.0);
    }
}
