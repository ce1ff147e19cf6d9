//! Engine configuration
//!
//! One YAML file holds everything the apps can tune: tempo defaults,
//! timbre, channel gains, and the detector/meter/scoring parameters.
//! Loading is forgiving (missing or unparseable files fall back to
//! defaults with a warning); saving creates parent directories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::graph::MeterConfig;
use crate::graph::ScoringConfig;
use crate::pitch::DetectorConfig;
use crate::sequence::{Subdivision, Timbre, DEFAULT_BPM};

/// Default per-channel gains
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    pub master: f32,
    pub music: f32,
    pub microphone: f32,
    pub metronome: f32,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            master: 1.0,
            music: 0.8,
            microphone: 1.0,
            metronome: 0.7,
        }
    }
}

/// Everything the engine reads at construction time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bpm: f64,
    pub subdivision: Subdivision,
    pub timbre: Timbre,
    pub gains: GainConfig,
    pub detector: DetectorConfig,
    pub meter: MeterConfig,
    pub scoring: ScoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            subdivision: Subdivision::default(),
            timbre: Timbre::default(),
            gains: GainConfig::default(),
            detector: DetectorConfig::default(),
            meter: MeterConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

/// Default location of the engine config file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clave")
        .join("engine.yaml")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns default config. If the file
/// exists but is invalid, logs a warning and returns default config.
pub fn load_config(path: &Path) -> EngineConfig {
    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return EngineConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<EngineConfig>(&contents) {
            Ok(config) => {
                log::info!("load_config: Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                EngineConfig::default()
            }
        },
        Err(e) => {
            log::warn!(
                "load_config: Failed to read config file: {}, using defaults",
                e
            );
            EngineConfig::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {:?}", parent))?;
    }

    let contents = serde_yaml::to_string(config).context("serializing config")?;
    std::fs::write(path, contents).with_context(|| format!("writing config to {:?}", path))?;
    log::info!("save_config: Saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.bpm, DEFAULT_BPM);
        assert_eq!(config.subdivision, Subdivision::Quarter);
        assert!(config.gains.master > 0.0 && config.gains.master <= 1.0);
        assert_eq!(config.detector.min_frequency, 50.0);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = EngineConfig::default();
        config.bpm = 96.0;
        config.timbre = Timbre::Wood;
        config.gains.metronome = 0.4;

        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: EngineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.bpm, 96.0);
        assert_eq!(back.timbre, Timbre::Wood);
        assert_eq!(back.gains.metronome, 0.4);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let back: EngineConfig = serde_yaml::from_str("bpm: 72.0\n").unwrap();
        assert_eq!(back.bpm, 72.0);
        assert_eq!(back.gains.music, GainConfig::default().music);
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let config = load_config(Path::new("/nonexistent/clave/engine.yaml"));
        assert_eq!(config.bpm, DEFAULT_BPM);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join("clave-engine-test")
            .join("engine.yaml");
        let mut config = EngineConfig::default();
        config.bpm = 132.0;

        save_config(&config, &path).unwrap();
        let back = load_config(&path);
        assert_eq!(back.bpm, 132.0);

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
