//! Engine configuration.
//!
//! Serde-backed config structs with sensible defaults; the embedding
//! application can load overrides from TOML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Execution delegate preference for the landmark model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Delegate {
    /// GPU-accelerated inference where a device is available.
    #[default]
    Gpu,
    /// CPU-only inference.
    Cpu,
}

/// Camera acquisition configuration.
///
/// Requested dimensions are flexible constraints: the adapter accepts
/// whatever resolution the hardware grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Camera device index.
    pub device_index: u32,
    /// Requested frame width (closest match, never exact).
    pub requested_width: u32,
    /// Requested frame height.
    pub requested_height: u32,
    /// Requested frame rate (Hz).
    pub requested_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            requested_width: 1280,
            requested_height: 720,
            requested_fps: 30,
        }
    }
}

/// Landmark detector configuration. Created once per view lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Location of the face-mesh model asset (safetensors weights).
    pub model_asset: PathBuf,
    /// Execution delegate preference.
    pub delegate: Delegate,
    /// Emit blend-shape scores alongside landmarks.
    pub output_blendshapes: bool,
    /// Emit a per-pixel confidence mask alongside landmarks.
    pub output_mask: bool,
    /// Minimum face presence score to report a detection.
    pub min_confidence: f32,
    /// Temporal smoothing blend factor in (0, 1]; 1.0 disables smoothing.
    pub smoothing: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_asset: PathBuf::from("assets/face_mesh.safetensors"),
            delegate: Delegate::Gpu,
            output_blendshapes: false,
            output_mask: false,
            min_confidence: 0.5,
            smoothing: 0.6,
        }
    }
}

/// Cosmetic effect parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectConfig {
    /// Lip tint, straight-alpha RGBA.
    pub lip_color: [f32; 4],
    /// Mirror the preview horizontally (mirror-like selfie view).
    pub mirror: bool,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            lip_color: [0.78, 0.12, 0.20, 0.55],
            mirror: true,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    pub effect: EffectConfig,
}

impl EngineConfig {
    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.requested_width == 0 || self.capture.requested_height == 0 {
            return Err(ConfigError::Validation(
                "requested capture dimensions must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(ConfigError::Validation(
                "min_confidence must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.smoothing) || self.detector.smoothing == 0.0 {
            return Err(ConfigError::Validation(
                "smoothing must be in (0, 1]".into(),
            ));
        }
        for channel in self.effect.lip_color {
            if !(0.0..=1.0).contains(&channel) {
                return Err(ConfigError::Validation(
                    "lip_color channels must be in [0, 1]".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_capture_is_flexible_720p() {
        let config = CaptureConfig::default();
        assert_eq!(config.requested_width, 1280);
        assert_eq!(config.requested_height, 720);
        assert_eq!(config.requested_fps, 30);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.capture.requested_width, config.capture.requested_width);
        assert_eq!(parsed.effect.lip_color, config.effect.lip_color);
    }

    #[test]
    fn test_validation_rejects_bad_confidence() {
        let mut config = EngineConfig::default();
        config.detector.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_dimensions() {
        let mut config = EngineConfig::default();
        config.capture.requested_width = 0;
        assert!(config.validate().is_err());
    }
}
