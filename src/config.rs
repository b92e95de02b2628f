use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ApmError, Result};

/// Speed of sound used for every geometric delay, in m/s.
pub const SPEED_OF_SOUND: f32 = 343.0;

/// Normalized-LMS echo canceller settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Adaptive filter taps (reference delay line length).
    pub filter_length: usize,
    /// NLMS step size `mu`.
    pub step_size: f32,
    /// Weight-vector L2 norm above which the filter is reported as diverged.
    pub divergence_norm: f32,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            filter_length: 2048,
            step_size: 0.3,
            divergence_norm: 1.0e3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub threshold_db: f32,
    pub hangover_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold_db: -30.0,
            hangover_frames: 10,
        }
    }
}

/// Array geometry, language pair and engine tuning for one `ApmSystem`.
///
/// Immutable once handed to a system; `reset_all` is the only supported
/// mid-stream state change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApmConfig {
    pub num_microphones: usize,
    pub mic_spacing_m: f32,
    pub num_speakers: usize,
    pub speaker_spacing_m: f32,
    pub sample_rate: u32,
    pub source_language: String,
    pub target_language: String,
    pub projection_distance_m: f32,
    /// Convert translated audio back to the capture rate before projection.
    pub resample_translated_audio: bool,
    pub echo: EchoConfig,
    pub vad: VadConfig,
}

impl Default for ApmConfig {
    fn default() -> Self {
        Self {
            num_microphones: 4,
            mic_spacing_m: 0.012,
            num_speakers: 3,
            speaker_spacing_m: 0.015,
            sample_rate: 48_000,
            source_language: "en-US".to_string(),
            target_language: "es-ES".to_string(),
            projection_distance_m: 1.5,
            resample_translated_audio: true,
            echo: EchoConfig::default(),
            vad: VadConfig::default(),
        }
    }
}

impl ApmConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ApmConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_microphones == 0 {
            return invalid("num_microphones must be at least 1");
        }
        if self.num_speakers == 0 {
            return invalid("num_speakers must be at least 1");
        }
        if !self.mic_spacing_m.is_finite() || self.mic_spacing_m < 0.0 {
            return invalid(format!("mic_spacing_m {} is not a valid distance", self.mic_spacing_m));
        }
        if !self.speaker_spacing_m.is_finite() || self.speaker_spacing_m < 0.0 {
            return invalid(format!(
                "speaker_spacing_m {} is not a valid distance",
                self.speaker_spacing_m
            ));
        }
        if self.sample_rate == 0 {
            return invalid("sample_rate must be non-zero");
        }
        if !self.projection_distance_m.is_finite() || self.projection_distance_m < 0.0 {
            return invalid(format!(
                "projection_distance_m {} is not a valid distance",
                self.projection_distance_m
            ));
        }
        if self.source_language.trim().is_empty() || self.target_language.trim().is_empty() {
            return invalid("language tags must not be empty");
        }
        if self.echo.filter_length == 0 {
            return invalid("echo.filter_length must be at least 1");
        }
        if !(self.echo.step_size > 0.0 && self.echo.step_size < 2.0) {
            return invalid(format!("echo.step_size {} outside (0, 2)", self.echo.step_size));
        }
        if !(self.echo.divergence_norm > 0.0) {
            return invalid("echo.divergence_norm must be positive");
        }
        if !self.vad.threshold_db.is_finite() {
            return invalid("vad.threshold_db must be finite");
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> Result<()> {
    Err(ApmError::InvalidConfig(msg.into()))
}
