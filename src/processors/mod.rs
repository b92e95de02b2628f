use std::fmt;

// Sub-modules
pub mod aec;
pub mod beamforming;
pub mod noise_suppression;
pub mod projection;
pub mod resample;
pub mod vad;

// Re-exports
pub use aec::{EchoCancellationEngine, EchoDiagnostics};
pub use beamforming::BeamformingEngine;
pub use noise_suppression::NoiseSuppressionEngine;
pub use projection::DirectionalProjector;
pub use resample::RateConverter;
pub use vad::{VadResult, VadState, VoiceActivityDetector};

/// Pipeline stages of one utterance, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Beamforming,
    EchoCancellation,
    NoiseSuppression,
    VoiceActivity,
    Translation,
    Projection,
    /// Whole utterance, capture to speaker frames.
    Total,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Beamforming,
        Stage::EchoCancellation,
        Stage::NoiseSuppression,
        Stage::VoiceActivity,
        Stage::Translation,
        Stage::Projection,
        Stage::Total,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Beamforming => "beamforming",
            Stage::EchoCancellation => "echo_cancellation",
            Stage::NoiseSuppression => "noise_suppression",
            Stage::VoiceActivity => "vad",
            Stage::Translation => "translation",
            Stage::Projection => "projection",
            Stage::Total => "total",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_unique() {
        let mut names: Vec<_> = Stage::ALL.iter().map(Stage::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Stage::ALL.len());
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(Stage::EchoCancellation.to_string(), "echo_cancellation");
    }
}
