//! Capture-side audio processing for a small microphone array feeding a
//! speech translator, with directional playback over a speaker array.
//!
//! Each utterance runs beamforming, echo cancellation, noise suppression and
//! voice activity gating before translation; translated audio is projected
//! back toward the talker.

pub mod capture;
pub mod config;
pub mod delay_measurement;
pub mod error;
pub mod frame;
pub mod messages;
pub mod processors;
pub mod stats;
pub mod system;
pub mod translation;
pub mod wav;
pub mod worker;

#[cfg(all(not(test), feature = "python"))]
mod python;

pub use config::{ApmConfig, EchoConfig, VadConfig, SPEED_OF_SOUND};
pub use error::{ApmError, Result};
pub use frame::{AudioFrame, AudioMetadata};
pub use stats::{HealthStatus, PipelineStats, RuntimeStats, RuntimeStatsHandle};
pub use system::{ApmSystem, ProcessHandle};
pub use translation::{
    MockMode, MockTranslationEngine, TranslationEngine, TranslationError, TranslationRequest,
    TranslationResult,
};
pub use worker::{PlaybackSink, StreamWorker, WorkerHandle};
