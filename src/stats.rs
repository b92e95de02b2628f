use std::fmt;
use std::sync::{Arc, Mutex};

use crate::processors::Stage;

/// Translation failure rate at which a stream is reported degraded.
const DEGRADED_FAILURE_RATE: f64 = 0.05;
/// Translation failure rate at which a stream is reported in error.
const ERROR_FAILURE_RATE: f64 = 0.15;

#[derive(Clone, Debug, Default)]
pub struct StageStats {
    pub samples: u64,
    pub total_ns: u128,
    pub max_ns: u64,
}

impl StageStats {
    pub fn record(&mut self, duration_ns: u64) {
        self.samples += 1;
        self.total_ns += duration_ns as u128;
        self.max_ns = self.max_ns.max(duration_ns);
    }

    pub fn avg_ns(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_ns as f64 / self.samples as f64
        }
    }

    fn avg_ms(&self) -> f64 {
        self.avg_ns() / 1_000_000.0
    }

    fn max_ms(&self) -> f64 {
        self.max_ns as f64 / 1_000_000.0
    }
}

/// Adaptive echo filter health, published after every `cancel_echo`.
#[derive(Clone, Debug, Default)]
pub struct EchoHealthStats {
    pub weight_norm: f32,
    pub peak_weight_norm: f32,
    pub divergence_events: u64,
    pub diverged: bool,
    pub samples_adapted: u64,
    pub double_talk_frames: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Ok,
    Degraded,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Error => "error",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub utterances_in: u64,
    pub utterances_gated: u64,
    pub utterances_translated: u64,
    pub translation_failures: u64,
    pub speaker_frames_out: u64,
    pub engine_resets: u64,

    pub worker_batches_in: u64,
    pub worker_batches_delivered: u64,
    pub processing_errors: u64,
    pub sink_errors: u64,
    pub streams_opened: u64,
    pub streams_closed: u64,
    pub streams_reset: u64,

    pub beamforming: StageStats,
    pub echo_cancellation: StageStats,
    pub noise_suppression: StageStats,
    pub vad: StageStats,
    pub translation: StageStats,
    pub projection: StageStats,
    pub total_utterance: StageStats,

    pub echo: EchoHealthStats,
}

impl RuntimeStats {
    pub fn stage(&self, stage: Stage) -> &StageStats {
        match stage {
            Stage::Beamforming => &self.beamforming,
            Stage::EchoCancellation => &self.echo_cancellation,
            Stage::NoiseSuppression => &self.noise_suppression,
            Stage::VoiceActivity => &self.vad,
            Stage::Translation => &self.translation,
            Stage::Projection => &self.projection,
            Stage::Total => &self.total_utterance,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageStats {
        match stage {
            Stage::Beamforming => &mut self.beamforming,
            Stage::EchoCancellation => &mut self.echo_cancellation,
            Stage::NoiseSuppression => &mut self.noise_suppression,
            Stage::VoiceActivity => &mut self.vad,
            Stage::Translation => &mut self.translation,
            Stage::Projection => &mut self.projection,
            Stage::Total => &mut self.total_utterance,
        }
    }

    /// Fraction of translation attempts that failed.
    pub fn translation_failure_rate(&self) -> f64 {
        let attempts = self.utterances_translated + self.translation_failures;
        if attempts == 0 {
            0.0
        } else {
            self.translation_failures as f64 / attempts as f64
        }
    }

    pub fn health(&self) -> HealthStatus {
        if self.utterances_in == 0 {
            return HealthStatus::Unknown;
        }
        let failure_rate = self.translation_failure_rate();
        if failure_rate >= ERROR_FAILURE_RATE {
            HealthStatus::Error
        } else if failure_rate >= DEGRADED_FAILURE_RATE || self.echo.diverged {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        }
    }
}

#[derive(Clone)]
pub struct RuntimeStatsHandle {
    inner: Arc<Mutex<RuntimeStats>>,
}

impl Default for RuntimeStatsHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeStatsHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RuntimeStats::default())),
        }
    }

    pub fn reset(&self) {
        if let Ok(mut stats) = self.inner.lock() {
            *stats = RuntimeStats::default();
        }
    }

    pub fn update<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut RuntimeStats),
    {
        if let Ok(mut stats) = self.inner.lock() {
            update_fn(&mut stats);
        }
    }

    pub fn record_stage(&self, stage: Stage, duration_ns: u64) {
        self.update(|s| s.stage_mut(stage).record(duration_ns));
    }

    pub fn snapshot(&self) -> RuntimeStats {
        if let Ok(stats) = self.inner.lock() {
            stats.clone()
        } else {
            RuntimeStats::default()
        }
    }
}

/// Flattened millisecond view of [`RuntimeStats`].
#[cfg_attr(feature = "python", pyo3::pyclass(get_all, frozen))]
#[derive(Clone, Debug)]
pub struct PipelineStats {
    pub health: String,
    pub utterances_in: u64,
    pub utterances_gated: u64,
    pub utterances_translated: u64,
    pub translation_failures: u64,
    pub speaker_frames_out: u64,
    pub engine_resets: u64,
    pub worker_batches_in: u64,
    pub worker_batches_delivered: u64,
    pub processing_errors: u64,
    pub sink_errors: u64,

    pub beamforming_avg_ms: f64,
    pub beamforming_max_ms: f64,
    pub echo_cancellation_avg_ms: f64,
    pub echo_cancellation_max_ms: f64,
    pub noise_suppression_avg_ms: f64,
    pub noise_suppression_max_ms: f64,
    pub vad_avg_ms: f64,
    pub vad_max_ms: f64,
    pub translation_avg_ms: f64,
    pub translation_max_ms: f64,
    pub projection_avg_ms: f64,
    pub projection_max_ms: f64,
    pub total_utterance_avg_ms: f64,
    pub total_utterance_max_ms: f64,

    pub echo_weight_norm: f32,
    pub echo_peak_weight_norm: f32,
    pub echo_divergence_events: u64,
    pub echo_diverged: bool,
    pub echo_samples_adapted: u64,
    pub double_talk_frames: u64,
}

impl PipelineStats {
    pub fn from_runtime(s: RuntimeStats) -> Self {
        Self {
            health: s.health().to_string(),
            utterances_in: s.utterances_in,
            utterances_gated: s.utterances_gated,
            utterances_translated: s.utterances_translated,
            translation_failures: s.translation_failures,
            speaker_frames_out: s.speaker_frames_out,
            engine_resets: s.engine_resets,
            worker_batches_in: s.worker_batches_in,
            worker_batches_delivered: s.worker_batches_delivered,
            processing_errors: s.processing_errors,
            sink_errors: s.sink_errors,

            beamforming_avg_ms: s.beamforming.avg_ms(),
            beamforming_max_ms: s.beamforming.max_ms(),
            echo_cancellation_avg_ms: s.echo_cancellation.avg_ms(),
            echo_cancellation_max_ms: s.echo_cancellation.max_ms(),
            noise_suppression_avg_ms: s.noise_suppression.avg_ms(),
            noise_suppression_max_ms: s.noise_suppression.max_ms(),
            vad_avg_ms: s.vad.avg_ms(),
            vad_max_ms: s.vad.max_ms(),
            translation_avg_ms: s.translation.avg_ms(),
            translation_max_ms: s.translation.max_ms(),
            projection_avg_ms: s.projection.avg_ms(),
            projection_max_ms: s.projection.max_ms(),
            total_utterance_avg_ms: s.total_utterance.avg_ms(),
            total_utterance_max_ms: s.total_utterance.max_ms(),

            echo_weight_norm: s.echo.weight_norm,
            echo_peak_weight_norm: s.echo.peak_weight_norm,
            echo_divergence_events: s.echo.divergence_events,
            echo_diverged: s.echo.diverged,
            echo_samples_adapted: s.echo.samples_adapted,
            double_talk_frames: s.echo.double_talk_frames,
        }
    }
}
