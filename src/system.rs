use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ApmConfig;
use crate::error::{ApmError, Result};
use crate::frame::AudioFrame;
use crate::processors::{
    BeamformingEngine, DirectionalProjector, EchoCancellationEngine, NoiseSuppressionEngine,
    RateConverter, Stage, VoiceActivityDetector,
};
use crate::stats::RuntimeStatsHandle;
use crate::translation::{MockTranslationEngine, TranslationEngine, TranslationRequest};

/// Source texts kept as translation context per stream.
const CONTEXT_HISTORY_LEN: usize = 8;

/// Every stateful engine of one stream. Guarded as a unit so a whole
/// utterance sees a consistent adaptation state.
struct EngineSet {
    beamformer: BeamformingEngine,
    echo: EchoCancellationEngine,
    noise: NoiseSuppressionEngine,
    vad: VoiceActivityDetector,
    projector: DirectionalProjector,
    converter: Option<RateConverter>,
    context: VecDeque<String>,
}

impl EngineSet {
    fn new(config: &ApmConfig, stats: &RuntimeStatsHandle) -> Self {
        Self {
            beamformer: BeamformingEngine::from_config(config),
            echo: EchoCancellationEngine::new(&config.echo, stats.clone()),
            noise: NoiseSuppressionEngine::new(),
            vad: VoiceActivityDetector::new(&config.vad),
            projector: DirectionalProjector::from_config(config),
            converter: None,
            context: VecDeque::with_capacity(CONTEXT_HISTORY_LEN),
        }
    }

    /// Bring translated audio to `rate`, reusing the cached converter when the
    /// layout matches. Conversion failures keep the audio as delivered.
    fn match_rate(&mut self, audio: AudioFrame, rate: u32) -> AudioFrame {
        if audio.sample_rate() == rate || audio.is_empty() {
            return audio;
        }
        let reusable = self
            .converter
            .as_ref()
            .is_some_and(|c| c.accepts(&audio, rate));
        if !reusable {
            match RateConverter::new(audio.sample_rate(), rate, audio.channels()) {
                Ok(converter) => self.converter = Some(converter),
                Err(err) => {
                    warn!(%err, "keeping translated audio at its own rate");
                    return audio;
                }
            }
        }
        match self.converter.as_mut() {
            Some(converter) => converter.convert(&audio),
            None => audio,
        }
    }
}

fn elapsed_ns(start: Instant) -> u64 {
    start.elapsed().as_nanos().min(u64::MAX as u128) as u64
}

/// Full capture-to-speaker pipeline for one logical stream.
///
/// Clones share the same engines; calls on one engine set are serialized, so
/// at most one utterance is in flight per set. Independent streams need
/// independent systems.
#[derive(Clone)]
pub struct ApmSystem {
    config: Arc<ApmConfig>,
    engines: Arc<Mutex<EngineSet>>,
    translator: Arc<dyn TranslationEngine>,
    stats: RuntimeStatsHandle,
}

impl ApmSystem {
    /// System backed by the deterministic mock translator.
    pub fn new(config: ApmConfig) -> Result<Self> {
        Self::with_translator(config, Arc::new(MockTranslationEngine::default()))
    }

    pub fn with_translator(
        config: ApmConfig,
        translator: Arc<dyn TranslationEngine>,
    ) -> Result<Self> {
        Self::with_stats(config, translator, RuntimeStatsHandle::new())
    }

    /// Build a system that records into an existing stats handle.
    pub fn with_stats(
        config: ApmConfig,
        translator: Arc<dyn TranslationEngine>,
        stats: RuntimeStatsHandle,
    ) -> Result<Self> {
        config.validate()?;
        let engines = EngineSet::new(&config, &stats);
        debug!(
            microphones = config.num_microphones,
            speakers = config.num_speakers,
            translator = translator.name(),
            "apm system created"
        );

        Ok(Self {
            config: Arc::new(config),
            engines: Arc::new(Mutex::new(engines)),
            translator,
            stats,
        })
    }

    pub fn config(&self) -> &ApmConfig {
        &self.config
    }

    pub fn stats(&self) -> &RuntimeStatsHandle {
        &self.stats
    }

    pub fn translator_name(&self) -> &str {
        self.translator.name()
    }

    /// Spawn one utterance onto the current Tokio runtime.
    ///
    /// Stages run strictly in order; the only suspension point is the
    /// translation call. No cancellation is threaded through: impose timeouts
    /// around the returned handle.
    pub fn process_async(
        &self,
        mic_array: Vec<AudioFrame>,
        speaker_reference: AudioFrame,
        target_direction: f32,
    ) -> ProcessHandle {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                return ProcessHandle::failed(ApmError::Runtime(io::Error::other(
                    err.to_string(),
                )))
            }
        };

        let system = self.clone();
        let task = runtime.spawn(async move {
            system
                .run_utterance(mic_array, speaker_reference, target_direction)
                .await
        });
        ProcessHandle::spawned(task)
    }

    /// Blocking form of [`process_async`](Self::process_async). Must not be
    /// called from inside a Tokio runtime.
    pub fn process(
        &self,
        mic_array: Vec<AudioFrame>,
        speaker_reference: AudioFrame,
        target_direction: f32,
    ) -> Result<Vec<AudioFrame>> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ApmError::BlockingInAsyncContext);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ApmError::Runtime)?;
        runtime.block_on(async move {
            self.process_async(mic_array, speaker_reference, target_direction)
                .await
        })
    }

    /// Reset echo canceller, noise suppressor and VAD hangover. Geometry-only
    /// engines and the VAD threshold are kept.
    pub async fn reset_all(&self) {
        let mut engines = self.engines.lock().await;
        self.reset_engines(&mut engines);
    }

    pub fn reset_all_blocking(&self) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ApmError::BlockingInAsyncContext);
        }
        let mut engines = self.engines.blocking_lock();
        self.reset_engines(&mut engines);
        Ok(())
    }

    fn reset_engines(&self, engines: &mut EngineSet) {
        engines.echo.reset();
        engines.noise.reset_state();
        engines.vad.reset();
        engines.context.clear();
        self.stats.update(|s| s.engine_resets += 1);
        info!("engine state reset");
    }

    async fn run_utterance(
        &self,
        mic_array: Vec<AudioFrame>,
        speaker_reference: AudioFrame,
        target_direction: f32,
    ) -> Result<Vec<AudioFrame>> {
        let mut engines = self.engines.lock().await;
        let started = Instant::now();
        self.stats.update(|s| s.utterances_in += 1);

        let t = Instant::now();
        let beamformed = engines
            .beamformer
            .delay_and_sum(&mic_array, target_direction, 0.0);
        self.stats.record_stage(Stage::Beamforming, elapsed_ns(t));
        debug!(
            mics = mic_array.len(),
            frames = beamformed.frame_count(),
            rms_db = beamformed.metadata().rms_db,
            "beamformed"
        );

        if engines.echo.detect_double_talk(&beamformed, &speaker_reference) {
            self.stats.update(|s| s.echo.double_talk_frames += 1);
        }

        let t = Instant::now();
        let echo_cancelled = engines.echo.cancel_echo(&beamformed, &speaker_reference);
        self.stats.record_stage(Stage::EchoCancellation, elapsed_ns(t));
        debug!(rms_db = echo_cancelled.metadata().rms_db, "echo cancelled");

        let t = Instant::now();
        let mut denoised = engines.noise.suppress(&echo_cancelled);
        self.stats.record_stage(Stage::NoiseSuppression, elapsed_ns(t));

        let t = Instant::now();
        let vad = engines.vad.detect(&denoised);
        self.stats.record_stage(Stage::VoiceActivity, elapsed_ns(t));
        denoised.metadata_mut().snr_db = vad.snr_db;
        debug!(
            speech = vad.speech_detected,
            state = ?vad.state,
            energy_db = vad.energy_db,
            confidence = vad.confidence,
            "voice activity"
        );

        if !vad.speech_detected {
            self.stats.update(|s| {
                s.utterances_gated += 1;
                s.total_utterance.record(elapsed_ns(started));
            });
            return Ok(Vec::new());
        }

        let capture_rate = denoised.sample_rate();
        let request = TranslationRequest {
            audio: denoised,
            source_language: self.config.source_language.clone(),
            target_language: self.config.target_language.clone(),
            context_history: engines.context.iter().cloned().collect(),
        };

        let t = Instant::now();
        let result = match self.translator.translate(request).await {
            Ok(result) => result,
            Err(err) => {
                error!(translator = self.translator.name(), %err, "translation failed");
                self.stats.update(|s| {
                    s.translation_failures += 1;
                    s.total_utterance.record(elapsed_ns(started));
                });
                return Err(err.into());
            }
        };
        self.stats.record_stage(Stage::Translation, elapsed_ns(t));
        self.stats.update(|s| s.utterances_translated += 1);
        debug!(
            text = %result.translated_text,
            confidence = result.confidence,
            latency_ms = result.latency_ms,
            "translated"
        );

        if engines.context.len() == CONTEXT_HISTORY_LEN {
            engines.context.pop_front();
        }
        engines.context.push_back(result.source_text);

        let audio = if self.config.resample_translated_audio {
            engines.match_rate(result.translated_audio, capture_rate)
        } else {
            result.translated_audio
        };

        let t = Instant::now();
        let signals = engines.projector.create_projection_signals(
            &audio,
            target_direction,
            self.config.projection_distance_m,
        );
        self.stats.record_stage(Stage::Projection, elapsed_ns(t));
        self.stats.update(|s| {
            s.speaker_frames_out += signals.len() as u64;
            s.total_utterance.record(elapsed_ns(started));
        });

        Ok(signals)
    }
}

enum HandleState {
    Spawned(JoinHandle<Result<Vec<AudioFrame>>>),
    Failed(Option<ApmError>),
}

/// Pending result of [`ApmSystem::process_async`]; await it for the speaker
/// frames. Dropping the handle does not stop the utterance.
pub struct ProcessHandle {
    state: HandleState,
}

impl ProcessHandle {
    fn spawned(task: JoinHandle<Result<Vec<AudioFrame>>>) -> Self {
        Self {
            state: HandleState::Spawned(task),
        }
    }

    fn failed(err: ApmError) -> Self {
        Self {
            state: HandleState::Failed(Some(err)),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Spawned(task) => task.is_finished(),
            HandleState::Failed(_) => true,
        }
    }
}

impl Future for ProcessHandle {
    type Output = Result<Vec<AudioFrame>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Spawned(task) => match Pin::new(task).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(err)) => Poll::Ready(Err(ApmError::TaskJoin(err.to_string()))),
                Poll::Pending => Poll::Pending,
            },
            HandleState::Failed(err) => Poll::Ready(Err(err.take().unwrap_or_else(|| {
                ApmError::TaskJoin("handle polled after completion".to_string())
            }))),
        }
    }
}
