use std::borrow::Cow;

use ringbuf::traits::{Consumer, RingBuffer};
use ringbuf::HeapRb;
use tracing::warn;

use crate::config::EchoConfig;
use crate::frame::{mean_square, AudioFrame};
use crate::stats::RuntimeStatsHandle;

/// Lower bound on the reference power used to normalize the update.
const MIN_REF_POWER: f32 = 1e-6;

/// Near-end energy must exceed this multiple of the reference energy to
/// count as double talk.
const DOUBLE_TALK_RATIO: f32 = 4.0;

/// Snapshot of the adaptive filter's health.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EchoDiagnostics {
    pub weight_norm: f32,
    pub peak_weight_norm: f32,
    pub divergence_events: u64,
    pub diverged: bool,
    pub samples_adapted: u64,
}

/// Normalized-LMS acoustic echo canceller.
///
/// The weight vector and the reference delay line carry over between calls
/// until [`reset`](Self::reset). Adaptation is undamped: there is no leakage
/// and no weight clipping. The weight norm is checked after every call and
/// excursions past `divergence_norm` are reported, not corrected.
pub struct EchoCancellationEngine {
    weights: Vec<f32>,
    /// Most recent reference samples; iterated newest first.
    delay_line: HeapRb<f32>,
    step_size: f32,
    divergence_norm: f32,
    diagnostics: EchoDiagnostics,
    stats: RuntimeStatsHandle,
}

impl EchoCancellationEngine {
    pub fn new(config: &EchoConfig, stats: RuntimeStatsHandle) -> Self {
        let filter_length = config.filter_length.max(1);
        let mut engine = Self {
            weights: vec![0.0; filter_length],
            delay_line: HeapRb::new(filter_length),
            step_size: config.step_size,
            divergence_norm: config.divergence_norm,
            diagnostics: EchoDiagnostics::default(),
            stats,
        };
        engine.prime_delay_line();
        engine.publish_diagnostics();
        engine
    }

    pub fn filter_length(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn diagnostics(&self) -> EchoDiagnostics {
        self.diagnostics.clone()
    }

    /// Fill every slot with zeros; capacity equals the filter length, so this
    /// overwrites whatever history was there.
    fn prime_delay_line(&mut self) {
        for _ in 0..self.weights.len() {
            self.delay_line.push_overwrite(0.0);
        }
    }

    /// Remove the echo of `reference` from `mic`.
    ///
    /// Output is mono at the microphone's rate with
    /// `min(mic.frame_count(), reference.frame_count())` samples; each sample
    /// is the a-priori error of the filter.
    pub fn cancel_echo(&mut self, mic: &AudioFrame, reference: &AudioFrame) -> AudioFrame {
        let mic_samples = first_channel(mic);
        let ref_samples = first_channel(reference);
        let len = mic_samples.len().min(ref_samples.len());

        let mut output = Vec::with_capacity(len);
        for (&near, &far) in mic_samples[..len].iter().zip(&ref_samples[..len]) {
            self.delay_line.push_overwrite(far);

            let (head, tail) = self.delay_line.as_slices();
            let mut echo_estimate = 0.0f32;
            let mut ref_power = 0.0f32;
            for (w, x) in self.weights.iter().zip(head.iter().chain(tail).rev()) {
                echo_estimate += w * x;
                ref_power += x * x;
            }

            let error = near - echo_estimate;
            output.push(error);

            let gain = self.step_size * error / ref_power.max(MIN_REF_POWER);
            for (w, x) in self.weights.iter_mut().zip(head.iter().chain(tail).rev()) {
                *w += gain * x;
            }
        }

        self.diagnostics.samples_adapted += len as u64;
        self.check_divergence();
        self.publish_diagnostics();

        let mut frame = AudioFrame::mono(output, mic.sample_rate());
        frame.metadata_mut().timestamp_ns = mic.metadata().timestamp_ns;
        frame.compute_metadata();
        frame
    }

    /// True when the microphone carries more energy than an echo of the
    /// reference could explain. Adaptation is not paused here.
    pub fn detect_double_talk(&self, mic: &AudioFrame, reference: &AudioFrame) -> bool {
        mean_square(mic.samples()) > DOUBLE_TALK_RATIO * mean_square(reference.samples())
    }

    /// Zero the weights and the delay line. Meant for call boundaries.
    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.prime_delay_line();
        self.diagnostics = EchoDiagnostics::default();
        self.publish_diagnostics();
    }

    fn check_divergence(&mut self) {
        let norm = self.weights.iter().map(|w| w * w).sum::<f32>().sqrt();
        self.diagnostics.weight_norm = norm;
        if norm.is_finite() {
            self.diagnostics.peak_weight_norm = self.diagnostics.peak_weight_norm.max(norm);
        }

        let over = !norm.is_finite() || norm > self.divergence_norm;
        if over && !self.diagnostics.diverged {
            self.diagnostics.divergence_events += 1;
            warn!(
                weight_norm = norm,
                limit = self.divergence_norm,
                events = self.diagnostics.divergence_events,
                "echo canceller weights diverging"
            );
        }
        self.diagnostics.diverged = over;
    }

    fn publish_diagnostics(&self) {
        let d = &self.diagnostics;
        self.stats.update(|s| {
            s.echo.weight_norm = d.weight_norm;
            s.echo.peak_weight_norm = d.peak_weight_norm;
            s.echo.divergence_events = d.divergence_events;
            s.echo.diverged = d.diverged;
            s.echo.samples_adapted = d.samples_adapted;
        });
    }
}

fn first_channel(frame: &AudioFrame) -> Cow<'_, [f32]> {
    if frame.channels() <= 1 {
        Cow::Borrowed(frame.samples())
    } else {
        Cow::Owned(frame.channel(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(filter_length: usize) -> EchoCancellationEngine {
        let config = EchoConfig {
            filter_length,
            ..EchoConfig::default()
        };
        EchoCancellationEngine::new(&config, RuntimeStatsHandle::new())
    }

    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed.max(1);
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) - 0.5
            })
            .collect()
    }

    /// Mic is the reference attenuated by half and delayed by `lag` samples.
    fn echo_of(reference: &[f32], lag: usize) -> Vec<f32> {
        (0..reference.len())
            .map(|i| if i >= lag { 0.5 * reference[i - lag] } else { 0.0 })
            .collect()
    }

    #[test]
    fn zero_reference_passes_mic_through() {
        let mut aec = engine(64);
        aec.cancel_echo(
            &AudioFrame::mono(noise(256, 3), 48_000),
            &AudioFrame::mono(noise(256, 4), 48_000),
        );
        aec.reset();

        let mic = AudioFrame::mono(noise(300, 9), 48_000);
        let out = aec.cancel_echo(&mic, &AudioFrame::silent(300, 48_000, 1));
        assert_eq!(out.samples(), mic.samples());
    }

    #[test]
    fn output_length_is_shorter_input() {
        let mut aec = engine(16);
        let out = aec.cancel_echo(
            &AudioFrame::mono(vec![0.1; 100], 16_000),
            &AudioFrame::mono(vec![0.1; 60], 48_000),
        );
        assert_eq!(out.frame_count(), 60);
        assert_eq!(out.channels(), 1);
        assert_eq!(out.sample_rate(), 16_000);
    }

    #[test]
    fn converges_on_pure_echo() {
        let mut aec = engine(32);
        let reference = noise(480 * 21, 7);
        let mic = echo_of(&reference, 5);

        let mut last_out = Vec::new();
        let mut last_mic = Vec::new();
        for block in 0..20 {
            let range = block * 480..(block + 1) * 480;
            let out = aec.cancel_echo(
                &AudioFrame::mono(mic[range.clone()].to_vec(), 48_000),
                &AudioFrame::mono(reference[range.clone()].to_vec(), 48_000),
            );
            last_out = out.into_samples();
            last_mic = mic[range].to_vec();
        }

        assert!(mean_square(&last_out) < 0.01 * mean_square(&last_mic));
        assert!((aec.weights()[5] - 0.5).abs() < 0.05);
        assert_eq!(aec.diagnostics().samples_adapted, 480 * 20);
    }

    #[test]
    fn delay_line_persists_across_calls() {
        let mut aec = engine(8);
        let reference = noise(64, 11);
        let mic = echo_of(&reference, 3);

        let mut split = engine(8);
        let whole = aec.cancel_echo(
            &AudioFrame::mono(mic.clone(), 48_000),
            &AudioFrame::mono(reference.clone(), 48_000),
        );
        let a = split.cancel_echo(
            &AudioFrame::mono(mic[..20].to_vec(), 48_000),
            &AudioFrame::mono(reference[..20].to_vec(), 48_000),
        );
        let b = split.cancel_echo(
            &AudioFrame::mono(mic[20..].to_vec(), 48_000),
            &AudioFrame::mono(reference[20..].to_vec(), 48_000),
        );

        let joined: Vec<f32> = a.samples().iter().chain(b.samples()).copied().collect();
        assert_eq!(whole.samples(), joined.as_slice());
    }

    #[test]
    fn double_talk_compares_energy() {
        let aec = engine(8);
        let quiet = AudioFrame::mono(vec![0.1; 100], 48_000);
        let loud = AudioFrame::mono(vec![0.5; 100], 48_000);

        assert!(aec.detect_double_talk(&loud, &quiet));
        assert!(!aec.detect_double_talk(&quiet, &loud));
        assert!(!aec.detect_double_talk(&quiet, &quiet));
        assert!(!aec.detect_double_talk(
            &AudioFrame::silent(0, 48_000, 1),
            &AudioFrame::silent(0, 48_000, 1)
        ));
    }

    #[test]
    fn divergence_is_flagged_and_cleared_by_reset() {
        let stats = RuntimeStatsHandle::new();
        let config = EchoConfig {
            filter_length: 32,
            divergence_norm: 0.1,
            ..EchoConfig::default()
        };
        let mut aec = EchoCancellationEngine::new(&config, stats.clone());
        let reference = noise(4_800, 21);
        let mic = echo_of(&reference, 2);

        aec.cancel_echo(
            &AudioFrame::mono(mic.clone(), 48_000),
            &AudioFrame::mono(reference.clone(), 48_000),
        );
        aec.cancel_echo(
            &AudioFrame::mono(mic, 48_000),
            &AudioFrame::mono(reference, 48_000),
        );

        let d = aec.diagnostics();
        assert!(d.diverged);
        assert_eq!(d.divergence_events, 1);
        assert!(d.peak_weight_norm >= d.weight_norm);
        assert!(stats.snapshot().echo.diverged);

        aec.reset();
        assert_eq!(aec.diagnostics(), EchoDiagnostics::default());
        assert!(aec.weights().iter().all(|&w| w == 0.0));
        assert!(!stats.snapshot().echo.diverged);
    }
}
