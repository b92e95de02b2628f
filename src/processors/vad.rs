use crate::config::VadConfig;
use crate::frame::{mean_square, AudioFrame, LOG_FLOOR};

/// Zero-crossing band (exclusive) accepted as speech-like.
const MIN_ZERO_CROSSINGS: usize = 50;
const MAX_ZERO_CROSSINGS: usize = 300;

/// Offset added to an ambient noise estimate to form the threshold.
const THRESHOLD_MARGIN_DB: f32 = 15.0;

/// Span over which confidence ramps from 0 to 1 above the threshold.
const CONFIDENCE_SPAN_DB: f32 = 20.0;

/// Which branch of the hysteresis produced a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VadState {
    /// Raw detection fired on this frame.
    Active,
    /// Raw detection failed but the hangover budget kept speech on.
    Hangover,
    Idle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VadResult {
    pub speech_detected: bool,
    pub confidence: f32,
    pub snr_db: f32,
    pub energy_db: f32,
    pub state: VadState,
}

/// Energy and zero-crossing voice activity detector with hangover.
///
/// The threshold is a noise-floor estimate and survives [`reset`](Self::reset);
/// only the hangover counter is cleared.
pub struct VoiceActivityDetector {
    threshold_db: f32,
    hangover_frames: u32,
    hangover_remaining: u32,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold_db: config.threshold_db,
            hangover_frames: config.hangover_frames,
            hangover_remaining: 0,
        }
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    pub fn hangover_remaining(&self) -> u32 {
        self.hangover_remaining
    }

    pub fn detect(&mut self, frame: &AudioFrame) -> VadResult {
        let samples = frame.samples();
        let energy_db = 10.0 * (mean_square(samples) + LOG_FLOOR).log10();
        let crossings = zero_crossings(samples);

        let raw = energy_db > self.threshold_db
            && crossings > MIN_ZERO_CROSSINGS
            && crossings < MAX_ZERO_CROSSINGS;

        let state = if raw {
            self.hangover_remaining = self.hangover_frames;
            VadState::Active
        } else if self.hangover_remaining > 0 {
            self.hangover_remaining -= 1;
            VadState::Hangover
        } else {
            VadState::Idle
        };
        let speech_detected = state != VadState::Idle;

        let confidence = if speech_detected {
            ((energy_db - self.threshold_db) / CONFIDENCE_SPAN_DB).clamp(0.0, 1.0)
        } else {
            0.0
        };

        VadResult {
            speech_detected,
            confidence,
            snr_db: energy_db - self.threshold_db,
            energy_db,
            state,
        }
    }

    /// Set the threshold 15 dB above the measured ambient level.
    pub fn adapt_threshold(&mut self, ambient_noise_db: f32) {
        self.threshold_db = ambient_noise_db + THRESHOLD_MARGIN_DB;
    }

    pub fn reset(&mut self) {
        self.hangover_remaining = 0;
    }
}

fn zero_crossings(samples: &[f32]) -> usize {
    samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2 kHz at 48 kHz over 20 ms: ~80 crossings, about -9 dB.
    fn speech_like() -> AudioFrame {
        AudioFrame::tone(960, 48_000, 2_000.0, 0.5, 0)
    }

    fn detector() -> VoiceActivityDetector {
        VoiceActivityDetector::new(&VadConfig::default())
    }

    #[test]
    fn silence_is_not_speech() {
        let mut vad = detector();
        let r = vad.detect(&AudioFrame::silent(960, 48_000, 1));
        assert!(!r.speech_detected);
        assert!(r.confidence < 0.1);
        assert_eq!(r.state, VadState::Idle);
        assert!((r.energy_db + 100.0).abs() < 1e-3);
    }

    #[test]
    fn empty_frame_is_not_speech() {
        let mut vad = detector();
        let r = vad.detect(&AudioFrame::silent(0, 48_000, 1));
        assert!(!r.speech_detected);
        assert!(r.energy_db.is_finite());
    }

    #[test]
    fn tone_in_speech_band_triggers() {
        let mut vad = detector();
        let r = vad.detect(&speech_like());
        assert!(r.speech_detected);
        assert_eq!(r.state, VadState::Active);
        assert!(r.confidence > 0.9);
        assert!((r.snr_db - (r.energy_db + 30.0)).abs() < 1e-4);
    }

    #[test]
    fn zero_crossing_band_rejects_low_and_high_rates() {
        let mut vad = detector();
        // 100 Hz gives ~4 crossings, 10 kHz ~400
        assert!(!vad.detect(&AudioFrame::tone(960, 48_000, 100.0, 0.5, 0)).speech_detected);
        assert!(!vad.detect(&AudioFrame::tone(960, 48_000, 10_000.0, 0.5, 0)).speech_detected);
    }

    #[test]
    fn hangover_bridges_then_expires() {
        let mut vad = detector();
        let silent = AudioFrame::silent(960, 48_000, 1);
        assert!(vad.detect(&speech_like()).speech_detected);

        for n in 0..10 {
            let r = vad.detect(&silent);
            assert!(r.speech_detected, "frame {n} should be bridged");
            assert_eq!(r.state, VadState::Hangover);
            assert_eq!(r.confidence, 0.0);
        }
        let r = vad.detect(&silent);
        assert!(!r.speech_detected);
        assert_eq!(r.state, VadState::Idle);
    }

    #[test]
    fn reset_clears_hangover_but_keeps_threshold() {
        let mut vad = detector();
        vad.adapt_threshold(-60.0);
        assert_eq!(vad.threshold_db(), -45.0);

        vad.detect(&speech_like());
        assert_eq!(vad.hangover_remaining(), 10);

        vad.reset();
        assert_eq!(vad.hangover_remaining(), 0);
        assert_eq!(vad.threshold_db(), -45.0);
        assert!(!vad.detect(&AudioFrame::silent(960, 48_000, 1)).speech_detected);
    }

    #[test]
    fn raised_threshold_suppresses_detection() {
        let mut vad = detector();
        vad.adapt_threshold(0.0);
        assert!(!vad.detect(&speech_like()).speech_detected);
    }
}
