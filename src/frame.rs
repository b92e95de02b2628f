use dasp::{signal, Signal};

use crate::error::{ApmError, Result};

/// Floor used for every dB conversion so silence maps to a finite level.
pub(crate) const LOG_FLOOR: f32 = 1e-10;

/// Level reported for an empty buffer.
pub const SILENCE_DB: f32 = -96.0;

/// Derived loudness and capture information for an [`AudioFrame`].
///
/// Only valid after [`AudioFrame::compute_metadata`]; any in-place mutation of
/// the samples invalidates it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMetadata {
    pub timestamp_ns: u64,
    pub peak_db: f32,
    pub rms_db: f32,
    pub snr_db: f32,
    pub clipping: bool,
}

impl AudioMetadata {
    fn captured_now() -> Self {
        Self {
            timestamp_ns: now_ns(),
            peak_db: SILENCE_DB,
            rms_db: SILENCE_DB,
            snr_db: 0.0,
            clipping: false,
        }
    }
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Interleaved multichannel sample buffer.
///
/// `samples().len() == frame_count() * channels()` holds for every frame;
/// constructors reject buffers that would break it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    metadata: AudioMetadata,
}

impl AudioFrame {
    /// Zero-filled frame holding `frame_count` frames of `channels` samples.
    pub fn silent(frame_count: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: vec![0.0; frame_count * channels as usize],
            sample_rate,
            channels,
            metadata: AudioMetadata::captured_now(),
        }
    }

    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Result<Self> {
        if channels == 0 {
            if !samples.is_empty() {
                return Err(ApmError::InvalidFrame(format!(
                    "{} samples supplied for a zero-channel frame",
                    samples.len()
                )));
            }
        } else if samples.len() % channels as usize != 0 {
            return Err(ApmError::InvalidFrame(format!(
                "{} samples is not a multiple of {} channels",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
            metadata: AudioMetadata::captured_now(),
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
            metadata: AudioMetadata::captured_now(),
        }
    }

    /// Mono sine tone, delayed by `lag_frames` leading zeros.
    pub fn tone(
        frame_count: usize,
        sample_rate: u32,
        frequency_hz: f64,
        amplitude: f32,
        lag_frames: usize,
    ) -> Self {
        let lag = lag_frames.min(frame_count);
        let mut samples = vec![0.0; lag];
        samples.extend(
            signal::rate(sample_rate as f64)
                .const_hz(frequency_hz)
                .sine()
                .take(frame_count - lag)
                .map(|s| s as f32 * amplitude),
        );

        let mut frame = Self::mono(samples, sample_rate);
        frame.compute_metadata();
        frame
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable view of the samples. Call [`compute_metadata`](Self::compute_metadata)
    /// after writing.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn metadata(&self) -> &AudioMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut AudioMetadata {
        &mut self.metadata
    }

    /// Duration covered by the frame in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frame_count() as f64 * 1000.0 / self.sample_rate as f64
        }
    }

    /// De-interleaved copy of one channel; empty when `ch` is out of range.
    pub fn channel(&self, ch: u16) -> Vec<f32> {
        if ch >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(ch as usize)
            .step_by(self.channels as usize)
            .copied()
            .collect()
    }

    /// One mono frame per channel, sharing this frame's rate and timestamp.
    pub fn split_channels(&self) -> Vec<AudioFrame> {
        (0..self.channels)
            .map(|ch| {
                let mut frame = AudioFrame::mono(self.channel(ch), self.sample_rate);
                frame.metadata.timestamp_ns = self.metadata.timestamp_ns;
                frame.compute_metadata();
                frame
            })
            .collect()
    }

    /// Recompute peak, RMS and clipping from the current samples.
    pub fn compute_metadata(&mut self) {
        if self.samples.is_empty() {
            self.metadata.peak_db = SILENCE_DB;
            self.metadata.rms_db = SILENCE_DB;
            self.metadata.clipping = false;
            return;
        }

        let mut peak = 0.0f32;
        let mut sum_sq = 0.0f32;
        for &s in &self.samples {
            peak = peak.max(s.abs());
            sum_sq += s * s;
        }

        self.metadata.peak_db = 20.0 * (peak + LOG_FLOOR).log10();
        self.metadata.rms_db = 10.0 * (sum_sq / self.samples.len() as f32 + LOG_FLOOR).log10();
        self.metadata.clipping = peak > 1.0;
    }
}

/// Mean of the squared samples, zero for an empty slice.
pub(crate) fn mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_times_channels_matches_buffer() {
        for (frames, ch) in [(0usize, 1u16), (480, 1), (480, 2), (7, 6)] {
            let f = AudioFrame::silent(frames, 48_000, ch);
            assert_eq!(f.frame_count() * f.channels() as usize, f.samples().len());
            assert_eq!(f.frame_count(), frames);
        }
    }

    #[test]
    fn from_samples_rejects_ragged_buffers() {
        assert!(AudioFrame::from_samples(vec![0.0; 5], 48_000, 2).is_err());
        assert!(AudioFrame::from_samples(vec![0.0; 2], 48_000, 0).is_err());
        assert!(AudioFrame::from_samples(Vec::new(), 48_000, 0).is_ok());

        let f = AudioFrame::from_samples(vec![0.0; 6], 16_000, 3).unwrap();
        assert_eq!(f.frame_count(), 2);
        assert_eq!(f.sample_rate(), 16_000);
    }

    #[test]
    fn channel_extraction_deinterleaves() {
        let f = AudioFrame::from_samples(vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 48_000, 2).unwrap();
        assert_eq!(f.channel(0), vec![1.0, 2.0, 3.0]);
        assert_eq!(f.channel(1), vec![-1.0, -2.0, -3.0]);
        assert!(f.channel(2).is_empty());

        let split = f.split_channels();
        assert_eq!(split.len(), 2);
        assert_eq!(split[1].samples(), &[-1.0, -2.0, -3.0]);
        assert_eq!(split[1].channels(), 1);
    }

    #[test]
    fn metadata_of_empty_frame_is_silence() {
        let mut f = AudioFrame::silent(0, 48_000, 1);
        f.compute_metadata();
        assert_eq!(f.metadata().peak_db, SILENCE_DB);
        assert_eq!(f.metadata().rms_db, SILENCE_DB);
        assert!(!f.metadata().clipping);
    }

    #[test]
    fn metadata_tracks_peak_rms_and_clipping() {
        let mut f = AudioFrame::mono(vec![0.5, -0.5, 0.5, -0.5], 48_000);
        f.compute_metadata();
        assert!((f.metadata().peak_db - (-6.0206)).abs() < 1e-3);
        assert!((f.metadata().rms_db - (-6.0206)).abs() < 1e-3);
        assert!(!f.metadata().clipping);

        f.samples_mut()[0] = 1.5;
        f.compute_metadata();
        assert!(f.metadata().clipping);
    }

    #[test]
    fn tone_respects_lag_and_amplitude() {
        let f = AudioFrame::tone(480, 48_000, 1_000.0, 0.25, 10);
        assert_eq!(f.frame_count(), 480);
        assert!(f.samples()[..10].iter().all(|&s| s == 0.0));
        assert!(f.samples().iter().all(|s| s.abs() <= 0.25 + 1e-6));
        assert!(f.samples()[10..].iter().any(|s| s.abs() > 0.2));
    }

    #[test]
    fn mean_square_handles_empty() {
        assert_eq!(mean_square(&[]), 0.0);
        assert_eq!(mean_square(&[2.0, 0.0]), 2.0);
    }
}
