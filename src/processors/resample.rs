use rubato::audioadapter::Adapter;
use rubato::{Fft, FixedSync, Resampler};
use tracing::warn;

use crate::error::{ApmError, Result};
use crate::frame::AudioFrame;

const CHUNK_SIZE: usize = 1024;

// Custom adapter to bridge planar buffers to Rubato
struct PlanarBuffer<'a> {
    data: &'a [Vec<f32>],
    channels: usize,
    frames: usize,
}

impl<'a> Adapter<'a, f32> for PlanarBuffer<'a> {
    fn channels(&self) -> usize {
        self.channels
    }
    fn frames(&self) -> usize {
        self.frames
    }
    fn read_sample(&self, channel: usize, frame: usize) -> Option<f32> {
        self.data.get(channel).and_then(|ch| ch.get(frame)).copied()
    }
    unsafe fn read_sample_unchecked(&self, channel: usize, frame: usize) -> f32 {
        *self.data.get_unchecked(channel).get_unchecked(frame)
    }
}

/// Whole-utterance sample-rate converter used to bring translated audio back
/// to the capture rate.
///
/// Every call is converted independently: the resampler is reset first, the
/// input is zero-padded to whole chunks, the filter delay is skipped and the
/// output is trimmed to `round(n * to / from)` frames.
pub struct RateConverter {
    resampler: Fft<f32>,
    from_rate: u32,
    to_rate: u32,
    channels: usize,
}

impl RateConverter {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || channels == 0 {
            return Err(ApmError::InvalidConfig(format!(
                "cannot resample {from_rate}Hz -> {to_rate}Hz with {channels} channels"
            )));
        }
        let resampler = Fft::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_SIZE,
            1,
            channels as usize,
            FixedSync::Input,
        )
        .map_err(|e| {
            ApmError::InvalidConfig(format!(
                "failed to create resampler {from_rate}->{to_rate}Hz: {e}"
            ))
        })?;

        Ok(Self {
            resampler,
            from_rate,
            to_rate,
            channels: channels as usize,
        })
    }

    /// True when this converter handles `frame` as input.
    pub fn accepts(&self, frame: &AudioFrame, to_rate: u32) -> bool {
        self.from_rate == frame.sample_rate()
            && self.to_rate == to_rate
            && self.channels == frame.channels() as usize
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Convert `frame` to the target rate. A frame with a different layout or
    /// a resampler failure leaves the input unchanged.
    pub fn convert(&mut self, frame: &AudioFrame) -> AudioFrame {
        if frame.sample_rate() != self.from_rate || frame.channels() as usize != self.channels {
            warn!(
                rate = frame.sample_rate(),
                channels = frame.channels(),
                expected_rate = self.from_rate,
                "rate converter layout mismatch, passing audio through"
            );
            return frame.clone();
        }

        let input_frames = frame.frame_count();
        let expected =
            (input_frames as f64 * self.to_rate as f64 / self.from_rate as f64).round() as usize;
        let channels = self.channels;

        self.resampler.reset();
        let delay = self.resampler.output_delay();

        let planes: Vec<Vec<f32>> = (0..channels as u16).map(|ch| frame.channel(ch)).collect();
        let mut out_planes: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
        let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(CHUNK_SIZE); channels];

        let mut offset = 0;
        while out_planes[0].len() < delay + expected {
            for (chunk, plane) in planar.iter_mut().zip(&planes) {
                chunk.clear();
                let end = (offset + CHUNK_SIZE).min(plane.len());
                if offset < end {
                    chunk.extend_from_slice(&plane[offset..end]);
                }
                chunk.resize(CHUNK_SIZE, 0.0);
            }
            offset += CHUNK_SIZE;

            let input = PlanarBuffer {
                data: &planar,
                channels,
                frames: CHUNK_SIZE,
            };
            let output = match self.resampler.process(&input, 0, None) {
                Ok(output) => output,
                Err(err) => {
                    warn!(%err, "resampling failed, passing audio through");
                    return frame.clone();
                }
            };
            if output.frames() == 0 && offset > input_frames + delay + CHUNK_SIZE {
                break;
            }
            for i in 0..output.frames() {
                for (ch, plane) in out_planes.iter_mut().enumerate() {
                    plane.push(output.read_sample(ch, i).unwrap_or(0.0));
                }
            }
        }

        let mut samples = Vec::with_capacity(expected * channels);
        for i in delay..delay + expected {
            for plane in &out_planes {
                samples.push(plane.get(i).copied().unwrap_or(0.0));
            }
        }

        let mut converted = AudioFrame::from_samples(samples, self.to_rate, channels as u16)
            .unwrap_or_else(|_| AudioFrame::silent(expected, self.to_rate, channels as u16));
        converted.metadata_mut().timestamp_ns = frame.metadata().timestamp_ns;
        converted.compute_metadata();
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_rates() {
        assert!(RateConverter::new(0, 48_000, 1).is_err());
        assert!(RateConverter::new(16_000, 48_000, 0).is_err());
    }

    #[test]
    fn upsampling_trims_to_expected_length() {
        let mut rc = RateConverter::new(16_000, 48_000, 1).unwrap();
        let input = AudioFrame::tone(1_600, 16_000, 440.0, 0.5, 0);
        let out = rc.convert(&input);

        assert_eq!(out.sample_rate(), 48_000);
        assert_eq!(out.frame_count(), 4_800);
        assert_eq!(out.channels(), 1);
    }

    #[test]
    fn downsampling_preserves_level() {
        let mut rc = RateConverter::new(48_000, 16_000, 1).unwrap();
        let input = AudioFrame::tone(4_800, 48_000, 440.0, 0.5, 0);
        let out = rc.convert(&input);

        assert_eq!(out.frame_count(), 1_600);
        let mid = &out.samples()[400..1200];
        let peak = mid.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {peak}");
    }

    #[test]
    fn conversion_is_repeatable() {
        let mut rc = RateConverter::new(24_000, 48_000, 1).unwrap();
        let input = AudioFrame::tone(2_000, 24_000, 300.0, 0.3, 0);
        let a = rc.convert(&input);
        let b = rc.convert(&input);
        assert_eq!(a.samples(), b.samples());
    }

    #[test]
    fn mismatched_layout_passes_through() {
        let mut rc = RateConverter::new(16_000, 48_000, 1).unwrap();
        let input = AudioFrame::tone(320, 22_050, 440.0, 0.5, 0);
        let out = rc.convert(&input);
        assert_eq!(out.sample_rate(), 22_050);
        assert_eq!(out.samples(), input.samples());
    }
}
