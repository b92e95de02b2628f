use std::borrow::Cow;

use tracing::debug;

use crate::config::{ApmConfig, SPEED_OF_SOUND};
use crate::frame::AudioFrame;

/// Sample rate reported for the empty output of an empty microphone array.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Taps on either side of the interpolation point (7-tap window).
const LAGRANGE_HALF_WIDTH: isize = 3;

/// Delay-and-sum beamformer over a uniform linear microphone array.
///
/// Holds only geometry, so one instance can serve any number of calls.
#[derive(Clone, Debug)]
pub struct BeamformingEngine {
    array_size: usize,
    spacing_m: f32,
}

impl BeamformingEngine {
    pub fn new(array_size: usize, spacing_m: f32) -> Self {
        Self {
            array_size,
            spacing_m,
        }
    }

    pub fn from_config(config: &ApmConfig) -> Self {
        Self::new(config.num_microphones, config.mic_spacing_m)
    }

    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Per-microphone steering delays in samples.
    pub fn steering_delays(&self, azimuth: f32, elevation: f32, sample_rate: u32) -> Vec<f32> {
        (0..self.array_size)
            .map(|m| {
                m as f32 * self.spacing_m * azimuth.sin() * elevation.cos() / SPEED_OF_SOUND
                    * sample_rate as f32
            })
            .collect()
    }

    /// Steer the array toward (`azimuth`, `elevation`) in radians and sum to mono.
    ///
    /// Output length and rate follow the first microphone frame. The sum is
    /// divided by the configured array size, so a partial array comes out
    /// proportionally quieter. Multichannel microphone frames contribute
    /// their first channel.
    pub fn delay_and_sum(
        &self,
        mic_frames: &[AudioFrame],
        azimuth: f32,
        elevation: f32,
    ) -> AudioFrame {
        let Some(first) = mic_frames.first() else {
            let mut empty = AudioFrame::silent(0, DEFAULT_SAMPLE_RATE, 1);
            empty.compute_metadata();
            return empty;
        };

        let frame_count = first.frame_count();
        let sample_rate = first.sample_rate();
        let active = self.array_size.min(mic_frames.len());
        let delays = self.steering_delays(azimuth, elevation, sample_rate);
        let buffers: Vec<Cow<'_, [f32]>> = mic_frames[..active]
            .iter()
            .map(|f| {
                if f.channels() == 1 {
                    Cow::Borrowed(f.samples())
                } else {
                    Cow::Owned(f.channel(0))
                }
            })
            .collect();
        let norm = self.array_size.max(1) as f32;

        let sample_at = |i: usize| -> f32 {
            let mut sum = 0.0f32;
            for (buffer, &delay) in buffers.iter().zip(&delays) {
                let pos = i as f32 - delay;
                // bounded by this microphone's own buffer
                if pos >= 0.0 && pos < buffer.len() as f32 {
                    sum += lagrange_interpolate(buffer, pos);
                }
            }
            sum / norm
        };

        #[cfg(feature = "parallel")]
        let samples: Vec<f32> = {
            use rayon::prelude::*;
            (0..frame_count).into_par_iter().map(sample_at).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let samples: Vec<f32> = (0..frame_count).map(sample_at).collect();

        let mut output = AudioFrame::mono(samples, sample_rate);
        output.metadata_mut().timestamp_ns = first.metadata().timestamp_ns;
        output.compute_metadata();
        output
    }

    /// Superdirective steering entry point; currently plain delay-and-sum in azimuth.
    pub fn superdirective(&self, mic_frames: &[AudioFrame], azimuth: f32) -> AudioFrame {
        self.delay_and_sum(mic_frames, azimuth, 0.0)
    }

    /// Null-steering entry point. Interference directions are accepted but not
    /// yet used for weighting.
    pub fn adaptive_null_steering(
        &self,
        mic_frames: &[AudioFrame],
        target_azimuth: f32,
        interference_azimuths: &[f32],
    ) -> AudioFrame {
        debug!(
            target_azimuth,
            interferers = ?interference_azimuths,
            "null steering requested, falling back to delay-and-sum"
        );
        self.delay_and_sum(mic_frames, target_azimuth, 0.0)
    }
}

/// 7-tap Lagrange interpolation of `signal` at fractional index `idx`.
///
/// Returns 0 when the window would leave the buffer.
pub(crate) fn lagrange_interpolate(signal: &[f32], idx: f32) -> f32 {
    let base = idx.floor() as isize;
    let frac = idx - base as f32;
    if base < LAGRANGE_HALF_WIDTH || base + LAGRANGE_HALF_WIDTH >= signal.len() as isize {
        return 0.0;
    }

    let mut result = 0.0f32;
    for n in -LAGRANGE_HALF_WIDTH..=LAGRANGE_HALF_WIDTH {
        let mut weight = 1.0f32;
        for m in -LAGRANGE_HALF_WIDTH..=LAGRANGE_HALF_WIDTH {
            if m != n {
                weight *= (frac - m as f32) / (n - m) as f32;
            }
        }
        result += signal[(base + n) as usize] * weight;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn sine(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 48_000.0).sin() * 0.5)
            .collect()
    }

    #[test]
    fn empty_array_yields_empty_frame() {
        let bf = BeamformingEngine::new(4, 0.012);
        let out = bf.delay_and_sum(&[], 0.3, 0.0);
        assert_eq!(out.frame_count(), 0);
        assert_eq!(out.channels(), 1);
        assert_eq!(out.sample_rate(), DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn output_mirrors_first_frame() {
        let bf = BeamformingEngine::new(2, 0.012);
        let mics = vec![
            AudioFrame::mono(sine(300), 16_000),
            AudioFrame::mono(sine(200), 16_000),
        ];
        let out = bf.delay_and_sum(&mics, 0.2, 0.1);
        assert_eq!(out.frame_count(), 300);
        assert_eq!(out.sample_rate(), 16_000);
        assert_eq!(out.channels(), 1);
    }

    #[test]
    fn in_phase_inputs_scale_by_present_over_array_size() {
        let x = sine(480);
        let bf = BeamformingEngine::new(4, 0.012);

        let full: Vec<_> = (0..4).map(|_| AudioFrame::mono(x.clone(), 48_000)).collect();
        let out = bf.delay_and_sum(&full, 0.0, 0.0);
        for i in 3..477 {
            assert!((out.samples()[i] - x[i]).abs() < 1e-5, "sample {i}");
        }

        let partial: Vec<_> = (0..2).map(|_| AudioFrame::mono(x.clone(), 48_000)).collect();
        let out = bf.delay_and_sum(&partial, 0.0, 0.0);
        for i in 3..477 {
            assert!((out.samples()[i] - 0.5 * x[i]).abs() < 1e-5, "sample {i}");
        }
    }

    #[test]
    fn window_outside_buffer_contributes_zero() {
        let bf = BeamformingEngine::new(1, 0.012);
        let out = bf.delay_and_sum(&[AudioFrame::mono(vec![1.0; 64], 48_000)], 0.0, 0.0);
        assert!(out.samples()[..3].iter().all(|&s| s == 0.0));
        assert!(out.samples()[61..].iter().all(|&s| s == 0.0));
        assert!((out.samples()[10] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn steering_aligns_delayed_impulses() {
        // two samples of delay per microphone at broadside
        let spacing = 2.0 * SPEED_OF_SOUND / 48_000.0;
        let bf = BeamformingEngine::new(2, spacing);

        let mut a = vec![0.0; 128];
        let mut b = vec![0.0; 128];
        a[50] = 1.0;
        b[48] = 1.0;
        let mics = vec![AudioFrame::mono(a, 48_000), AudioFrame::mono(b, 48_000)];

        let steered = bf.delay_and_sum(&mics, FRAC_PI_2, 0.0);
        assert!((steered.samples()[50] - 1.0).abs() < 1e-3);

        let unsteered = bf.delay_and_sum(&mics, 0.0, 0.0);
        assert!((unsteered.samples()[50] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn longer_microphone_is_bounded_by_its_own_length() {
        // four samples of advance for the second microphone
        let spacing = 4.0 * SPEED_OF_SOUND / 48_000.0;
        let bf = BeamformingEngine::new(2, spacing);
        let mics = vec![
            AudioFrame::mono(vec![0.0; 32], 48_000),
            AudioFrame::mono(vec![1.0; 64], 48_000),
        ];

        let out = bf.delay_and_sum(&mics, -FRAC_PI_2, 0.0);
        assert_eq!(out.frame_count(), 32);
        // mic 1 reads around index 33, past the first microphone's end
        assert!((out.samples()[29] - 0.5).abs() < 1e-4);
        assert!((out.samples()[31] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn lagrange_reproduces_low_order_polynomials() {
        let ramp: Vec<f32> = (0..32).map(|i| i as f32).collect();
        assert!((lagrange_interpolate(&ramp, 10.25) - 10.25).abs() < 1e-4);

        let quad: Vec<f32> = (0..32).map(|i| (i * i) as f32 * 0.01).collect();
        let expected = 12.5f32 * 12.5 * 0.01;
        assert!((lagrange_interpolate(&quad, 12.5) - expected).abs() < 1e-3);

        assert_eq!(lagrange_interpolate(&ramp, 2.5), 0.0);
        assert_eq!(lagrange_interpolate(&ramp, 29.0), 0.0);
    }

    #[test]
    fn steering_variants_match_delay_and_sum() {
        let bf = BeamformingEngine::new(3, 0.012);
        let mics: Vec<_> = (0..3).map(|_| AudioFrame::mono(sine(256), 48_000)).collect();
        let base = bf.delay_and_sum(&mics, 0.4, 0.0);

        assert_eq!(bf.superdirective(&mics, 0.4).samples(), base.samples());
        assert_eq!(
            bf.adaptive_null_steering(&mics, 0.4, &[1.2, -0.7]).samples(),
            base.samples()
        );
    }
}
