use crate::config::{ApmConfig, SPEED_OF_SOUND};
use crate::frame::AudioFrame;

/// Drives a linear speaker array so its output focuses at a target point.
///
/// Each speaker receives a cyclically delayed, attenuated copy of the source.
/// The delay wraps: samples pushed past the end reappear at the start of the
/// buffer, which is audible as a pre-echo.
#[derive(Clone, Debug)]
pub struct DirectionalProjector {
    speakers: usize,
    spacing_m: f32,
}

impl DirectionalProjector {
    pub fn new(speakers: usize, spacing_m: f32) -> Self {
        Self {
            speakers,
            spacing_m,
        }
    }

    pub fn from_config(config: &ApmConfig) -> Self {
        Self::new(config.num_speakers, config.speaker_spacing_m)
    }

    pub fn speakers(&self) -> usize {
        self.speakers
    }

    /// Whole-sample delay for speaker `index`, truncated toward zero.
    pub fn delay_samples(&self, index: usize, azimuth: f32, sample_rate: u32) -> i64 {
        let delay_sec = index as f32 * self.spacing_m * azimuth.sin() / SPEED_OF_SOUND;
        (delay_sec * sample_rate as f32) as i64
    }

    /// One frame per speaker, in array order.
    ///
    /// Only delays in `1..frames` rotate the buffer; negative delays and
    /// delays of a whole buffer or more pass the source through unshifted.
    pub fn create_projection_signals(
        &self,
        source: &AudioFrame,
        azimuth: f32,
        distance_m: f32,
    ) -> Vec<AudioFrame> {
        let attenuation = 1.0 / (distance_m * distance_m + 1.0);
        let frames = source.frame_count();
        let channels = source.channels() as usize;

        (0..self.speakers)
            .map(|index| {
                let mut signal = source.clone();
                let delay = self.delay_samples(index, azimuth, source.sample_rate());
                if delay > 0 && delay < frames as i64 {
                    signal.samples_mut().rotate_right(delay as usize * channels);
                }
                signal.samples_mut().iter_mut().for_each(|s| *s *= attenuation);
                signal.compute_metadata();
                signal
            })
            .collect()
    }
}
