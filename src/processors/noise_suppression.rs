use std::f32::consts::PI;

use crate::frame::{AudioFrame, LOG_FLOOR};

/// Analysis window length in samples.
pub const FFT_SIZE: usize = 512;
/// Distance between consecutive analysis windows.
pub const HOP_SIZE: usize = 256;
/// Size of the recurrent hidden/cell state; independent of `FFT_SIZE`.
pub const STATE_SIZE: usize = 256;

/// Hidden and cell vectors of the single-layer gating cell.
struct RecurrentState {
    hidden: Vec<f32>,
    cell: Vec<f32>,
}

impl RecurrentState {
    fn new(size: usize) -> Self {
        Self {
            hidden: vec![0.0; size],
            cell: vec![0.0; size],
        }
    }

    fn reset(&mut self) {
        self.hidden.iter_mut().for_each(|h| *h = 0.0);
        self.cell.iter_mut().for_each(|c| *c = 0.0);
    }
}

/// Recurrent scalar-gain noise suppressor.
///
/// Each full `FFT_SIZE` window yields one gain in (0, 1) that is applied to
/// the `HOP_SIZE` samples at the window start. The recurrent state carries
/// across windows and across calls until [`reset_state`](Self::reset_state).
pub struct NoiseSuppressionEngine {
    window: Vec<f32>,
    state: RecurrentState,
}

impl Default for NoiseSuppressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseSuppressionEngine {
    pub fn new() -> Self {
        Self {
            window: hann_window(FFT_SIZE),
            state: RecurrentState::new(STATE_SIZE),
        }
    }

    /// Same length, rate and layout as `noisy`. Samples not covered by a full
    /// analysis window are copied through untouched.
    pub fn suppress(&mut self, noisy: &AudioFrame) -> AudioFrame {
        let input = noisy.samples();
        let mut output = noisy.clone();
        let out = output.samples_mut();

        let mut analysis = vec![0.0f32; FFT_SIZE];
        let mut pos = 0;
        while pos + FFT_SIZE <= input.len() {
            let block = &input[pos..pos + FFT_SIZE];
            for ((a, &x), &w) in analysis.iter_mut().zip(block).zip(&self.window) {
                *a = x * w;
            }

            let features = compute_features(&analysis);
            let mask = self.forward(&features);
            let gain = mask.iter().sum::<f32>() / mask.len() as f32;

            let hop = &input[pos..pos + HOP_SIZE];
            for (o, &x) in out[pos..pos + HOP_SIZE].iter_mut().zip(hop) {
                *o = x * gain;
            }
            pos += HOP_SIZE;
        }

        output.compute_metadata();
        output
    }

    /// Zero the recurrent state.
    pub fn reset_state(&mut self) {
        self.state.reset();
    }

    /// One gating pass; returns a mask of `FFT_SIZE / 2` values.
    fn forward(&mut self, features: &[f32]) -> Vec<f32> {
        let state = &mut self.state;
        let n = state.hidden.len();

        (0..FFT_SIZE / 2)
            .map(|i| {
                let x = features[i % features.len()];
                let k = i % n;

                let forget = sigmoid(x + state.hidden[k]);
                let input_gate = sigmoid(0.5 * x);
                state.cell[k] = forget * state.cell[k] + input_gate * x.tanh();
                let output_gate = sigmoid(x);
                state.hidden[k] = output_gate * state.cell[k].tanh();

                sigmoid(state.hidden[k])
            })
            .collect()
    }
}

/// Periodic Hann window.
fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / len as f32).cos()))
        .collect()
}

/// Per-sample log magnitude followed by total energy and the energy-weighted
/// index centroid.
fn compute_features(frame: &[f32]) -> Vec<f32> {
    let mut features: Vec<f32> = frame.iter().map(|s| (s.abs() + LOG_FLOOR).ln()).collect();

    let mut energy = 0.0f32;
    let mut centroid = 0.0f32;
    for (i, s) in frame.iter().enumerate() {
        let mag = s.abs();
        energy += mag * mag;
        centroid += i as f32 * mag;
    }

    features.push(energy);
    features.push(centroid / (energy + LOG_FLOOR));
    features
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
