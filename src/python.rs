use numpy::{PyReadonlyArray1, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyList;

use crate::config::ApmConfig;
use crate::error::ApmError;
use crate::frame::AudioFrame;
use crate::stats::PipelineStats;
use crate::system::ApmSystem;

fn to_py_err(err: ApmError) -> PyErr {
    match err {
        ApmError::InvalidConfig(_) | ApmError::InvalidFrame(_) | ApmError::ConfigParse(_) => {
            PyValueError::new_err(err.to_string())
        }
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

fn to_frame(array: &PyReadonlyArray1<'_, f32>, sample_rate: u32) -> AudioFrame {
    let samples: Vec<f32> = array.as_array().iter().copied().collect();
    AudioFrame::mono(samples, sample_rate)
}

#[pyclass(name = "ApmEngine")]
pub struct PyApmEngine {
    system: ApmSystem,
}

#[pymethods]
impl PyApmEngine {
    #[new]
    #[pyo3(signature = (
        num_microphones = 4,
        mic_spacing_m = 0.012,
        num_speakers = 3,
        speaker_spacing_m = 0.015,
        sample_rate = 48000,
        source_language = "en-US".to_string(),
        target_language = "es-ES".to_string(),
        config_path = None,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        num_microphones: usize,
        mic_spacing_m: f32,
        num_speakers: usize,
        speaker_spacing_m: f32,
        sample_rate: u32,
        source_language: String,
        target_language: String,
        config_path: Option<String>,
    ) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => ApmConfig::load(path).map_err(to_py_err)?,
            None => ApmConfig {
                num_microphones,
                mic_spacing_m,
                num_speakers,
                speaker_spacing_m,
                sample_rate,
                source_language,
                target_language,
                ..ApmConfig::default()
            },
        };
        let system = ApmSystem::new(config).map_err(to_py_err)?;
        Ok(Self { system })
    }

    /// Process one utterance. Returns one array per speaker, or an empty list
    /// when no speech was detected.
    fn process<'py>(
        &self,
        py: Python<'py>,
        mics: Vec<PyReadonlyArray1<'py, f32>>,
        reference: PyReadonlyArray1<'py, f32>,
        direction_rad: f32,
    ) -> PyResult<Bound<'py, PyList>> {
        let rate = self.system.config().sample_rate;
        let mic_frames: Vec<AudioFrame> = mics.iter().map(|m| to_frame(m, rate)).collect();
        let reference = to_frame(&reference, rate);

        let system = self.system.clone();
        let frames = py
            .detach(move || system.process(mic_frames, reference, direction_rad))
            .map_err(to_py_err)?;

        PyList::new(py, frames.iter().map(|f| f.samples().to_pyarray(py)))
    }

    fn reset(&self, py: Python<'_>) -> PyResult<()> {
        let system = self.system.clone();
        py.detach(move || system.reset_all_blocking()).map_err(to_py_err)
    }

    #[getter]
    fn sample_rate(&self) -> u32 {
        self.system.config().sample_rate
    }

    fn get_stats(&self) -> PipelineStats {
        PipelineStats::from_runtime(self.system.stats().snapshot())
    }
}

#[pymodule]
fn apm_pipeline(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyApmEngine>()?;
    m.add_class::<PipelineStats>()?;
    Ok(())
}
