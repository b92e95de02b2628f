use std::path::Path;

use anyhow::{Context, Result};
use dasp::Sample;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::frame::AudioFrame;

/// Read a WAV file into one interleaved frame. Integer PCM is normalized to
/// [-1, 1]; float data is taken as-is.
pub fn load_wav(path: impl AsRef<Path>) -> Result<AudioFrame> {
    let path = path.as_ref();
    let mut reader =
        WavReader::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("failed to decode float samples")?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .context("failed to decode integer samples")?
        }
    };

    let frame = AudioFrame::from_samples(samples, spec.sample_rate, spec.channels)
        .with_context(|| format!("malformed audio in {}", path.display()))?;
    Ok(frame)
}

/// Write `frame` as 16-bit PCM, clamping out-of-range samples.
pub fn save_wav(path: impl AsRef<Path>, frame: &AudioFrame) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: frame.channels().max(1),
        sample_rate: frame.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for &s in frame.samples() {
        writer.write_sample(s.clamp(-1.0, 1.0).to_sample::<i16>())?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_keeps_layout_and_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frame = AudioFrame::from_samples(vec![0.5, -0.5, 0.25, 0.0], 16_000, 2).unwrap();

        save_wav(&path, &frame).unwrap();
        let back = load_wav(&path).unwrap();

        assert_eq!(back.sample_rate(), 16_000);
        assert_eq!(back.channels(), 2);
        assert_eq!(back.samples(), frame.samples());
    }

    #[test]
    fn clamps_out_of_range_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hot.wav");
        save_wav(&path, &AudioFrame::mono(vec![3.0, -3.0], 48_000)).unwrap();

        let back = load_wav(&path).unwrap();
        assert!((back.samples()[0] - 1.0).abs() < 1e-3);
        assert_eq!(back.samples()[1], -1.0);
    }

    #[test]
    fn reads_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [0.1_f32, -0.7, 1.5] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let back = load_wav(&path).unwrap();
        assert_eq!(back.samples(), &[0.1, -0.7, 1.5]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_wav("/nonexistent/capture.wav").is_err());
    }
}
