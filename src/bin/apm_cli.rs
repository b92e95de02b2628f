use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use apm_pipeline::capture::{CaptureChunker, CaptureLayout};
use apm_pipeline::messages::{CaptureBatch, WorkerMessage};
use apm_pipeline::processors::BeamformingEngine;
use apm_pipeline::{
    wav, ApmConfig, AudioFrame, MockMode, MockTranslationEngine, PipelineStats,
    RuntimeStatsHandle, WorkerHandle,
};

const STREAM_ID: &str = "cli";

/// Run a capture through the processing pipeline and write per-speaker output.
#[derive(Parser, Debug)]
#[command(name = "apm_cli")]
struct Args {
    /// Interleaved multichannel WAV capture.
    #[arg(short, long, conflicts_with = "synthetic")]
    input: Option<PathBuf>,

    /// Generate a synthetic capture of this many seconds instead of reading one.
    #[arg(long)]
    synthetic: Option<f32>,

    /// Capture channel holding the speaker reference.
    #[arg(long)]
    reference_channel: Option<usize>,

    /// TOML pipeline config.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Talker azimuth in degrees.
    #[arg(long, default_value = "0.0")]
    direction_deg: f32,

    #[arg(long, default_value = "20")]
    block_ms: u32,

    #[arg(long, default_value = "200")]
    translation_latency_ms: u64,

    /// Echo the processed speech back instead of producing silence.
    #[arg(long)]
    loopback: bool,

    /// Directory for speaker_<n>.wav files.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

/// Each microphone hears the same tone, lagged by its steering delay.
fn synthetic_capture(config: &ApmConfig, seconds: f32, azimuth: f32) -> Result<AudioFrame> {
    let frames = (seconds.max(0.0) * config.sample_rate as f32) as usize;
    let rate = config.sample_rate;
    let delays = BeamformingEngine::from_config(config).steering_delays(azimuth, 0.0, rate);
    let mics: Vec<AudioFrame> = delays
        .iter()
        .map(|d| AudioFrame::tone(frames, rate, 1_500.0, 0.3, d.round().max(0.0) as usize))
        .collect();

    let channels = mics.len();
    let mut interleaved = vec![0.0; frames * channels];
    for (ch, mic) in mics.iter().enumerate() {
        for (i, &s) in mic.samples().iter().enumerate() {
            interleaved[i * channels + ch] = s;
        }
    }
    Ok(AudioFrame::from_samples(interleaved, config.sample_rate, channels as u16)?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ApmConfig::load(path)?,
        None => ApmConfig::default(),
    };
    let azimuth = args.direction_deg.to_radians();

    let capture = match (&args.input, args.synthetic) {
        (Some(path), _) => wav::load_wav(path)?,
        (None, Some(seconds)) => synthetic_capture(&config, seconds, azimuth)?,
        (None, None) => bail!("provide --input <wav> or --synthetic <seconds>"),
    };

    let layout = CaptureLayout::for_capture(capture.channels() as usize, args.reference_channel)?;
    if layout.microphones != config.num_microphones || capture.sample_rate() != config.sample_rate {
        warn!(
            microphones = layout.microphones,
            sample_rate = capture.sample_rate(),
            "capture geometry overrides config"
        );
        config.num_microphones = layout.microphones;
        config.sample_rate = capture.sample_rate();
    }
    info!(
        frames = capture.frame_count(),
        channels = capture.channels(),
        sample_rate = capture.sample_rate(),
        duration_ms = capture.duration_ms(),
        "capture loaded"
    );

    let speakers = config.num_speakers;
    let outputs: Arc<Mutex<Vec<Vec<f32>>>> = Arc::new(Mutex::new(vec![Vec::new(); speakers]));
    let output_rate = Arc::new(Mutex::new(config.sample_rate));
    let sink = {
        let outputs = outputs.clone();
        let output_rate = output_rate.clone();
        move |_: &str, frames: Vec<AudioFrame>| -> Result<()> {
            let mut outputs = outputs.lock().map_err(|_| anyhow!("output buffer poisoned"))?;
            for (out, frame) in outputs.iter_mut().zip(&frames) {
                out.extend_from_slice(frame.samples());
            }
            if let (Some(frame), Ok(mut rate)) = (frames.first(), output_rate.lock()) {
                *rate = frame.sample_rate();
            }
            Ok(())
        }
    };

    let mode = if args.loopback {
        MockMode::Loopback
    } else {
        MockMode::Silent
    };
    let latency = Duration::from_millis(args.translation_latency_ms);
    let translator = Arc::new(MockTranslationEngine::new(latency).with_mode(mode));
    let handle = WorkerHandle::spawn(config.clone(), translator, sink, RuntimeStatsHandle::new())?;

    let mut chunker = CaptureChunker::with_block_ms(layout, config.sample_rate, args.block_ms);
    chunker.push_frame(&capture)?;
    let mut blocks = 0usize;
    while let Some(block) = chunker.pop_block() {
        handle.send(WorkerMessage::Batch(CaptureBatch::from_block(STREAM_ID, block, azimuth)))?;
        blocks += 1;
    }
    if let Some(block) = chunker.flush() {
        handle.send(WorkerMessage::Batch(CaptureBatch::from_block(STREAM_ID, block, azimuth)))?;
        blocks += 1;
    }
    info!(blocks, block_ms = args.block_ms, "capture queued");

    let worker = handle.finish()?;

    for (stage, summary) in worker.delay_tracker().summaries() {
        info!(
            stage = %stage,
            samples = summary.samples,
            min_ms = summary.min_ms,
            avg_ms = summary.avg_ms,
            max_ms = summary.max_ms,
            "stage latency"
        );
    }
    let stats = PipelineStats::from_runtime(worker.stats().snapshot());
    info!(
        health = %stats.health,
        utterances = stats.utterances_in,
        gated = stats.utterances_gated,
        translated = stats.utterances_translated,
        failures = stats.translation_failures,
        echo_weight_norm = stats.echo_weight_norm,
        double_talk_frames = stats.double_talk_frames,
        "pipeline finished"
    );

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let rate = *output_rate.lock().map_err(|_| anyhow!("output rate poisoned"))?;
        let outputs = outputs.lock().map_err(|_| anyhow!("output buffer poisoned"))?;
        for (n, samples) in outputs.iter().enumerate() {
            let path = dir.join(format!("speaker_{n}.wav"));
            wav::save_wav(&path, &AudioFrame::mono(samples.clone(), rate))?;
            info!(path = %path.display(), frames = samples.len(), "wrote speaker output");
        }
    }

    Ok(())
}
