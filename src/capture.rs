use std::collections::VecDeque;

use crate::error::{ApmError, Result};
use crate::frame::AudioFrame;

/// How the channels of an interleaved capture map onto the array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureLayout {
    /// Number of microphone channels, taken in channel order skipping the
    /// reference channel.
    pub microphones: usize,
    /// Channel carrying the speaker (loopback) reference, if the device
    /// records one.
    pub reference_channel: Option<usize>,
}

impl CaptureLayout {
    pub fn new(microphones: usize, reference_channel: Option<usize>) -> Self {
        Self {
            microphones,
            reference_channel,
        }
    }

    /// Channels per interleaved capture frame.
    pub fn capture_channels(&self) -> usize {
        self.microphones + usize::from(self.reference_channel.is_some())
    }

    /// Capture channel index of each microphone.
    pub fn microphone_channels(&self) -> Vec<usize> {
        (0..self.capture_channels())
            .filter(|&ch| Some(ch) != self.reference_channel)
            .take(self.microphones)
            .collect()
    }

    /// Derive a layout from a capture with `channels` channels.
    pub fn for_capture(channels: usize, reference_channel: Option<usize>) -> Result<Self> {
        match reference_channel {
            Some(ch) if ch >= channels => Err(ApmError::InvalidConfig(format!(
                "reference channel {ch} out of range for {channels}-channel capture"
            ))),
            Some(_) if channels < 2 => Err(ApmError::InvalidConfig(
                "a reference channel needs at least one microphone channel beside it".to_string(),
            )),
            Some(_) => Ok(Self::new(channels - 1, reference_channel)),
            None if channels == 0 => Err(ApmError::InvalidConfig(
                "capture has no channels".to_string(),
            )),
            None => Ok(Self::new(channels, None)),
        }
    }
}

/// One processing call's worth of capture.
#[derive(Clone, Debug)]
pub struct CaptureBlock {
    pub mics: Vec<AudioFrame>,
    pub reference: AudioFrame,
    pub timestamp_ns: u64,
}

/// Cuts an arbitrary-length interleaved capture into fixed-size blocks of
/// per-microphone mono frames plus a speaker reference.
pub struct CaptureChunker {
    layout: CaptureLayout,
    mic_channels: Vec<usize>,
    sample_rate: u32,
    block_frames: usize,
    sample_buffer: VecDeque<f32>,
    current_timestamp: u64,
    frames_emitted: u64,
}

impl CaptureChunker {
    pub fn new(layout: CaptureLayout, sample_rate: u32, block_frames: usize) -> Self {
        let channels = layout.capture_channels();
        Self {
            mic_channels: layout.microphone_channels(),
            layout,
            sample_rate,
            block_frames: block_frames.max(1),
            sample_buffer: VecDeque::with_capacity(block_frames * channels * 4),
            current_timestamp: 0,
            frames_emitted: 0,
        }
    }

    /// Chunker producing blocks of `block_ms` milliseconds.
    pub fn with_block_ms(layout: CaptureLayout, sample_rate: u32, block_ms: u32) -> Self {
        let block_frames = (sample_rate as u64 * block_ms as u64 / 1000) as usize;
        Self::new(layout, sample_rate, block_frames)
    }

    pub fn layout(&self) -> &CaptureLayout {
        &self.layout
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// Frames buffered but not yet emitted.
    pub fn pending_frames(&self) -> usize {
        self.sample_buffer.len() / self.layout.capture_channels().max(1)
    }

    /// Buffer interleaved samples captured at `timestamp_ns`.
    pub fn push(&mut self, interleaved: &[f32], timestamp_ns: u64) -> Result<()> {
        let channels = self.layout.capture_channels();
        if channels == 0 || interleaved.len() % channels != 0 {
            return Err(ApmError::InvalidFrame(format!(
                "{} samples do not fill whole {}-channel frames",
                interleaved.len(),
                channels
            )));
        }
        if self.sample_buffer.is_empty() && self.frames_emitted == 0 {
            self.current_timestamp = timestamp_ns;
        }
        self.sample_buffer.extend(interleaved.iter().copied());
        Ok(())
    }

    pub fn push_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        if frame.channels() as usize != self.layout.capture_channels() {
            return Err(ApmError::InvalidFrame(format!(
                "expected {} capture channels, got {}",
                self.layout.capture_channels(),
                frame.channels()
            )));
        }
        if frame.sample_rate() != self.sample_rate {
            return Err(ApmError::InvalidFrame(format!(
                "expected {}Hz capture, got {}Hz",
                self.sample_rate,
                frame.sample_rate()
            )));
        }
        self.push(frame.samples(), frame.metadata().timestamp_ns)
    }

    /// Next complete block, if enough frames are buffered.
    pub fn pop_block(&mut self) -> Option<CaptureBlock> {
        let needed = self.block_frames * self.layout.capture_channels();
        if needed == 0 || self.sample_buffer.len() < needed {
            return None;
        }
        let samples: Vec<f32> = self.sample_buffer.drain(..needed).collect();
        Some(self.split_block(&samples))
    }

    /// Emit the remaining frames zero-padded to a full block.
    pub fn flush(&mut self) -> Option<CaptureBlock> {
        if self.sample_buffer.is_empty() {
            return None;
        }
        let needed = self.block_frames * self.layout.capture_channels();
        let mut samples: Vec<f32> = self.sample_buffer.drain(..).collect();
        samples.resize(needed, 0.0);
        Some(self.split_block(&samples))
    }

    pub fn reset(&mut self) {
        self.sample_buffer.clear();
        self.current_timestamp = 0;
        self.frames_emitted = 0;
    }

    fn split_block(&mut self, samples: &[f32]) -> CaptureBlock {
        let channels = self.layout.capture_channels();
        let timestamp_ns = self.current_timestamp
            + (self.frames_emitted * 1_000_000_000) / self.sample_rate.max(1) as u64;
        self.frames_emitted += self.block_frames as u64;

        let extract = |ch: usize| -> AudioFrame {
            let mono: Vec<f32> = samples.iter().skip(ch).step_by(channels).copied().collect();
            let mut frame = AudioFrame::mono(mono, self.sample_rate);
            frame.metadata_mut().timestamp_ns = timestamp_ns;
            frame.compute_metadata();
            frame
        };

        let mics = self.mic_channels.iter().map(|&ch| extract(ch)).collect();
        let reference = match self.layout.reference_channel {
            Some(ch) => extract(ch),
            None => {
                let mut silent = AudioFrame::silent(self.block_frames, self.sample_rate, 1);
                silent.metadata_mut().timestamp_ns = timestamp_ns;
                silent.compute_metadata();
                silent
            }
        };

        CaptureBlock {
            mics,
            reference,
            timestamp_ns,
        }
    }
}
