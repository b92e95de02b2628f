use crate::capture::CaptureBlock;
use crate::frame::AudioFrame;

/// One utterance's worth of capture for a given stream.
#[derive(Debug, Clone)]
pub struct CaptureBatch {
    pub stream_id: String,
    pub mics: Vec<AudioFrame>,
    pub reference: AudioFrame,
    /// Target azimuth in radians.
    pub direction: f32,
    /// Capture timestamp of the first frame in nanoseconds.
    pub timestamp_ns: u64,
}

impl CaptureBatch {
    pub fn from_block(stream_id: impl Into<String>, block: CaptureBlock, direction: f32) -> Self {
        Self {
            stream_id: stream_id.into(),
            mics: block.mics,
            reference: block.reference,
            direction,
            timestamp_ns: block.timestamp_ns,
        }
    }
}

/// Messages consumed by the stream worker thread.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Batch(CaptureBatch),
    /// Reset the adaptation state of one stream.
    Reset(String),
    /// Drop one stream's engines.
    Close(String),
}

impl WorkerMessage {
    pub fn stream_id(&self) -> &str {
        match self {
            WorkerMessage::Batch(batch) => &batch.stream_id,
            WorkerMessage::Reset(id) | WorkerMessage::Close(id) => id,
        }
    }
}
