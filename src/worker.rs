use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::ApmConfig;
use crate::delay_measurement::DelayTracker;
use crate::frame::AudioFrame;
use crate::messages::{CaptureBatch, WorkerMessage};
use crate::processors::Stage;
use crate::stats::{RuntimeStats, RuntimeStatsHandle};
use crate::system::ApmSystem;
use crate::translation::TranslationEngine;

/// Consumer of projected speaker frames. Frame order follows the physical
/// speaker order.
pub trait PlaybackSink: Send {
    fn deliver(&mut self, stream_id: &str, frames: Vec<AudioFrame>) -> Result<()>;
}

impl<F> PlaybackSink for F
where
    F: FnMut(&str, Vec<AudioFrame>) -> Result<()> + Send,
{
    fn deliver(&mut self, stream_id: &str, frames: Vec<AudioFrame>) -> Result<()> {
        self(stream_id, frames)
    }
}

/// Drives one [`ApmSystem`] per stream id from a message channel.
///
/// Streams are created lazily on their first batch and share the worker's
/// config, translator and stats handle. Echo health in the shared stats
/// reflects the most recently processed stream.
pub struct StreamWorker<S: PlaybackSink> {
    rx: Receiver<WorkerMessage>,
    stop_rx: Receiver<()>,
    config: ApmConfig,
    translator: Arc<dyn TranslationEngine>,
    sink: S,
    streams: HashMap<String, ApmSystem>,
    runtime: tokio::runtime::Runtime,
    delay_tracker: DelayTracker,
    stats: RuntimeStatsHandle,
}

impl<S: PlaybackSink> StreamWorker<S> {
    fn select_total_delay(capture_ns: u64, now_ns: u64, processing_ns: u64) -> u64 {
        let timestamp_delay = now_ns.saturating_sub(capture_ns);
        if timestamp_delay > 0 && timestamp_delay < 10_000_000_000 {
            timestamp_delay
        } else {
            processing_ns
        }
    }

    pub fn new(
        rx: Receiver<WorkerMessage>,
        stop_rx: Receiver<()>,
        config: ApmConfig,
        translator: Arc<dyn TranslationEngine>,
        sink: S,
        stats: RuntimeStatsHandle,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("apm-stream")
            .enable_all()
            .build()
            .context("failed to build stream worker runtime")?;

        Ok(Self {
            rx,
            stop_rx,
            config,
            translator,
            sink,
            streams: HashMap::new(),
            runtime,
            delay_tracker: DelayTracker::new(),
            stats,
        })
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn delay_tracker(&self) -> &DelayTracker {
        &self.delay_tracker
    }

    pub fn stats(&self) -> &RuntimeStatsHandle {
        &self.stats
    }

    pub fn run(&mut self) {
        info!(translator = self.translator.name(), "stream worker started");
        loop {
            let msg = crossbeam_channel::select! {
                recv(self.stop_rx) -> _ => break,
                recv(self.rx) -> msg => match msg {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };
            self.handle(msg);
        }

        let snap = self.stats.snapshot();
        info!(
            streams = self.streams.len(),
            batches = snap.worker_batches_in,
            delivered = snap.worker_batches_delivered,
            errors = snap.processing_errors + snap.sink_errors,
            "stream worker stopped"
        );
    }

    fn handle(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Batch(batch) => self.process_batch(batch),
            WorkerMessage::Reset(stream_id) => match self.streams.get(&stream_id) {
                Some(system) => {
                    self.runtime.block_on(system.reset_all());
                    self.stats.update(|s| s.streams_reset += 1);
                }
                None => debug!(stream = %stream_id, "reset for unknown stream ignored"),
            },
            WorkerMessage::Close(stream_id) => {
                if self.streams.remove(&stream_id).is_some() {
                    self.stats.update(|s| s.streams_closed += 1);
                    info!(stream = %stream_id, "stream closed");
                }
            }
        }
    }

    fn system_for(&mut self, stream_id: &str) -> Result<ApmSystem> {
        if let Some(system) = self.streams.get(stream_id) {
            return Ok(system.clone());
        }
        let system = ApmSystem::with_stats(
            self.config.clone(),
            self.translator.clone(),
            self.stats.clone(),
        )
        .map_err(|e| anyhow!("failed to create stream {stream_id}: {e}"))?;
        self.streams.insert(stream_id.to_string(), system.clone());
        self.stats.update(|s| s.streams_opened += 1);
        info!(stream = %stream_id, "stream opened");
        Ok(system)
    }

    fn process_batch(&mut self, batch: CaptureBatch) {
        self.stats.update(|s| s.worker_batches_in += 1);
        let system = match self.system_for(&batch.stream_id) {
            Ok(system) => system,
            Err(e) => {
                self.stats.update(|s| s.processing_errors += 1);
                warn!("{e:#}");
                return;
            }
        };

        let before = self.stats.snapshot();
        let started = Instant::now();
        let CaptureBatch {
            stream_id,
            mics,
            reference,
            direction,
            timestamp_ns,
        } = batch;
        let result = self
            .runtime
            .block_on(async move { system.process_async(mics, reference, direction).await });
        let processing_ns = started.elapsed().as_nanos() as u64;
        self.record_delays(&before, timestamp_ns, processing_ns);

        match result {
            Ok(frames) if frames.is_empty() => {}
            Ok(frames) => match self.sink.deliver(&stream_id, frames) {
                Ok(()) => self.stats.update(|s| s.worker_batches_delivered += 1),
                Err(e) => {
                    self.stats.update(|s| s.sink_errors += 1);
                    warn!(stream = %stream_id, "playback sink error: {e:#}");
                }
            },
            Err(e) => {
                self.stats.update(|s| s.processing_errors += 1);
                warn!(stream = %stream_id, "processing error: {e}");
            }
        }
    }

    /// Feed per-stage deltas of this batch into the histograms.
    fn record_delays(&mut self, before: &RuntimeStats, capture_ns: u64, processing_ns: u64) {
        let after = self.stats.snapshot();
        for stage in Stage::ALL {
            if stage == Stage::Total {
                continue;
            }
            let (b, a) = (before.stage(stage), after.stage(stage));
            if a.samples > b.samples {
                let delta = a.total_ns.saturating_sub(b.total_ns);
                self.delay_tracker.record(stage, delta.min(u64::MAX as u128) as u64);
            }
        }
        let total = Self::select_total_delay(capture_ns, now_ns(), processing_ns);
        self.delay_tracker.record(Stage::Total, total);
    }
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Owner side of a [`StreamWorker`] running on its own thread.
pub struct WorkerHandle<S: PlaybackSink + 'static> {
    tx: Option<Sender<WorkerMessage>>,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<StreamWorker<S>>>,
    stats: RuntimeStatsHandle,
}

impl<S: PlaybackSink + 'static> WorkerHandle<S> {
    /// Spawn a worker thread with unbounded input.
    pub fn spawn(
        config: ApmConfig,
        translator: Arc<dyn TranslationEngine>,
        sink: S,
        stats: RuntimeStatsHandle,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let mut worker = StreamWorker::new(rx, stop_rx, config, translator, sink, stats.clone())?;

        let thread = std::thread::Builder::new()
            .name("apm-worker".to_string())
            .spawn(move || {
                worker.run();
                worker
            })
            .context("failed to spawn stream worker thread")?;

        Ok(Self {
            tx: Some(tx),
            stop_tx,
            thread: Some(thread),
            stats,
        })
    }

    pub fn send(&self, msg: WorkerMessage) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or_else(|| anyhow!("worker input already closed"))?
            .send(msg)
            .map_err(|_| anyhow!("stream worker has exited"))
    }

    pub fn stats(&self) -> &RuntimeStatsHandle {
        &self.stats
    }

    /// Close the input, let the worker drain every queued message, and join.
    pub fn finish(mut self) -> Result<StreamWorker<S>> {
        self.tx.take();
        self.join()
    }

    /// Stop without draining queued messages.
    pub fn stop(mut self) -> Result<StreamWorker<S>> {
        let _ = self.stop_tx.try_send(());
        self.join()
    }

    fn join(&mut self) -> Result<StreamWorker<S>> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("stream worker already joined"))?;
        thread.join().map_err(|_| anyhow!("stream worker thread panicked"))
    }
}

impl<S: PlaybackSink + 'static> Drop for WorkerHandle<S> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.stop_tx.try_send(());
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::{MockMode, MockTranslationEngine};
    use std::sync::Mutex;
    use std::time::Duration;

    type Delivered = Arc<Mutex<Vec<(String, usize)>>>;

    fn collecting_sink(log: Delivered) -> impl PlaybackSink {
        move |stream: &str, frames: Vec<AudioFrame>| -> Result<()> {
            log.lock().unwrap().push((stream.to_string(), frames.len()));
            Ok(())
        }
    }

    fn translator() -> Arc<dyn TranslationEngine> {
        Arc::new(MockTranslationEngine::new(Duration::ZERO).with_mode(MockMode::Loopback))
    }

    fn batch(stream: &str, speech: bool) -> WorkerMessage {
        let mic = if speech {
            AudioFrame::tone(960, 48_000, 2_000.0, 0.5, 0)
        } else {
            AudioFrame::silent(960, 48_000, 1)
        };
        WorkerMessage::Batch(CaptureBatch {
            stream_id: stream.to_string(),
            mics: vec![mic; 4],
            reference: AudioFrame::silent(960, 48_000, 1),
            direction: 0.0,
            timestamp_ns: 0,
        })
    }

    fn run_worker<S: PlaybackSink>(sink: S, messages: Vec<WorkerMessage>) -> StreamWorker<S> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let mut worker = StreamWorker::new(
            rx,
            stop_rx,
            ApmConfig::default(),
            translator(),
            sink,
            RuntimeStatsHandle::new(),
        )
        .unwrap();
        for msg in messages {
            tx.send(msg).unwrap();
        }
        drop(tx);
        worker.run();
        worker
    }

    #[test]
    fn streams_keep_independent_state() {
        let log: Delivered = Default::default();
        let worker = run_worker(
            collecting_sink(log.clone()),
            vec![batch("a", true), batch("b", false), batch("a", false)],
        );

        // "a" bridges its silence through hangover, "b" never heard speech
        assert_eq!(
            *log.lock().unwrap(),
            vec![("a".to_string(), 3), ("a".to_string(), 3)]
        );
        assert_eq!(worker.stream_count(), 2);

        let snap = worker.stats().snapshot();
        assert_eq!(snap.worker_batches_in, 3);
        assert_eq!(snap.worker_batches_delivered, 2);
        assert_eq!(snap.streams_opened, 2);
        assert_eq!(snap.utterances_gated, 1);
    }

    #[test]
    fn reset_and_close_messages() {
        let log: Delivered = Default::default();
        let worker = run_worker(
            collecting_sink(log.clone()),
            vec![
                batch("a", true),
                WorkerMessage::Reset("a".to_string()),
                batch("a", false),
                WorkerMessage::Reset("ghost".to_string()),
                WorkerMessage::Close("a".to_string()),
            ],
        );

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(worker.stream_count(), 0);
        let snap = worker.stats().snapshot();
        assert_eq!(snap.streams_reset, 1);
        assert_eq!(snap.streams_closed, 1);
    }

    #[test]
    fn sink_errors_are_counted_not_fatal() {
        let failing = |_: &str, _: Vec<AudioFrame>| -> Result<()> { Err(anyhow!("device gone")) };
        let worker = run_worker(failing, vec![batch("a", true), batch("a", true)]);

        let snap = worker.stats().snapshot();
        assert_eq!(snap.sink_errors, 2);
        assert_eq!(snap.worker_batches_delivered, 0);
    }

    #[test]
    fn delay_tracker_sees_every_stage_of_translated_batches() {
        let worker = run_worker(collecting_sink(Default::default()), vec![batch("a", true)]);
        let stages: Vec<Stage> = worker
            .delay_tracker()
            .summaries()
            .into_iter()
            .map(|(stage, _)| stage)
            .collect();
        assert_eq!(stages, Stage::ALL.to_vec());
    }

    #[test]
    fn total_delay_prefers_plausible_timestamps() {
        type W = StreamWorker<fn(&str, Vec<AudioFrame>) -> Result<()>>;
        assert_eq!(W::select_total_delay(1_000, 2_000, 777), 1_000);
        assert_eq!(W::select_total_delay(1_000, 1_000, 777), 777);
        assert_eq!(W::select_total_delay(0, 11_000_000_000, 888), 888);
    }

    #[test]
    fn spawned_worker_drains_on_finish() {
        let log: Delivered = Default::default();
        let handle = WorkerHandle::spawn(
            ApmConfig::default(),
            translator(),
            collecting_sink(log.clone()),
            RuntimeStatsHandle::new(),
        )
        .unwrap();
        for _ in 0..3 {
            handle.send(batch("room", true)).unwrap();
        }
        let worker = handle.finish().unwrap();

        assert_eq!(log.lock().unwrap().len(), 3);
        assert_eq!(worker.stats().snapshot().worker_batches_delivered, 3);
    }

    #[test]
    fn stopped_worker_exits() {
        let handle = WorkerHandle::spawn(
            ApmConfig::default(),
            translator(),
            collecting_sink(Default::default()),
            RuntimeStatsHandle::new(),
        )
        .unwrap();
        let worker = handle.stop().unwrap();
        assert_eq!(worker.stream_count(), 0);
    }
}
