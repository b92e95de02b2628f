use std::collections::HashMap;

use crate::processors::Stage;

/// Histogram for delay measurements
#[derive(Debug, Clone)]
pub struct DelayHistogram {
    // Buckets in microseconds: <1ms, <2ms, <5ms, <10ms, <20ms, <50ms, <100ms, >=100ms
    buckets: [u64; 8],
    bucket_limits_us: [u64; 7],
    total_samples: u64,
    sum_delay_us: u64,
    min_delay_us: u64,
    max_delay_us: u64,
}

/// Summary of one stage's recorded delays, in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct DelaySummary {
    pub samples: u64,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub buckets: [u64; 8],
}

impl Default for DelayHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayHistogram {
    pub fn new() -> Self {
        Self {
            buckets: [0; 8],
            bucket_limits_us: [1000, 2000, 5000, 10000, 20000, 50000, 100000],
            total_samples: 0,
            sum_delay_us: 0,
            min_delay_us: u64::MAX,
            max_delay_us: 0,
        }
    }

    pub fn record(&mut self, delay_ns: u64) {
        let delay_us = delay_ns / 1000;

        self.min_delay_us = self.min_delay_us.min(delay_us);
        self.max_delay_us = self.max_delay_us.max(delay_us);
        self.sum_delay_us += delay_us;
        self.total_samples += 1;

        let bucket_idx = self
            .bucket_limits_us
            .iter()
            .position(|&limit| delay_us < limit)
            .unwrap_or(self.bucket_limits_us.len());
        self.buckets[bucket_idx] += 1;
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    pub fn summary(&self) -> DelaySummary {
        if self.total_samples == 0 {
            return DelaySummary {
                samples: 0,
                min_ms: 0.0,
                avg_ms: 0.0,
                max_ms: 0.0,
                buckets: self.buckets,
            };
        }
        DelaySummary {
            samples: self.total_samples,
            min_ms: self.min_delay_us as f64 / 1000.0,
            avg_ms: self.sum_delay_us as f64 / self.total_samples as f64 / 1000.0,
            max_ms: self.max_delay_us as f64 / 1000.0,
            buckets: self.buckets,
        }
    }
}

/// Per-stage latency histograms kept by the stream worker.
#[derive(Debug, Default)]
pub struct DelayTracker {
    measurements: HashMap<Stage, DelayHistogram>,
}

impl DelayTracker {
    pub fn new() -> Self {
        let measurements = Stage::ALL
            .iter()
            .map(|&stage| (stage, DelayHistogram::new()))
            .collect();
        Self { measurements }
    }

    pub fn record(&mut self, stage: Stage, delay_ns: u64) {
        self.measurements.entry(stage).or_default().record(delay_ns);
    }

    pub fn summary(&self, stage: Stage) -> Option<DelaySummary> {
        self.measurements.get(&stage).map(DelayHistogram::summary)
    }

    /// Summaries for every stage that has recorded at least one delay, in
    /// pipeline order.
    pub fn summaries(&self) -> Vec<(Stage, DelaySummary)> {
        Stage::ALL
            .iter()
            .filter_map(|&stage| {
                self.measurements
                    .get(&stage)
                    .filter(|h| h.total_samples() > 0)
                    .map(|h| (stage, h.summary()))
            })
            .collect()
    }
}
