// src/pipeline/metrics.rs
//
// Process-wide observability counters. Cloned freely across tasks; every
// counter is shared behind an Arc and bumped with relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub detections_processed: Arc<AtomicU64>,
    pub detections_skipped: Arc<AtomicU64>,
    pub wrong_way_verdicts: Arc<AtomicU64>,
    pub captures_accepted: Arc<AtomicU64>,
    pub sink_successes: Arc<AtomicU64>,
    pub sink_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            detections_processed: Arc::new(AtomicU64::new(0)),
            detections_skipped: Arc::new(AtomicU64::new(0)),
            wrong_way_verdicts: Arc::new(AtomicU64::new(0)),
            captures_accepted: Arc::new(AtomicU64::new(0)),
            sink_successes: Arc::new(AtomicU64::new(0)),
            sink_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            fps: self.fps(),
            detections_processed: self.detections_processed.load(Ordering::Relaxed),
            detections_skipped: self.detections_skipped.load(Ordering::Relaxed),
            wrong_way_verdicts: self.wrong_way_verdicts.load(Ordering::Relaxed),
            captures_accepted: self.captures_accepted.load(Ordering::Relaxed),
            sink_successes: self.sink_successes.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub frames_dropped: u64,
    pub fps: f64,
    pub detections_processed: u64,
    pub detections_skipped: u64,
    pub wrong_way_verdicts: u64,
    pub captures_accepted: u64,
    pub sink_successes: u64,
    pub sink_failures: u64,
    pub elapsed_secs: f64,
}
