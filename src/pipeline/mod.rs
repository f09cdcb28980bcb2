// src/pipeline/mod.rs
//
// Per-frame orchestration. One logical writer: exactly one frame's
// detections flow through here at a time, strictly in arrival order, and
// every piece of per-track state (tracker map, histories, streaks, captured
// flags, cooldown) is mutated only from this call path.

pub mod channel;
pub mod metrics;

use crate::capture::{CaptureCoordinator, CaptureEvent};
use crate::direction::DirectionClassifier;
use crate::location::LocationSnapshot;
use crate::registry::TrackRegistry;
use crate::tracker::CentroidTracker;
use crate::types::{Config, DirectionState, FramePacket, LabeledDetection};
use anyhow::Result;
use metrics::PipelineMetrics;
use tracing::{debug, info};

/// Everything one frame produces: renderer labels and any capture events
/// the coordinator accepted. The inference-time metric passes through.
#[derive(Debug)]
pub struct FrameOutput {
    pub frame_id: u64,
    pub labeled: Vec<LabeledDetection>,
    pub captures: Vec<CaptureEvent>,
    pub inference_time_ms: f64,
}

pub struct DetectionPipeline {
    tracker: CentroidTracker,
    classifier: DirectionClassifier,
    coordinator: CaptureCoordinator,
    registry: TrackRegistry,
    metrics: PipelineMetrics,
}

impl DetectionPipeline {
    pub fn new(config: &Config, metrics: PipelineMetrics) -> Result<Self> {
        Ok(Self {
            tracker: CentroidTracker::new(&config.tracker),
            classifier: DirectionClassifier::new(&config.direction)?,
            coordinator: CaptureCoordinator::new(&config.capture),
            registry: TrackRegistry::new(),
            metrics,
        })
    }

    /// Run one frame through track → classify → capture → prune.
    pub fn process_frame(
        &mut self,
        packet: &FramePacket,
        location: &LocationSnapshot,
    ) -> FrameOutput {
        self.metrics.inc(&self.metrics.total_frames);

        // Degenerate detections are dropped up front so they can neither
        // claim a track nor corrupt anyone's history.
        let mut valid = Vec::with_capacity(packet.detections.len());
        for det in &packet.detections {
            if det.is_valid() {
                valid.push(det.clone());
                self.metrics.inc(&self.metrics.detections_processed);
            } else {
                debug!(
                    "frame {}: skipping degenerate detection {:?}",
                    packet.frame_id,
                    det.bbox()
                );
                self.metrics.inc(&self.metrics.detections_skipped);
            }
        }

        let tracked = self.tracker.track(&valid);

        let mut labeled = Vec::with_capacity(tracked.len());
        let mut captures = Vec::new();

        for (obj, det) in tracked.iter().zip(valid.iter()) {
            let entry = self.registry.entry(obj.track_id);
            let state = self.classifier.classify(obj.track_id, entry, obj.cx, obj.cy);

            if state == DirectionState::WrongWay {
                self.metrics.inc(&self.metrics.wrong_way_verdicts);
                if let Some(event) = self.coordinator.consider(
                    obj,
                    det,
                    state,
                    entry,
                    packet.epoch_ms,
                    packet.image.clone(),
                    location,
                ) {
                    self.metrics.inc(&self.metrics.captures_accepted);
                    captures.push(event);
                }
            }

            debug!(
                "frame {}: T{} {} -> {}",
                packet.frame_id,
                obj.track_id,
                det.label,
                state.as_str()
            );

            labeled.push(LabeledDetection {
                detection: det.clone(),
                track_id: obj.track_id,
                state,
                display_label: format!("{} {}", det.label, state.marker()),
            });
        }

        // Lifecycle: everything keyed by a track id that did not survive
        // this frame dies with it.
        self.registry.prune(&self.tracker.live_ids());

        FrameOutput {
            frame_id: packet.frame_id,
            labeled,
            captures,
            inference_time_ms: packet.inference_time_ms,
        }
    }

    /// Teardown: forget every track and restart identity allocation.
    pub fn reset(&mut self) {
        info!("pipeline reset: clearing all per-track state");
        self.tracker.reset();
        self.registry.clear();
        self.coordinator.reset();
    }

    pub fn tracked_count(&self) -> usize {
        self.registry.len()
    }
}
