// src/capture.rs
//
// Violation capture coordination. Two independent guards stand between a
// wrong-way verdict and an emitted capture event:
//
//   1. CooldownGate — process-wide rate limiter: no two accepted captures
//      closer than the cooldown window, regardless of track.
//   2. Per-track one-shot flag (TrackRegistry::captured) — at most one
//      accepted capture per continuously-visible violation.
//
// Evaluation order matters: the cooldown is checked first, and a cooldown
// rejection leaves the one-shot flag unset so the same track can retry on
// a later frame once the window clears.

use crate::location::LocationSnapshot;
use crate::registry::TrackEntry;
use crate::tracker::TrackedObject;
use crate::types::{CaptureConfig, Detection, DirectionState, FrameImage};
use chrono::{Local, TimeZone};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Global rate limiter over accepted captures. Holds the wall-clock time of
/// the last acceptance and refuses anything inside the window.
#[derive(Debug)]
pub struct CooldownGate {
    window_ms: u64,
    last_accept_ms: Option<u64>,
}

impl CooldownGate {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_accept_ms: None,
        }
    }

    pub fn permits(&self, now_ms: u64) -> bool {
        match self.last_accept_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.window_ms,
            None => true,
        }
    }

    /// Record an acceptance. Callers check permits() first.
    pub fn arm(&mut self, now_ms: u64) {
        self.last_accept_ms = Some(now_ms);
    }

    pub fn reset(&mut self) {
        self.last_accept_ms = None;
    }
}

/// Everything the external sinks need to persist one violation.
#[derive(Debug, Clone)]
pub struct CaptureEvent {
    pub event_id: Uuid,
    pub track_id: u32,
    pub bounding_box: [f32; 4],
    /// Class label as reported by the detector, e.g. "car".
    pub vehicle_label: String,
    pub image: Option<Arc<FrameImage>>,
    pub timestamp_ms: u64,
    pub formatted_timestamp: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: String,
}

pub struct CaptureCoordinator {
    gate: CooldownGate,
}

impl CaptureCoordinator {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            gate: CooldownGate::new(config.cooldown_ms),
        }
    }

    /// Consider one track for capture given its verdict for this frame.
    ///
    /// Returns an event for at most one qualifying (track, visibility span)
    /// pair, subject to the global cooldown. Never blocks; emission to the
    /// sinks is the caller's problem.
    #[allow(clippy::too_many_arguments)]
    pub fn consider(
        &mut self,
        tracked: &TrackedObject,
        detection: &Detection,
        state: DirectionState,
        entry: &mut TrackEntry,
        now_ms: u64,
        image: Option<Arc<FrameImage>>,
        location: &LocationSnapshot,
    ) -> Option<CaptureEvent> {
        if state != DirectionState::WrongWay || entry.captured {
            return None;
        }

        // Cooldown first. Rejection must NOT consume the one-shot flag —
        // the track stays eligible for a later frame.
        if !self.gate.permits(now_ms) {
            debug!(
                "capture suppressed for T{}: inside cooldown window",
                tracked.track_id
            );
            return None;
        }

        entry.captured = true;
        self.gate.arm(now_ms);

        let event = CaptureEvent {
            event_id: Uuid::new_v4(),
            track_id: tracked.track_id,
            bounding_box: detection.bbox(),
            vehicle_label: detection.label.clone(),
            image,
            timestamp_ms: now_ms,
            formatted_timestamp: format_timestamp(now_ms),
            latitude: location.fix.as_ref().map(|f| f.latitude),
            longitude: location.fix.as_ref().map(|f| f.longitude),
            location_name: location.place_name.clone(),
        };

        info!(
            "📸 capture accepted: T{} ({}) at {} [{}]",
            event.track_id, event.vehicle_label, event.formatted_timestamp, event.location_name
        );

        Some(event)
    }

    pub fn reset(&mut self) {
        self.gate.reset();
    }
}

fn format_timestamp(epoch_ms: u64) -> String {
    match Local.timestamp_millis_opt(epoch_ms as i64).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch_ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::GeoFix;
    use crate::registry::TrackRegistry;

    fn car_at(cx: f32, cy: f32) -> Detection {
        Detection {
            x1: cx - 0.05,
            y1: cy - 0.05,
            x2: cx + 0.05,
            y2: cy + 0.05,
            label: "car".to_string(),
            confidence: 0.9,
        }
    }

    fn tracked(id: u32) -> TrackedObject {
        TrackedObject {
            track_id: id,
            cx: 0.5,
            cy: 0.5,
        }
    }

    fn snapshot() -> LocationSnapshot {
        LocationSnapshot {
            fix: Some(GeoFix {
                latitude: 13.7563,
                longitude: 100.5018,
            }),
            place_name: "Phaya Thai, Bangkok".to_string(),
        }
    }

    #[test]
    fn test_cooldown_gate_standalone() {
        let mut gate = CooldownGate::new(1500);
        assert!(gate.permits(10_000), "empty gate always permits");
        gate.arm(10_000);
        assert!(!gate.permits(10_001));
        assert!(!gate.permits(11_499));
        assert!(gate.permits(11_500), "window boundary is inclusive");
    }

    #[test]
    fn test_first_capture_accepted_and_flagged() {
        let mut coord = CaptureCoordinator::new(&CaptureConfig::default());
        let mut reg = TrackRegistry::new();
        let det = car_at(0.5, 0.5);

        let event = coord.consider(
            &tracked(1),
            &det,
            DirectionState::WrongWay,
            reg.entry(1),
            50_000,
            None,
            &snapshot(),
        );

        let event = event.expect("first wrong-way capture must be accepted");
        assert_eq!(event.track_id, 1);
        assert_eq!(event.vehicle_label, "car");
        assert_eq!(event.timestamp_ms, 50_000);
        assert_eq!(event.latitude, Some(13.7563));
        assert_eq!(event.location_name, "Phaya Thai, Bangkok");
        assert!(reg.entry(1).captured);
    }

    #[test]
    fn test_cooldown_rejection_preserves_retry_eligibility() {
        let mut coord = CaptureCoordinator::new(&CaptureConfig::default());
        let mut reg = TrackRegistry::new();
        let det = car_at(0.5, 0.5);

        // Track 1 captures at t=50s.
        assert!(coord
            .consider(&tracked(1), &det, DirectionState::WrongWay, reg.entry(1), 50_000, None, &snapshot())
            .is_some());

        // Track 2 violates 400ms later: inside the window, rejected, and
        // crucially its flag stays unset.
        let second = coord.consider(
            &tracked(2),
            &det,
            DirectionState::WrongWay,
            reg.entry(2),
            50_400,
            None,
            &snapshot(),
        );
        assert!(second.is_none());
        assert!(!reg.entry(2).captured, "rejection must not consume the one-shot");

        // Once the window clears, track 2 gets its capture.
        let retry = coord.consider(
            &tracked(2),
            &det,
            DirectionState::WrongWay,
            reg.entry(2),
            51_600,
            None,
            &snapshot(),
        );
        assert!(retry.is_some(), "track is eligible again after the cooldown");
        assert!(reg.entry(2).captured);
    }

    #[test]
    fn test_one_shot_per_visibility_span() {
        let mut coord = CaptureCoordinator::new(&CaptureConfig::default());
        let mut reg = TrackRegistry::new();
        let det = car_at(0.5, 0.5);

        assert!(coord
            .consider(&tracked(3), &det, DirectionState::WrongWay, reg.entry(3), 50_000, None, &snapshot())
            .is_some());

        // Same track, long after the cooldown: still suppressed by its flag.
        let repeat = coord.consider(
            &tracked(3),
            &det,
            DirectionState::WrongWay,
            reg.entry(3),
            60_000,
            None,
            &snapshot(),
        );
        assert!(repeat.is_none(), "a captured track never captures twice");
    }

    #[test]
    fn test_only_wrong_way_states_capture() {
        let mut coord = CaptureCoordinator::new(&CaptureConfig::default());
        let mut reg = TrackRegistry::new();
        let det = car_at(0.5, 0.5);

        for state in [
            DirectionState::InsufficientData,
            DirectionState::InsufficientMovement,
            DirectionState::Aligned,
        ] {
            let out = coord.consider(&tracked(1), &det, state, reg.entry(1), 50_000, None, &snapshot());
            assert!(out.is_none());
            assert!(!reg.entry(1).captured);
        }
    }

    #[test]
    fn test_missing_fix_yields_empty_coordinates() {
        let mut coord = CaptureCoordinator::new(&CaptureConfig::default());
        let mut reg = TrackRegistry::new();
        let det = car_at(0.5, 0.5);
        let loc = LocationSnapshot::default();

        let event = coord
            .consider(
                &tracked(1),
                &det,
                DirectionState::WrongWay,
                reg.entry(1),
                50_000,
                None,
                &loc,
            )
            .unwrap();
        assert_eq!(event.latitude, None);
        assert_eq!(event.longitude, None);
        assert_eq!(event.location_name, "Location: Not available");
    }
}
