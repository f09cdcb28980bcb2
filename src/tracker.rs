// src/tracker.rs
//
// Centroid-based multi-object tracker. Assigns stable integer identities to
// per-frame detections by greedy nearest-centroid matching against the
// previous frame's tracks.
//
// Design:
//   - Greedy, order-dependent matching: detections are processed in input
//     order and each claims the nearest unclaimed track within threshold.
//     Not a globally optimal assignment, and deliberately so — the simple
//     scan is predictable and sufficient for sparse road scenes.
//   - No coasting: a track missed for a single frame is gone, and its id is
//     never reissued. Re-entry always yields a fresh identity.

use crate::types::{Detection, TrackerConfig};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One detection resolved to an identity for this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedObject {
    pub track_id: u32,
    pub cx: f32,
    pub cy: f32,
}

pub struct CentroidTracker {
    /// Last known centroid per live track. Keys are exactly the ids claimed
    /// in the most recent frame.
    last_seen: HashMap<u32, (f32, f32)>,
    next_id: u32,
    max_match_distance: f32,
}

impl CentroidTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            last_seen: HashMap::new(),
            next_id: 0,
            max_match_distance: config.max_match_distance,
        }
    }

    /// Assign identities to one frame of detections.
    ///
    /// Returns exactly one entry per input detection, in input order. Tracks
    /// not claimed by any detection this frame are dropped.
    pub fn track(&mut self, detections: &[Detection]) -> Vec<TrackedObject> {
        let mut result = Vec::with_capacity(detections.len());
        let mut claimed: HashSet<u32> = HashSet::with_capacity(detections.len());

        for det in detections {
            let cx = det.cx();
            let cy = det.cy();

            let mut best_id: Option<u32> = None;
            let mut min_dist = f32::MAX;

            for (&id, &(px, py)) in &self.last_seen {
                if claimed.contains(&id) {
                    continue;
                }
                let d = (cx - px).hypot(cy - py);
                if d < min_dist && d < self.max_match_distance {
                    min_dist = d;
                    best_id = Some(id);
                }
            }

            let track_id = match best_id {
                Some(id) => id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    debug!("new track T{} at ({:.3}, {:.3})", id, cx, cy);
                    id
                }
            };

            claimed.insert(track_id);
            self.last_seen.insert(track_id, (cx, cy));
            result.push(TrackedObject { track_id, cx, cy });
        }

        // Tracks that went unclaimed this frame are dead for good.
        self.last_seen.retain(|id, _| claimed.contains(id));

        result
    }

    /// Ids of tracks visible in the most recent frame.
    pub fn live_ids(&self) -> HashSet<u32> {
        self.last_seen.keys().copied().collect()
    }

    pub fn track_count(&self) -> usize {
        self.last_seen.len()
    }

    /// Drop all state and restart identity allocation from zero.
    pub fn reset(&mut self) {
        self.last_seen.clear();
        self.next_id = 0;
    }
}
