// src/direction.rs
//
// Travel-direction classifier. Per track, keeps a short centroid history,
// measures displacement across the whole retained window (which smooths
// single-frame detector jitter), and compares the normalized movement
// vector against the configured set of allowed directions by cosine
// similarity. A consecutive-frame counter provides hysteresis: one
// misaligned frame is noise, a sustained run is a violation.

use crate::registry::TrackEntry;
use crate::types::{DirectionConfig, DirectionState};
use anyhow::{bail, Result};
use tracing::debug;

pub struct DirectionClassifier {
    /// Allowed travel directions, unit length. Normalized once here so the
    /// per-frame dot products are plain cosine similarities.
    allowed: Vec<[f32; 2]>,
    movement_threshold: f32,
    cosine_threshold: f32,
    history_len: usize,
    confirm_frames: u32,
}

impl DirectionClassifier {
    pub fn new(config: &DirectionConfig) -> Result<Self> {
        if config.allowed_directions.is_empty() {
            bail!("direction classifier needs at least one allowed direction");
        }
        if config.history_len < 2 {
            bail!("history_len must be at least 2 to measure movement");
        }

        let mut allowed = Vec::with_capacity(config.allowed_directions.len());
        for dir in &config.allowed_directions {
            let mag = (dir[0] * dir[0] + dir[1] * dir[1]).sqrt();
            if !mag.is_finite() || mag <= 0.0 {
                bail!("allowed direction ({}, {}) has no length", dir[0], dir[1]);
            }
            allowed.push([dir[0] / mag, dir[1] / mag]);
        }

        Ok(Self {
            allowed,
            movement_threshold: config.movement_threshold,
            cosine_threshold: config.cosine_threshold,
            history_len: config.history_len,
            confirm_frames: config.confirm_frames,
        })
    }

    /// Fold one frame's centroid into a track's state and classify it.
    ///
    /// The wrong-direction streak is only touched when the frame actually
    /// qualifies for direction measurement: short histories and sub-threshold
    /// movement leave it as-is.
    pub fn classify(&self, track_id: u32, entry: &mut TrackEntry, cx: f32, cy: f32) -> DirectionState {
        entry.history.push_back((cx, cy));
        if entry.history.len() > self.history_len {
            entry.history.pop_front();
        }

        if entry.history.len() < 2 {
            return DirectionState::InsufficientData;
        }

        // Displacement across the whole retained window, not frame-to-frame.
        let (old_x, old_y) = entry.history[0];
        let dx = cx - old_x;
        let dy = cy - old_y;
        let magnitude = dx.hypot(dy);

        // The explicit zero check keeps this safe even with a zero
        // movement threshold configured.
        if magnitude <= 0.0 || magnitude < self.movement_threshold {
            return DirectionState::InsufficientMovement;
        }

        let mvx = dx / magnitude;
        let mvy = dy / magnitude;

        let mut best_similarity = -1.0f32;
        for dir in &self.allowed {
            let sim = dir[0] * mvx + dir[1] * mvy;
            best_similarity = best_similarity.max(sim);
        }

        debug!(
            "track T{}: dx={:.4} dy={:.4} similarity={:.2}",
            track_id, dx, dy, best_similarity
        );

        if best_similarity < self.cosine_threshold {
            entry.wrong_streak += 1;
        } else {
            entry.wrong_streak = 0;
        }

        if entry.wrong_streak >= self.confirm_frames {
            DirectionState::WrongWay
        } else {
            DirectionState::Aligned
        }
    }
}
