use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub direction: DirectionConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum centroid distance to match a detection to an existing track,
    /// in the detector's coordinate space.
    pub max_match_distance: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_match_distance: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionConfig {
    /// Travel directions considered legal, as (dx, dy) vectors in screen
    /// space (y grows downward). Normalized once at classifier construction.
    pub allowed_directions: Vec<[f32; 2]>,
    /// Minimum displacement magnitude (normalized coordinates) across the
    /// history window before a direction is computed at all.
    pub movement_threshold: f32,
    /// Minimum cosine similarity against the best allowed direction for a
    /// frame to count as aligned.
    pub cosine_threshold: f32,
    /// Number of past centroids retained per track.
    pub history_len: usize,
    /// Consecutive misaligned frames required before a track is reported
    /// as wrong-way.
    pub confirm_frames: u32,
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self {
            // Vehicles moving with the monitored flow drift down-left in
            // frame; anything else is travelling against it.
            allowed_directions: vec![[-0.5, 1.0], [-1.0, 1.0]],
            movement_threshold: 0.07,
            cosine_threshold: 0.1,
            history_len: 5,
            confirm_frames: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Minimum wall-clock gap between two accepted captures, any track.
    pub cooldown_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { cooldown_ms: 1500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Static fix published at startup when no live provider is wired in.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Reverse-geocoding endpoint. None disables geocoding and the place
    /// name falls back to formatted coordinates.
    pub geocode_url: Option<String>,
    /// Minimum displacement in meters before the place name is refreshed.
    pub geocode_distance_threshold_m: f64,
    pub request_timeout_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            geocode_url: None,
            geocode_distance_threshold_m: 50.0,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory scanned recursively for detection log files.
    pub input_dir: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            input_dir: "detections".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory capture JPEGs and their JSON sidecars are written to.
    pub gallery_dir: String,
    pub jpeg_quality: u8,
    /// Remote record store endpoint. None disables the remote sink.
    pub record_url: Option<String>,
    /// Authenticated user attached to remote records; recorded as
    /// "anonymous" when absent.
    pub user_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            gallery_dir: "captures".to_string(),
            jpeg_quality: 95,
            record_url: None,
            user_id: None,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "wrongway_detection=info".to_string(),
        }
    }
}

/// One raw detection as produced by the external detector. Coordinates are
/// normalized to [0, 1] with the origin at the top-left corner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn cx(&self) -> f32 {
        (self.x1 + self.x2) * 0.5
    }

    pub fn cy(&self) -> f32 {
        (self.y1 + self.y2) * 0.5
    }

    pub fn bbox(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// A detection the pipeline can safely process: finite coordinates and
    /// a box that actually encloses something.
    pub fn is_valid(&self) -> bool {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        coords.iter().all(|c| c.is_finite()) && self.area() > 0.0 && self.confidence.is_finite()
    }
}

/// Raw RGB8 frame pixels, shared with capture events without copying.
#[derive(Debug, Clone)]
pub struct FrameImage {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

/// One frame's worth of input handed to the classification loop.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub frame_id: u64,
    /// Wall-clock arrival time, milliseconds since the Unix epoch. Drives
    /// the capture cooldown and event timestamps.
    pub epoch_ms: u64,
    /// Pass-through detector metric, surfaced to the renderer untouched.
    pub inference_time_ms: f64,
    pub image: Option<Arc<FrameImage>>,
    pub detections: Vec<Detection>,
}

/// Per-track direction verdict for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DirectionState {
    /// Fewer than two points of history; nothing to measure yet.
    InsufficientData,
    /// Displacement across the window is below the movement threshold.
    InsufficientMovement,
    /// Moving along (or near enough to) an allowed direction.
    Aligned,
    /// Sustained misalignment past the confirmation threshold.
    WrongWay,
}

impl DirectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientData => "TRACKING",
            Self::InsufficientMovement => "PAUSED",
            Self::Aligned => "OK",
            Self::WrongWay => "WRONG_WAY",
        }
    }

    /// Marker appended to the class label for the renderer.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::InsufficientData => "🔄",
            Self::InsufficientMovement => "⏸",
            Self::Aligned => "✅ OK",
            Self::WrongWay => "❌ WRONG WAY",
        }
    }
}

/// Renderer output: the input detection with its identity and verdict.
#[derive(Debug, Clone)]
pub struct LabeledDetection {
    pub detection: Detection,
    pub track_id: u32,
    pub state: DirectionState,
    /// Class label with the state marker appended, e.g. "car ❌ WRONG WAY".
    pub display_label: String,
}
