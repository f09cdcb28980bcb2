// src/export.rs
//
// Capture sinks. A capture event fans out to two independent stores:
//
//   - GalleryStore: JPEG of the raw frame plus a JSON sidecar, written to
//     the local gallery directory.
//   - RecordStore: metadata record POSTed to a remote collection endpoint,
//     attributed to the configured user or "anonymous".
//
// The dispatcher spawns one fire-and-forget task per sink. A sink failure
// is logged and counted, never retried and never fed back into the
// classification state — the captured flag stays set either way.

use crate::capture::CaptureEvent;
use crate::pipeline::metrics::PipelineMetrics;
use crate::types::ExportConfig;
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use chrono::Local;
use serde::Serialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Saves capture JPEGs and JSON sidecars to the local filesystem.
pub struct GalleryStore {
    dir: PathBuf,
    jpeg_quality: u8,
}

#[derive(Debug, Serialize)]
struct CaptureSidecar<'a> {
    event_id: String,
    track_id: u32,
    vehicle_type: &'a str,
    bounding_box: [f32; 4],
    captured_at: u64,
    captured_at_formatted: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    location_name: &'a str,
}

impl GalleryStore {
    pub fn new(config: &ExportConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.gallery_dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create gallery dir {}", dir.display()))?;
        Ok(Self {
            dir,
            jpeg_quality: config.jpeg_quality,
        })
    }

    /// Write the event's frame (when present) and its sidecar. Returns the
    /// sidecar path.
    pub fn save(&self, event: &CaptureEvent) -> Result<PathBuf> {
        let file_stamp = Local::now().format("%Y%m%d_%H%M%S");
        let stem = format!("wrongway_{}_t{}", file_stamp, event.track_id);

        if let Some(image) = &event.image {
            let jpeg = encode_rgb_to_jpeg(&image.data, image.width, image.height, self.jpeg_quality)
                .context("failed to encode capture frame")?;
            let jpeg_path = self.dir.join(format!("{stem}.jpg"));
            std::fs::write(&jpeg_path, &jpeg)
                .with_context(|| format!("failed to write {}", jpeg_path.display()))?;
            info!("saved capture image {}", jpeg_path.display());
        }

        let sidecar = CaptureSidecar {
            event_id: event.event_id.to_string(),
            track_id: event.track_id,
            vehicle_type: &event.vehicle_label,
            bounding_box: event.bounding_box,
            captured_at: event.timestamp_ms,
            captured_at_formatted: &event.formatted_timestamp,
            latitude: event.latitude,
            longitude: event.longitude,
            location_name: &event.location_name,
        };
        let sidecar_path = self.dir.join(format!("{stem}.json"));
        let body = serde_json::to_vec_pretty(&sidecar)?;
        std::fs::write(&sidecar_path, body)
            .with_context(|| format!("failed to write {}", sidecar_path.display()))?;

        Ok(sidecar_path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Remote detection-record sink.
pub struct RecordStore {
    http_client: reqwest::Client,
    url: String,
    user_id: String,
}

#[derive(Debug, Serialize)]
struct DetectionRecord<'a> {
    event_id: String,
    captured_at: u64,
    captured_at_formatted: &'a str,
    location_name: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    vehicle_type: &'a str,
    user_id: &'a str,
    /// JPEG of the capture frame, base64, when a frame was attached.
    image_jpeg_base64: Option<String>,
}

impl RecordStore {
    pub fn new(config: &ExportConfig) -> Result<Self> {
        let url = config
            .record_url
            .clone()
            .ok_or_else(|| anyhow!("record store requires export.record_url"))?;
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build record store HTTP client")?;
        Ok(Self {
            http_client,
            url,
            user_id: config
                .user_id
                .clone()
                .unwrap_or_else(|| "anonymous".to_string()),
        })
    }

    pub async fn save(&self, event: &CaptureEvent, jpeg_quality: u8) -> Result<()> {
        let image_jpeg_base64 = event.image.as_ref().and_then(|image| {
            encode_rgb_to_jpeg(&image.data, image.width, image.height, jpeg_quality)
                .map(|jpeg| base64::engine::general_purpose::STANDARD.encode(jpeg))
        });

        let record = DetectionRecord {
            event_id: event.event_id.to_string(),
            captured_at: event.timestamp_ms,
            captured_at_formatted: &event.formatted_timestamp,
            location_name: &event.location_name,
            latitude: event.latitude,
            longitude: event.longitude,
            vehicle_type: &event.vehicle_label,
            user_id: &self.user_id,
            image_jpeg_base64,
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&record)
            .send()
            .await
            .context("record upload failed")?;

        if !response.status().is_success() {
            anyhow::bail!("record store returned {}", response.status());
        }

        info!("record {} uploaded for T{}", record.event_id, event.track_id);
        Ok(())
    }
}

/// Fans capture events out to the configured sinks without ever making the
/// classification loop wait on I/O.
pub struct CaptureDispatcher {
    gallery: Option<Arc<GalleryStore>>,
    records: Option<Arc<RecordStore>>,
    jpeg_quality: u8,
    metrics: PipelineMetrics,
}

impl CaptureDispatcher {
    pub fn new(config: &ExportConfig, metrics: PipelineMetrics) -> Result<Self> {
        let gallery = Some(Arc::new(GalleryStore::new(config)?));
        let records = match config.record_url {
            Some(_) => Some(Arc::new(RecordStore::new(config)?)),
            None => None,
        };
        Ok(Self {
            gallery,
            records,
            jpeg_quality: config.jpeg_quality,
            metrics,
        })
    }

    #[cfg(test)]
    fn disabled(metrics: PipelineMetrics) -> Self {
        Self {
            gallery: None,
            records: None,
            jpeg_quality: 95,
            metrics,
        }
    }

    /// Hand an event to every sink as detached background work. Returns
    /// immediately; completions surface only through logs and counters.
    pub fn dispatch(&self, event: CaptureEvent) {
        let event = Arc::new(event);

        if let Some(gallery) = self.gallery.clone() {
            let event = Arc::clone(&event);
            let metrics = self.metrics.clone();
            tokio::task::spawn_blocking(move || match gallery.save(&event) {
                Ok(path) => {
                    metrics.inc(&metrics.sink_successes);
                    info!("capture {} archived at {}", event.event_id, path.display());
                }
                Err(e) => {
                    metrics.inc(&metrics.sink_failures);
                    error!("gallery sink failed for {}: {e:#}", event.event_id);
                }
            });
        }

        if let Some(records) = self.records.clone() {
            let event = Arc::clone(&event);
            let metrics = self.metrics.clone();
            let jpeg_quality = self.jpeg_quality;
            tokio::spawn(async move {
                match records.save(&event, jpeg_quality).await {
                    Ok(()) => metrics.inc(&metrics.sink_successes),
                    Err(e) => {
                        metrics.inc(&metrics.sink_failures);
                        error!("record sink failed for {}: {e:#}", event.event_id);
                    }
                }
            });
        }
    }
}

/// Encode raw RGB8 pixels to JPEG bytes.
fn encode_rgb_to_jpeg(rgb_data: &[u8], width: usize, height: usize, quality: u8) -> Option<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};

    let expected_len = width * height * 3;
    if rgb_data.len() < expected_len {
        return None;
    }

    let img: RgbImage =
        ImageBuffer::from_raw(width as u32, height as u32, rgb_data[..expected_len].to_vec())?;

    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    if img.write_with_encoder(encoder).is_ok() {
        Some(buf.into_inner())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameImage;
    use uuid::Uuid;

    fn sample_event(with_image: bool) -> CaptureEvent {
        let image = with_image.then(|| {
            Arc::new(FrameImage {
                data: vec![128u8; 16 * 8 * 3],
                width: 16,
                height: 8,
            })
        });
        CaptureEvent {
            event_id: Uuid::new_v4(),
            track_id: 4,
            bounding_box: [0.1, 0.2, 0.3, 0.4],
            vehicle_label: "truck".to_string(),
            image,
            timestamp_ms: 1_700_000_000_000,
            formatted_timestamp: "2023-11-14 22:13:20".to_string(),
            latitude: Some(13.7563),
            longitude: Some(100.5018),
            location_name: "Phaya Thai, Bangkok".to_string(),
        }
    }

    #[test]
    fn test_encode_rgb_to_jpeg_roundtrip_size() {
        let jpeg = encode_rgb_to_jpeg(&vec![200u8; 32 * 16 * 3], 32, 16, 90).unwrap();
        assert!(!jpeg.is_empty());
        // JPEG SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        assert!(encode_rgb_to_jpeg(&[0u8; 10], 32, 16, 90).is_none());
    }

    #[test]
    fn test_gallery_writes_jpeg_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(&ExportConfig {
            gallery_dir: dir.path().to_string_lossy().into_owned(),
            ..ExportConfig::default()
        })
        .unwrap();

        let sidecar_path = store.save(&sample_event(true)).unwrap();
        assert!(sidecar_path.exists());

        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&sidecar_path).unwrap()).unwrap();
        assert_eq!(body["vehicle_type"], "truck");
        assert_eq!(body["location_name"], "Phaya Thai, Bangkok");
        assert_eq!(body["latitude"], 13.7563);

        let jpegs: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "jpg"))
            .collect();
        assert_eq!(jpegs.len(), 1);
    }

    #[test]
    fn test_gallery_without_image_writes_sidecar_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(&ExportConfig {
            gallery_dir: dir.path().to_string_lossy().into_owned(),
            ..ExportConfig::default()
        })
        .unwrap();

        let sidecar_path = store.save(&sample_event(false)).unwrap();
        assert!(sidecar_path.exists());
    }

    #[test]
    fn test_record_store_requires_url() {
        assert!(RecordStore::new(&ExportConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_without_sinks_is_a_no_op() {
        let metrics = PipelineMetrics::new();
        let dispatcher = CaptureDispatcher::disabled(metrics.clone());
        dispatcher.dispatch(sample_event(false));
        assert_eq!(metrics.summary().sink_successes, 0);
        assert_eq!(metrics.summary().sink_failures, 0);
    }
}
