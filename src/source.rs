// src/source.rs
//
// Detection input boundary. The external detector's per-frame output is
// replayed from JSONL log files: one frame per line, optionally referencing
// an image file alongside the log. A malformed line is the detector's
// problem, not ours — it is skipped with a warning and the stream continues.

use crate::pipeline::channel::LatestSlot;
use crate::types::{Detection, FrameImage, FramePacket, SourceConfig};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// One line of a detection log.
#[derive(Debug, Deserialize)]
pub struct FrameRecord {
    pub frame_id: u64,
    #[serde(default)]
    pub inference_time_ms: f64,
    /// Path to the frame image, relative to the log file's directory.
    #[serde(default)]
    pub image: Option<String>,
    pub detections: Vec<Detection>,
}

/// Recursively collect detection logs under the input directory.
pub fn find_detection_logs(config: &SourceConfig) -> Result<Vec<PathBuf>> {
    let mut logs = Vec::new();

    for entry in WalkDir::new(&config.input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "jsonl" || ext == "ndjson" {
                logs.push(path.to_path_buf());
            }
        }
    }

    logs.sort();
    info!("found {} detection logs in {}", logs.len(), config.input_dir);
    Ok(logs)
}

/// Parse a detection log, dropping unparseable lines.
pub fn read_records(path: &Path) -> Result<Vec<FrameRecord>> {
    let file =
        File::open(path).with_context(|| format!("failed to open log {}", path.display()))?;

    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<FrameRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                "{}:{}: skipping malformed record: {}",
                path.display(),
                lineno + 1,
                e
            ),
        }
    }

    Ok(records)
}

fn load_frame_image(log_path: &Path, relative: &str) -> Result<FrameImage> {
    let path = match log_path.parent() {
        Some(dir) => dir.join(relative),
        None => PathBuf::from(relative),
    };
    let img = image::open(&path)
        .with_context(|| format!("failed to decode frame image {}", path.display()))?
        .to_rgb8();
    Ok(FrameImage {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.into_raw(),
    })
}

fn packet_from_record(log_path: &Path, record: FrameRecord) -> FramePacket {
    let image = record.image.as_deref().and_then(|rel| {
        match load_frame_image(log_path, rel) {
            Ok(img) => Some(Arc::new(img)),
            Err(e) => {
                warn!("frame {}: {e:#}", record.frame_id);
                None
            }
        }
    });

    FramePacket {
        frame_id: record.frame_id,
        epoch_ms: Utc::now().timestamp_millis() as u64,
        inference_time_ms: record.inference_time_ms,
        image,
        detections: record.detections,
    }
}

/// Replay every log into the hand-off slot, then close it. Runs as the
/// producer half of the pipeline; the latest-only slot applies the
/// backpressure policy when the consumer lags.
pub async fn replay_logs(paths: Vec<PathBuf>, slot: LatestSlot<FramePacket>) {
    for path in paths {
        let records = match read_records(&path) {
            Ok(records) => records,
            Err(e) => {
                warn!("skipping {}: {e:#}", path.display());
                continue;
            }
        };
        info!("replaying {} frames from {}", records.len(), path.display());

        for record in records {
            let packet = packet_from_record(&path, record);
            slot.publish(packet);
            // Give the consumer a chance to run between frames.
            tokio::task::yield_now().await;
        }
    }
    slot.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_records_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"frame_id":1,"detections":[{{"x1":0.1,"y1":0.1,"x2":0.3,"y2":0.3,"label":"car","confidence":0.9}}]}}"#
        )
        .unwrap();
        writeln!(file, "this is not json").unwrap();
        writeln!(file, r#"{{"frame_id":2,"inference_time_ms":8.0,"detections":[]}}"#).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2, "bad line dropped, good lines kept");
        assert_eq!(records[0].frame_id, 1);
        assert_eq!(records[0].detections.len(), 1);
        assert_eq!(records[1].inference_time_ms, 8.0);
    }

    #[test]
    fn test_find_detection_logs_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a.jsonl")).unwrap();
        File::create(dir.path().join("b.txt")).unwrap();
        File::create(dir.path().join("c.ndjson")).unwrap();

        let logs = find_detection_logs(&SourceConfig {
            input_dir: dir.path().to_string_lossy().into_owned(),
        })
        .unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn test_replay_feeds_slot_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"frame_id":1,"detections":[]}}"#).unwrap();
        writeln!(file, r#"{{"frame_id":2,"detections":[]}}"#).unwrap();

        let slot = LatestSlot::new();
        let consumer = slot.clone();

        let producer = tokio::spawn(replay_logs(vec![path], slot));

        let mut frames = Vec::new();
        while let Some(packet) = consumer.recv().await {
            frames.push(packet.frame_id);
        }
        producer.await.unwrap();

        assert!(!frames.is_empty());
        assert_eq!(*frames.last().unwrap(), 2, "newest frame always arrives");
    }
}
