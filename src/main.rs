// src/main.rs

mod capture;
mod config;
mod direction;
mod export;
mod location;
mod pipeline;
mod registry;
mod source;
mod tracker;
mod types;

use anyhow::Result;
use export::CaptureDispatcher;
use location::GeoFix;
use pipeline::channel::LatestSlot;
use pipeline::metrics::PipelineMetrics;
use pipeline::DetectionPipeline;
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use types::{Config, DirectionState};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: {e:#}; continuing with defaults");
            Config::default()
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.clone())
        .init();

    info!("🚗 Wrong-Way Detection System Starting");

    let metrics = PipelineMetrics::new();
    let mut detection_pipeline = DetectionPipeline::new(&config, metrics.clone())?;
    let dispatcher = CaptureDispatcher::new(&config.export, metrics.clone())?;
    info!("✓ Pipeline ready");

    // Location collaborator: publish the configured fix (if any) and let the
    // updater resolve a place name in the background. The classification
    // loop only ever reads snapshots.
    let (mut location_updater, location_reader) = location::channel(&config.location)?;
    if let (Some(latitude), Some(longitude)) = (config.location.latitude, config.location.longitude)
    {
        tokio::spawn(async move {
            location_updater
                .publish_fix(GeoFix {
                    latitude,
                    longitude,
                })
                .await;
        });
    }

    let logs = source::find_detection_logs(&config.source)?;
    if logs.is_empty() {
        warn!("no detection logs found in {}", config.source.input_dir);
        return Ok(());
    }

    // Producer/consumer split with latest-only backpressure: the replay
    // task never queues more than one frame ahead of the classifier.
    let slot: LatestSlot<types::FramePacket> = LatestSlot::new();
    let producer = tokio::spawn(source::replay_logs(logs, slot.clone()));

    while let Some(packet) = slot.recv().await {
        let output = detection_pipeline.process_frame(&packet, &location_reader.snapshot());

        for labeled in &output.labeled {
            if labeled.state == DirectionState::WrongWay {
                info!(
                    "🚨 frame {}: T{} {} ({:.1}ms inference)",
                    output.frame_id,
                    labeled.track_id,
                    labeled.display_label,
                    output.inference_time_ms
                );
            }
        }

        for event in output.captures {
            dispatcher.dispatch(event);
        }
    }

    producer.await?;
    metrics
        .frames_dropped
        .store(slot.dropped_count(), Ordering::Relaxed);

    // Teardown: per-track state dies with the run. In-flight sink work is
    // deliberately left to finish (or not) on its own.
    detection_pipeline.reset();

    let summary = metrics.summary();
    info!(
        "done: {} frames ({} superseded), {} captures, {} sink failures",
        summary.total_frames,
        summary.frames_dropped,
        summary.captures_accepted,
        summary.sink_failures
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
