// src/location.rs
//
// Location collaborator. An updater task owns the current fix and pushes
// immutable snapshots through a watch channel; the classification loop
// reads the latest snapshot without blocking and tolerates staleness.
// Reverse geocoding runs on the updater side, gated on displacement, and
// degrades to formatted coordinates when the geocoder is absent or fails.

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::types::LocationConfig;

pub const PLACE_NAME_UNAVAILABLE: &str = "Location: Not available";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// What the capture path sees: best-known fix plus a human-readable place
/// name. The name is always present, falling back to a placeholder.
#[derive(Debug, Clone)]
pub struct LocationSnapshot {
    pub fix: Option<GeoFix>,
    pub place_name: String,
}

impl Default for LocationSnapshot {
    fn default() -> Self {
        Self {
            fix: None,
            place_name: PLACE_NAME_UNAVAILABLE.to_string(),
        }
    }
}

/// Read side. Cheap to clone, never blocks.
#[derive(Clone)]
pub struct LocationReader {
    rx: watch::Receiver<LocationSnapshot>,
}

impl LocationReader {
    pub fn snapshot(&self) -> LocationSnapshot {
        self.rx.borrow().clone()
    }
}

/// Write side, owned by whatever task receives fixes from the positioning
/// hardware (or, in replay, publishes a static configured fix).
pub struct LocationUpdater {
    tx: watch::Sender<LocationSnapshot>,
    geocoder: Option<ReverseGeocoder>,
    distance_threshold_m: f64,
    last_geocoded: Option<GeoFix>,
}

pub fn channel(config: &LocationConfig) -> Result<(LocationUpdater, LocationReader)> {
    let (tx, rx) = watch::channel(LocationSnapshot::default());
    let geocoder = match &config.geocode_url {
        Some(url) => Some(ReverseGeocoder::new(url.clone(), config.request_timeout_secs)?),
        None => None,
    };
    Ok((
        LocationUpdater {
            tx,
            geocoder,
            distance_threshold_m: config.geocode_distance_threshold_m,
            last_geocoded: None,
        },
        LocationReader { rx },
    ))
}

impl LocationUpdater {
    /// Accept a new fix. The fix itself is published immediately (keeping
    /// whatever place name is current); the name is refreshed only when the
    /// device has moved far enough to make re-geocoding worthwhile.
    pub async fn publish_fix(&mut self, fix: GeoFix) {
        let current_name = self.tx.borrow().place_name.clone();
        self.tx.send_replace(LocationSnapshot {
            fix: Some(fix),
            place_name: current_name,
        });

        let moved_enough = match self.last_geocoded {
            Some(prev) => distance_m(&prev, &fix) > self.distance_threshold_m,
            None => true,
        };
        if !moved_enough {
            return;
        }

        let name = self.resolve_place_name(&fix).await;
        self.last_geocoded = Some(fix);
        debug!("place name updated: {}", name);
        self.tx.send_replace(LocationSnapshot {
            fix: Some(fix),
            place_name: name,
        });
    }

    async fn resolve_place_name(&self, fix: &GeoFix) -> String {
        match &self.geocoder {
            Some(geocoder) => match geocoder.resolve(fix).await {
                Ok(name) => name,
                Err(e) => {
                    warn!("reverse geocoding failed: {e:#}");
                    format_coordinates(fix)
                }
            },
            None => format_coordinates(fix),
        }
    }
}

pub fn format_coordinates(fix: &GeoFix) -> String {
    format!("{:.4}, {:.4}", fix.latitude, fix.longitude)
}

/// Great-circle distance in meters (haversine).
pub fn distance_m(a: &GeoFix, b: &GeoFix) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Nominatim-style reverse geocoding client.
pub struct ReverseGeocoder {
    http_client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    display_name: Option<String>,
}

impl ReverseGeocoder {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build geocoder HTTP client")?;
        Ok(Self { http_client, url })
    }

    /// Resolve a fix to a short place string: the first two comma-separated
    /// components of the full display name, which is plenty for a capture
    /// overlay ("street, district" rather than a full postal address).
    pub async fn resolve(&self, fix: &GeoFix) -> Result<String> {
        let response = self
            .http_client
            .get(&self.url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", fix.latitude.to_string()),
                ("lon", fix.longitude.to_string()),
            ])
            .send()
            .await
            .context("geocode request failed")?
            .error_for_status()
            .context("geocode server returned an error")?;

        let body: GeocodeResponse = response
            .json()
            .await
            .context("failed to parse geocode response")?;

        match body.display_name {
            Some(full) => Ok(shorten_display_name(&full)),
            None => Ok(format_coordinates(fix)),
        }
    }
}

fn shorten_display_name(full: &str) -> String {
    let parts: Vec<&str> = full.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [] => full.trim().to_string(),
        [only] => (*only).to_string(),
        [first, second, ..] => format!("{}, {}", first, second),
    }
}
