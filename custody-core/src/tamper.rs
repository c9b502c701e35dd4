//! Tamper detection from consecutive location samples
//!
//! A box that covers more than `max_jump_km` (straight line) in less than
//! `min_plausible_elapsed` is flagged as suspicious. Distance is the
//! great-circle distance from the haversine formula on a sphere of radius
//! 6371 km. The detector is pure: it only returns a [`Verdict`].

use crate::config::TamperConfig;
use crate::types::GeoPoint;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points (km)
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Movement classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    /// Plausible movement, or not enough data to judge
    Normal,
    /// Implausibly long jump for the elapsed time
    Suspicious {
        /// Straight-line distance covered (km)
        distance_km: f64,
    },
}

impl Verdict {
    /// Check if verdict is suspicious
    pub fn is_suspicious(&self) -> bool {
        matches!(self, Verdict::Suspicious { .. })
    }
}

/// Tamper detector with configurable thresholds
#[derive(Debug, Clone, Copy)]
pub struct TamperDetector {
    max_jump_km: f64,
    min_plausible_elapsed: Duration,
}

impl Default for TamperDetector {
    fn default() -> Self {
        Self::new(&TamperConfig::default())
    }
}

impl TamperDetector {
    /// Create detector from configuration. An out-of-range window is clamped
    /// to what [`Duration`] can hold; [`crate::Config::validate`] rejects it.
    pub fn new(config: &TamperConfig) -> Self {
        let secs = config
            .min_plausible_elapsed_secs
            .clamp(0, TamperConfig::MAX_ELAPSED_SECS);
        Self {
            max_jump_km: config.max_jump_km,
            min_plausible_elapsed: Duration::seconds(secs),
        }
    }

    /// Create detector with explicit thresholds
    pub fn with_thresholds(max_jump_km: f64, min_plausible_elapsed: Duration) -> Self {
        Self {
            max_jump_km,
            min_plausible_elapsed,
        }
    }

    /// Distance threshold (km)
    pub fn max_jump_km(&self) -> f64 {
        self.max_jump_km
    }

    /// Time window
    pub fn min_plausible_elapsed(&self) -> Duration {
        self.min_plausible_elapsed
    }

    /// Classify the move from `prev` to `curr`.
    ///
    /// Missing locations yield [`Verdict::Normal`]. Elapsed time is signed, so
    /// a sample stamped before its predecessor counts as zero-time travel.
    pub fn evaluate(
        &self,
        prev_location: Option<&GeoPoint>,
        prev_time: DateTime<Utc>,
        curr_location: Option<&GeoPoint>,
        curr_time: DateTime<Utc>,
    ) -> Verdict {
        let (prev, curr) = match (prev_location, curr_location) {
            (Some(prev), Some(curr)) => (prev, curr),
            _ => return Verdict::Normal,
        };

        let distance_km = haversine_km(prev, curr);
        let elapsed = curr_time - prev_time;

        if distance_km > self.max_jump_km && elapsed < self.min_plausible_elapsed {
            Verdict::Suspicious { distance_km }
        } else {
            Verdict::Normal
        }
    }

    /// Same as [`evaluate`](Self::evaluate) for a `"lat,lon"` location string
    /// taken from box history. Labels like `"unknown"` yield `Normal`.
    pub fn evaluate_from_label(
        &self,
        prev_location: &str,
        prev_time: DateTime<Utc>,
        curr_location: &GeoPoint,
        curr_time: DateTime<Utc>,
    ) -> Verdict {
        let prev = GeoPoint::parse(prev_location);
        self.evaluate(prev.as_ref(), prev_time, Some(curr_location), curr_time)
    }
}
