//! # Route Progress
//!
//! Route matching and progress tracking for live GPS position feeds.
//!
//! This library provides:
//! - A navigable route model built from ordered coordinate segments
//! - Projection of noisy positions onto the route, with hint- and
//!   heading-based disambiguation for out-and-back courses
//! - Per-device speed statistics and confidence-bounded arrival estimates
//!
//! ## Quick Start
//!
//! ```rust
//! use route_progress::{RoutePoint, Tracker};
//!
//! let mut tracker = Tracker::new();
//! tracker.set_route(&[vec![
//!     RoutePoint::new(0.0, 0.0),
//!     RoutePoint::new(0.0, 0.002),
//! ]]);
//!
//! tracker.record_sample("rider-1", 0, 0.0, 0.0).unwrap();
//! tracker.record_sample("rider-1", 10_000, 0.0, 0.001).unwrap();
//!
//! let progress = tracker.progress("rider-1", 10_000).unwrap();
//! assert!(!progress.off_track);
//! println!("{:.0} m along the route", progress.match_result.distance_along);
//! ```
//!
//! All timestamps are caller-supplied milliseconds; the library never reads
//! the wall clock, so time can be frozen or replayed in tests.

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, TrackError};

// Geographic utilities (distance, bearing, interpolation)
pub mod geo_utils;

// Route model: flattened points, cumulative distances, planar caches
pub mod profile;
pub use profile::{ElevationProfile, ElevationTotals, RouteProfile};

// Bounded memoization of match results
pub mod cache;
pub use cache::{MatchCache, MatchKey};

// Position-to-route matching
pub mod matcher;
pub use matcher::{MatchOptions, MatchResult, RouteMatcher};

// Per-device history, speed statistics, endpoint and ETA logic
pub mod progress;
pub use progress::{
    summarize_speeds, DeviceProgress, DeviceState, Endpoint, EtaInterval, EtaStatus, LastMatch,
    SpeedStats,
};

// Stateful tracker facade tying route, matcher and devices together
pub mod tracker;
pub use tracker::{RouteWaypoint, Tracker, TrackerStats, Waypoint};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use route_progress::GeoPoint;
/// let point = GeoPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a new GPS point.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lng >= -180.0
            && self.lng <= 180.0
    }
}

/// A point on the route, optionally carrying elevation in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
    pub elevation: Option<f64>,
}

impl RoutePoint {
    /// Create a route point without elevation.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            elevation: None,
        }
    }

    /// Create a route point with elevation in meters.
    pub fn with_elevation(lat: f64, lng: f64, elevation: f64) -> Self {
        Self {
            lat,
            lng,
            elevation: Some(elevation),
        }
    }

    /// The horizontal coordinate of this point.
    pub fn coord(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// A raw timestamped position report for a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
    pub lat: f64,
    pub lng: f64,
}

impl PositionSample {
    pub fn new(timestamp_ms: i64, lat: f64, lng: f64) -> Self {
        Self {
            timestamp_ms,
            lat,
            lng,
        }
    }

    /// The horizontal coordinate of this sample.
    pub fn coord(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Configuration for matching and progress heuristics.
///
/// All values are tunable parameters, not derived constants. The defaults
/// match the behavior described in the module documentation.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Lateral distance beyond which a match is flagged off-track.
    /// Default: 200.0 meters
    pub off_track_threshold_m: f64,

    /// Band around the hint distance-along within which no hint penalty
    /// applies. Default: 150.0 meters
    pub hint_tolerance_m: f64,

    /// Penalty weight per meter of distance-along beyond the hint tolerance.
    /// Default: 0.2
    pub hint_penalty_per_meter: f64,

    /// Maximum heading penalty, reached when a segment runs opposite to the
    /// supplied heading. Default: 30.0 meter-equivalents
    pub heading_penalty_m: f64,

    /// Proximity band for classifying a position as at the start or finish.
    /// Default: 30.0 meters
    pub endpoint_proximity_m: f64,

    /// Distance-along a device must reach before it counts as having truly
    /// started on the route. Default: 50.0 meters
    pub active_distance_m: f64,

    /// Rolling window of position history kept per device.
    /// Default: 3_600_000 ms (one hour)
    pub history_window_ms: i64,

    /// Age beyond which a stored last match is ignored as a hint.
    /// Default: 300_000 ms (five minutes)
    pub hint_stale_ms: i64,

    /// Z-score applied to the standard error of the mean speed when building
    /// the ETA confidence interval. Default: 1.645 (~90% normal approximation)
    pub eta_confidence_z: f64,

    /// Maximum number of memoized match results.
    /// Default: 10_000 entries
    pub match_cache_capacity: usize,

    /// Number of trailing samples used to derive a recent heading.
    /// Default: 5
    pub heading_sample_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            off_track_threshold_m: 200.0,
            hint_tolerance_m: 150.0,
            hint_penalty_per_meter: 0.2,
            heading_penalty_m: 30.0,
            endpoint_proximity_m: 30.0,
            active_distance_m: 50.0,
            history_window_ms: 60 * 60 * 1000,
            hint_stale_ms: 5 * 60 * 1000,
            eta_confidence_z: 1.645,
            match_cache_capacity: 10_000,
            heading_sample_window: 5,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(51.5074, -0.1278).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_route_point_elevation() {
        let flat = RoutePoint::new(47.0, 8.0);
        assert_eq!(flat.elevation, None);

        let hill = RoutePoint::with_elevation(47.0, 8.0, 1200.0);
        assert_eq!(hill.elevation, Some(1200.0));
        assert_eq!(hill.coord(), GeoPoint::new(47.0, 8.0));
    }

    #[test]
    fn test_config_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.off_track_threshold_m, 200.0);
        assert_eq!(config.hint_tolerance_m, 150.0);
        assert_eq!(config.history_window_ms, 3_600_000);
        assert_eq!(config.match_cache_capacity, 10_000);
    }

    #[test]
    fn test_types_serialize() {
        let sample = PositionSample::new(1_000, 0.0, 0.001);
        let json = serde_json::to_string(&sample).unwrap();
        let back: PositionSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
    }
}
