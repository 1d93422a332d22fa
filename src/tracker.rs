//! # Tracker
//!
//! Stateful facade tying the route profile, the matcher and per-device
//! history together. A `Tracker` is a plain value the caller owns; create
//! as many as you need, there is no global instance.
//!
//! All timestamps are caller-supplied epoch milliseconds. The tracker never
//! reads the wall clock, which keeps replayed and simulated sessions exact.

use std::collections::HashMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::matcher::RouteMatcher;
use crate::profile::{ElevationTotals, RouteProfile};
use crate::progress::{
    eta_interval, find_active_start_time, infer_endpoint, select_history_samples,
    summarize_speeds, DeviceProgress, DeviceState, EtaStatus,
};
use crate::{GeoPoint, PositionSample, RoutePoint, TrackerConfig};

/// Snapshot of tracker internals for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub device_count: usize,
    pub route_points: usize,
    pub total_length_m: f64,
    pub cached_matches: usize,
}

/// A named point of interest supplied alongside the route, e.g. a parsed
/// aid station or checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A waypoint anchored to the route, ordered by distance from the start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteWaypoint {
    pub name: String,
    pub description: String,
    pub distance_along: f64,
    pub coord: GeoPoint,
}

/// Live tracking session: one route, any number of devices.
#[derive(Debug)]
pub struct Tracker {
    profile: RouteProfile,
    matcher: RouteMatcher,
    devices: HashMap<String, DeviceState>,
    config: TrackerConfig,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            profile: RouteProfile::empty(),
            matcher: RouteMatcher::with_config(config.clone()),
            devices: HashMap::new(),
            config,
        }
    }

    /// Replace the route with a new set of path segments.
    ///
    /// Rebuilding bumps the profile generation, so stale match results are
    /// dropped on the next query. Stored device histories survive, but
    /// route-relative state (last match, activity latch) is reset since it
    /// no longer refers to the new geometry.
    pub fn set_route(&mut self, segments: &[Vec<RoutePoint>]) {
        self.profile = RouteProfile::from_segments(segments);
        for state in self.devices.values_mut() {
            state.reset_route_state();
        }
        info!(
            "[Tracker] Route set: {} points, {:.0} m",
            self.profile.len(),
            self.profile.total_length()
        );
    }

    pub fn route(&self) -> &RouteProfile {
        &self.profile
    }

    pub fn total_length(&self) -> f64 {
        self.profile.total_length()
    }

    /// Interpolated coordinate at `distance_along` meters from the start.
    pub fn point_at_distance(&self, distance_along: f64) -> Option<GeoPoint> {
        self.profile.point_at_distance(distance_along)
    }

    /// Elevation gain/loss up to `limit` meters along the route.
    pub fn elevation_totals(&self, limit: Option<f64>) -> ElevationTotals {
        self.profile.elevation_totals(limit)
    }

    /// Anchor named waypoints to the route, sorted by distance-along.
    ///
    /// Each waypoint is projected onto the route; unnamed ones get their
    /// description or a positional label. When no waypoints land (none were
    /// supplied), synthetic Start and Finish markers at the route ends are
    /// returned instead. Empty route yields an empty list.
    pub fn map_waypoints(&mut self, waypoints: &[Waypoint]) -> Vec<RouteWaypoint> {
        if self.profile.is_empty() {
            return Vec::new();
        }

        let mut mapped: Vec<RouteWaypoint> = Vec::with_capacity(waypoints.len());
        for (idx, wp) in waypoints.iter().enumerate() {
            let coord = GeoPoint::new(wp.lat, wp.lng);
            let Some(proj) = self.matcher.project(&self.profile, &coord) else {
                continue;
            };
            let name = wp
                .name
                .as_deref()
                .filter(|s| !s.is_empty())
                .or_else(|| wp.description.as_deref().filter(|s| !s.is_empty()))
                .map(String::from)
                .unwrap_or_else(|| format!("Point {}", idx + 1));
            mapped.push(RouteWaypoint {
                name,
                description: wp.description.clone().unwrap_or_default(),
                distance_along: proj.distance_along,
                coord: proj.point,
            });
        }

        if mapped.is_empty() {
            let points = self.profile.points();
            if let (Some(first), Some(last)) = (points.first(), points.last()) {
                mapped.push(RouteWaypoint {
                    name: "Start".to_string(),
                    description: String::new(),
                    distance_along: 0.0,
                    coord: first.coord(),
                });
                mapped.push(RouteWaypoint {
                    name: "Finish".to_string(),
                    description: String::new(),
                    distance_along: self.profile.total_length(),
                    coord: last.coord(),
                });
            }
        }

        mapped.sort_by(|a, b| a.distance_along.total_cmp(&b.distance_along));
        mapped
    }

    /// Record one position fix for a device.
    ///
    /// Coordinates must be finite and in range; timestamps must not move
    /// backwards relative to the device's newest stored sample. History is
    /// pruned to the configured rolling window.
    pub fn record_sample(
        &mut self,
        device_id: &str,
        timestamp_ms: i64,
        lat: f64,
        lng: f64,
    ) -> Result<()> {
        let coord = GeoPoint::new(lat, lng);
        if !coord.is_valid() {
            return Err(TrackError::InvalidCoordinates {
                device_id: device_id.to_string(),
                lat,
                lng,
            });
        }

        let state = self.devices.entry(device_id.to_string()).or_default();
        if state
            .last_sample()
            .is_some_and(|s| timestamp_ms < s.timestamp_ms)
        {
            return Err(TrackError::InvalidTimestamp {
                device_id: device_id.to_string(),
                timestamp_ms,
            });
        }
        state.push_sample(
            PositionSample::new(timestamp_ms, lat, lng),
            self.config.history_window_ms,
        );
        Ok(())
    }

    /// Drop all stored state for a device. Returns whether it existed.
    pub fn remove_device(&mut self, device_id: &str) -> bool {
        self.devices.remove(device_id).is_some()
    }

    /// When the device first progressed past the start threshold, if known.
    pub fn active_since(&self, device_id: &str) -> Option<i64> {
        self.devices.get(device_id)?.active_since()
    }

    /// Current progress of a device along the route.
    ///
    /// Matches the device's latest sample seeded with its last known
    /// distance-along (unless stale) and recent heading. When the hinted
    /// match comes back off-track, a plain match is tried as well and kept
    /// if it is on-track or laterally closer, so a bad hint can never pin a
    /// device as permanently lost.
    ///
    /// `None` when the route is empty or the device has no samples.
    pub fn progress(&mut self, device_id: &str, now_ms: i64) -> Option<DeviceProgress> {
        if self.profile.is_empty() {
            return None;
        }
        let (sample, hint, heading, previous_match, previous_sample) = {
            let state = self.devices.get(device_id)?;
            let sample = state.last_sample()?;
            (
                sample,
                state.fresh_hint(now_ms, self.config.hint_stale_ms),
                state.recent_heading(self.config.heading_sample_window),
                state.last_match(),
                state.previous_sample(),
            )
        };

        let hinted =
            self.matcher
                .project_with_hint(&self.profile, &sample.coord(), hint, heading)?;
        let result = if hinted.off_track && (hint.is_some() || heading.is_some()) {
            match self.matcher.project(&self.profile, &sample.coord()) {
                Some(plain) if !plain.off_track || plain.lateral_offset < hinted.lateral_offset => {
                    debug!(
                        "[Tracker] Device {device_id}: hinted match off-track, keeping plain match"
                    );
                    plain
                }
                _ => hinted,
            }
        } else {
            hinted
        };

        let endpoint = if result.off_track {
            None
        } else {
            infer_endpoint(
                &mut self.matcher,
                &self.profile,
                result.distance_along,
                previous_match,
                previous_sample,
                &self.config,
            )
        };

        let state = self.devices.get_mut(device_id)?;
        state.set_last_match(result.distance_along, now_ms);

        if !result.off_track
            && state.active_since().is_none()
            && result.distance_along >= self.config.active_distance_m
        {
            // When replay finds no crossing (hint divergence, pruned
            // history), the latch falls back to the query time.
            let started = find_active_start_time(
                &mut self.matcher,
                &self.profile,
                state,
                self.config.active_distance_m,
            )
            .unwrap_or(now_ms);
            state.mark_active(started);
            info!("[Tracker] Device {device_id} active since {started}");
        }

        let selected = select_history_samples(state, now_ms, &self.config);
        let speed_ms = summarize_speeds(&selected).map_or(0.0, |s| s.mean_ms);

        Some(DeviceProgress {
            match_result: result,
            speed_ms,
            off_track: result.off_track,
            endpoint,
        })
    }

    /// Estimate when a device reaches `target_distance_m` along the route.
    ///
    /// Uses the measured smoothed speed, falling back to `fallback_speed_ms`
    /// when no speed can be measured yet. The confidence interval is only
    /// attached for measured speeds with a usable dispersion estimate.
    pub fn estimate_arrival(
        &mut self,
        device_id: &str,
        target_distance_m: f64,
        fallback_speed_ms: Option<f64>,
        now_ms: i64,
    ) -> EtaStatus {
        let Some(progress) = self.progress(device_id, now_ms) else {
            return EtaStatus::OffTrack;
        };
        if progress.off_track {
            return EtaStatus::OffTrack;
        }

        let delta_m = target_distance_m - progress.match_result.distance_along;
        if delta_m <= 0.0 {
            return EtaStatus::Passed;
        }

        let measured = progress.speed_ms;
        let speed = if measured > 0.0 {
            measured
        } else {
            fallback_speed_ms.unwrap_or(0.0).max(0.0)
        };
        if !speed.is_finite() || speed <= 0.0 {
            return EtaStatus::Unknown;
        }

        let arrival_ms = now_ms + (delta_m / speed * 1000.0).round() as i64;
        let interval = if measured > 0.0 {
            self.devices.get(device_id).and_then(|state| {
                let selected = select_history_samples(state, now_ms, &self.config);
                summarize_speeds(&selected).and_then(|stats| {
                    eta_interval(delta_m, &stats, now_ms, self.config.eta_confidence_z)
                })
            })
        } else {
            None
        };

        EtaStatus::Eta {
            arrival_ms,
            interval,
        }
    }

    /// Smoothed speed in m/s over the device's recent history, if measurable.
    pub fn average_speed(&self, device_id: &str, now_ms: i64) -> Option<f64> {
        let state = self.devices.get(device_id)?;
        let selected = select_history_samples(state, now_ms, &self.config);
        summarize_speeds(&selected).map(|s| s.mean_ms)
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            device_count: self.devices.len(),
            route_points: self.profile.len(),
            total_length_m: self.profile.total_length(),
            cached_matches: self.matcher.cached_matches(),
        }
    }
}
