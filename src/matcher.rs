//! # Route Matcher
//!
//! Maps an arbitrary coordinate to the single best point on the route.
//!
//! Every consecutive point pair is treated as a planar segment; the query is
//! projected onto each, and candidates are ranked by a combined score:
//!
//! ```text
//! score = lateral_distance + hint_penalty + heading_penalty
//! ```
//!
//! The hint penalty pulls the match toward the device's last known
//! distance-along, which is what picks the correct leg of an out-and-back
//! course when the nearest-point search alone is ambiguous. The heading
//! penalty disfavors segments running against the device's recent direction
//! of travel. Both are tie-breaker heuristics: the off-track flag is always
//! taken from the winner's raw lateral distance, never from the penalties.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cache::{MatchCache, MatchKey};
use crate::geo_utils::interpolate_point;
use crate::profile::RouteProfile;
use crate::{GeoPoint, TrackerConfig};

/// Result of projecting a coordinate onto the route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Closest point on the route
    pub point: GeoPoint,
    /// Meters traveled along the route to reach `point`
    pub distance_along: f64,
    /// Raw lateral distance from the query to `point`, in meters
    pub lateral_offset: f64,
    /// True when `lateral_offset` exceeds the off-track threshold
    pub off_track: bool,
}

/// Optional disambiguation inputs for a match query.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Last known distance-along for this device, in meters
    pub hint_distance_along: Option<f64>,
    /// Recent direction of travel as a compass bearing in degrees
    pub heading_deg: Option<f64>,
}

/// Stateful matcher: pure projection plus a bounded memoization cache.
///
/// The cache is keyed by the rounded query and its hints, and is cleared in
/// full whenever it observes a profile with a different generation, so a
/// route rebuild can never serve distances from the old polyline.
#[derive(Debug)]
pub struct RouteMatcher {
    cache: MatchCache,
    cached_generation: Option<u64>,
    config: TrackerConfig,
}

impl RouteMatcher {
    /// Create a matcher with default configuration.
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create a matcher with custom heuristics.
    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            cache: MatchCache::with_capacity(config.match_cache_capacity),
            cached_generation: None,
            config,
        }
    }

    /// Plain match with no disambiguation hints.
    pub fn project(&mut self, profile: &RouteProfile, coord: &GeoPoint) -> Option<MatchResult> {
        self.match_position(profile, coord, MatchOptions::default())
    }

    /// Match seeded with the device's last known distance-along and recent
    /// heading, the variant used by live tracking.
    pub fn project_with_hint(
        &mut self,
        profile: &RouteProfile,
        coord: &GeoPoint,
        hint_distance_along: Option<f64>,
        heading_deg: Option<f64>,
    ) -> Option<MatchResult> {
        self.match_position(
            profile,
            coord,
            MatchOptions {
                hint_distance_along,
                heading_deg,
            },
        )
    }

    /// Project `coord` onto the route.
    ///
    /// Returns `None` only when the route has no points or the coordinate is
    /// unusable. A route with points but no usable segments (a single point,
    /// or coincident points only) falls back to the nearest raw point.
    pub fn match_position(
        &mut self,
        profile: &RouteProfile,
        coord: &GeoPoint,
        opts: MatchOptions,
    ) -> Option<MatchResult> {
        if profile.is_empty() || !coord.is_valid() {
            return None;
        }

        if self.cached_generation != Some(profile.generation()) {
            debug!(
                "[RouteMatcher] Profile generation changed, clearing {} cached matches",
                self.cache.len()
            );
            self.cache.clear();
            self.cached_generation = Some(profile.generation());
        }

        let hint = opts.hint_distance_along.filter(|h| h.is_finite());
        let heading = opts.heading_deg.filter(|h| h.is_finite());

        let key = MatchKey::new(coord, hint, heading);
        if let Some(cached) = self.cache.get(&key) {
            return Some(*cached);
        }

        let result = self.compute_match(profile, coord, hint, heading);
        self.cache.insert(key, result);
        Some(result)
    }

    /// Number of memoized match results (for diagnostics).
    pub fn cached_matches(&self) -> usize {
        self.cache.len()
    }

    fn compute_match(
        &self,
        profile: &RouteProfile,
        coord: &GeoPoint,
        hint: Option<f64>,
        heading: Option<f64>,
    ) -> MatchResult {
        let (tx, ty) = profile.to_planar(coord);
        let cumulative = profile.cumulative_distances();
        let points = profile.points();

        // Compass bearing (clockwise from north) to planar math angle
        // (counterclockwise from east), matching the segment angle cache.
        let heading_rad = heading.map(|h| (90.0 - h).to_radians());

        struct Candidate {
            combined: f64,
            lateral: f64,
            distance_along: f64,
            point: GeoPoint,
        }
        let mut best: Option<Candidate> = None;

        for i in 0..profile.segment_count() {
            let seg = profile.segment(i);
            if seg.len2 == 0.0 {
                continue;
            }
            let (ax, ay) = profile.planar(i);
            let (bx, by) = profile.planar(i + 1);
            let dx = bx - ax;
            let dy = by - ay;

            let t = (((tx - ax) * dx + (ty - ay) * dy) / seg.len2).clamp(0.0, 1.0);
            let px = ax + dx * t;
            let py = ay + dy * t;
            let lateral = ((px - tx) * (px - tx) + (py - ty) * (py - ty)).sqrt();
            let distance_along = cumulative[i] + seg.len2.sqrt() * t;

            let heading_penalty = heading_rad.map_or(0.0, |h| {
                let mut diff = (seg.angle_rad - h).rem_euclid(std::f64::consts::TAU);
                if diff > std::f64::consts::PI {
                    diff = std::f64::consts::TAU - diff;
                }
                0.5 * (1.0 - diff.cos()) * self.config.heading_penalty_m
            });
            let hint_penalty = hint.map_or(0.0, |h| {
                ((distance_along - h).abs() - self.config.hint_tolerance_m).max(0.0)
                    * self.config.hint_penalty_per_meter
            });
            let combined = lateral + hint_penalty + heading_penalty;

            let better = match &best {
                None => true,
                Some(b) => {
                    combined < b.combined || (combined == b.combined && lateral < b.lateral)
                }
            };
            if better {
                best = Some(Candidate {
                    combined,
                    lateral,
                    distance_along,
                    point: interpolate_point(
                        &points[i].coord(),
                        &points[i + 1].coord(),
                        t,
                    ),
                });
            }
        }

        let (point, distance_along, lateral) = match best {
            Some(c) => (c.point, c.distance_along, c.lateral),
            // No usable segment: fall back to the nearest raw point.
            None => {
                let mut nearest = 0;
                let mut nearest_d2 = f64::INFINITY;
                for i in 0..profile.len() {
                    let (px, py) = profile.planar(i);
                    let d2 = (px - tx) * (px - tx) + (py - ty) * (py - ty);
                    if d2 < nearest_d2 {
                        nearest_d2 = d2;
                        nearest = i;
                    }
                }
                (
                    points[nearest].coord(),
                    cumulative[nearest],
                    nearest_d2.sqrt(),
                )
            }
        };

        MatchResult {
            point,
            distance_along,
            lateral_offset: lateral,
            off_track: lateral > self.config.off_track_threshold_m,
        }
    }
}

impl Default for RouteMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoutePoint;

    fn straight_route() -> RouteProfile {
        RouteProfile::from_segments(&[vec![
            RoutePoint::new(0.0, 0.0),
            RoutePoint::new(0.0, 0.002),
        ]])
    }

    fn out_and_back() -> RouteProfile {
        RouteProfile::from_segments(&[vec![
            RoutePoint::new(0.0, 0.0),
            RoutePoint::new(0.0, 0.002),
            RoutePoint::new(0.0, 0.0),
        ]])
    }

    #[test]
    fn test_empty_route_returns_none() {
        let profile = RouteProfile::empty();
        let mut matcher = RouteMatcher::new();
        assert!(matcher.project(&profile, &GeoPoint::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn test_on_route_match() {
        let profile = straight_route();
        let mut matcher = RouteMatcher::new();
        let result = matcher
            .project(&profile, &GeoPoint::new(0.0, 0.001))
            .unwrap();
        assert!(!result.off_track);
        assert!(result.lateral_offset < 1.0);
        assert!((result.distance_along - profile.total_length() / 2.0).abs() < 2.0);
    }

    #[test]
    fn test_off_track_threshold() {
        let profile = straight_route();
        let mut matcher = RouteMatcher::new();

        // ~1.1 km north of the route
        let far = matcher
            .project(&profile, &GeoPoint::new(0.01, 0.001))
            .unwrap();
        assert!(far.off_track);
        assert!(far.lateral_offset > 1000.0);

        // A few meters off
        let near = matcher
            .project(&profile, &GeoPoint::new(0.00003, 0.001))
            .unwrap();
        assert!(!near.off_track);
    }

    #[test]
    fn test_hint_disambiguates_out_and_back() {
        let profile = out_and_back();
        let mut matcher = RouteMatcher::new();
        let total = profile.total_length();
        let query = GeoPoint::new(0.0001, 0.001); // Equidistant from both legs

        let outbound = matcher
            .project_with_hint(&profile, &query, Some(10.0), None)
            .unwrap();
        assert!(outbound.distance_along < total / 2.0);

        let inbound = matcher
            .project_with_hint(&profile, &query, Some(total - 10.0), None)
            .unwrap();
        assert!(inbound.distance_along > total / 2.0);
    }

    #[test]
    fn test_heading_disambiguates_out_and_back() {
        let profile = out_and_back();
        let mut matcher = RouteMatcher::new();
        let total = profile.total_length();
        let query = GeoPoint::new(0.0001, 0.001);

        let eastbound = matcher
            .project_with_hint(&profile, &query, None, Some(90.0))
            .unwrap();
        assert!(eastbound.distance_along < total / 2.0);

        let westbound = matcher
            .project_with_hint(&profile, &query, None, Some(270.0))
            .unwrap();
        assert!(westbound.distance_along > total / 2.0);
    }

    #[test]
    fn test_penalties_do_not_flag_off_track() {
        let profile = out_and_back();
        let mut matcher = RouteMatcher::new();
        // Close to the route but hinted to the far end: penalties shift the
        // winning leg, never the off-track classification.
        let result = matcher
            .project_with_hint(&profile, &GeoPoint::new(0.00001, 0.0001), Some(10_000.0), None)
            .unwrap();
        assert!(!result.off_track);
    }

    #[test]
    fn test_match_is_idempotent_and_cached() {
        let profile = straight_route();
        let mut matcher = RouteMatcher::new();
        let coord = GeoPoint::new(0.0001, 0.0015);

        let first = matcher
            .project_with_hint(&profile, &coord, Some(100.0), Some(90.0))
            .unwrap();
        assert_eq!(matcher.cached_matches(), 1);

        let second = matcher
            .project_with_hint(&profile, &coord, Some(100.0), Some(90.0))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(matcher.cached_matches(), 1);
    }

    #[test]
    fn test_rebuild_invalidates_cache() {
        let mut matcher = RouteMatcher::new();
        let coord = GeoPoint::new(0.0, 0.001);

        let profile = straight_route();
        let first = matcher.project(&profile, &coord).unwrap();
        assert_eq!(matcher.cached_matches(), 1);

        // Identical geometry, new build: the cache must start from scratch
        // but the recomputed result must be equal in value.
        let rebuilt = straight_route();
        let second = matcher.project(&rebuilt, &coord).unwrap();
        assert_eq!(matcher.cached_matches(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_point_route_falls_back() {
        let profile = RouteProfile::from_segments(&[vec![RoutePoint::new(0.0, 0.0)]]);
        let mut matcher = RouteMatcher::new();
        let result = matcher
            .project(&profile, &GeoPoint::new(0.0, 0.0005))
            .unwrap();
        assert_eq!(result.distance_along, 0.0);
        assert!((result.lateral_offset - 55.6).abs() < 2.0); // ~0.0005 deg lng
        assert!(!result.off_track);
    }

    #[test]
    fn test_invalid_coordinate_returns_none() {
        let profile = straight_route();
        let mut matcher = RouteMatcher::new();
        assert!(matcher
            .project(&profile, &GeoPoint::new(f64::NAN, 0.0))
            .is_none());
    }
}
