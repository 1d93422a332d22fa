//! # Route Profile
//!
//! Navigable model of a route polyline: flattened points, cumulative
//! distances, a local planar frame for fast projection, per-segment caches
//! and the elevation series.
//!
//! The profile is an immutable value object owned by the caller. Every build
//! is stamped with a fresh generation id; the matcher uses it to drop cached
//! results that refer to an older route, so a rebuild can never serve stale
//! distances-along.

use std::sync::atomic::{AtomicU64, Ordering};

use log::info;
use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_distance, interpolate_point};
use crate::{GeoPoint, RoutePoint};

/// Mean Earth radius in meters, shared with the haversine computation.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Per-segment precomputed values in the local planar frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentCache {
    /// Direction angle of the segment, `atan2(dy, dx)` in radians
    pub angle_rad: f64,
    /// Squared planar length of the segment
    pub len2: f64,
}

/// Elevation series of a route, parallel to its cumulative distances.
#[derive(Debug, Clone, Copy)]
pub struct ElevationProfile<'a> {
    /// Meters from the route origin to each point
    pub distances: &'a [f64],
    /// Elevation of each point, `None` where the source had no elevation
    pub elevations: &'a [Option<f64>],
}

/// Accumulated climb and descent over a stretch of route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElevationTotals {
    pub gain: f64,
    pub loss: f64,
}

/// An immutable, matchable model of a route.
///
/// Built once per route via [`RouteProfile::from_segments`] and replaced
/// wholesale when the route changes. Segment boundaries in the input do not
/// reset the cumulative distance; the whole route is one continuous polyline
/// for matching purposes.
#[derive(Debug, Clone)]
pub struct RouteProfile {
    points: Vec<RoutePoint>,
    cumulative: Vec<f64>,
    total_length: f64,
    mean_lat: f64,
    planar: Vec<(f64, f64)>,
    segments: Vec<SegmentCache>,
    elevations: Vec<Option<f64>>,
    generation: u64,
}

impl RouteProfile {
    /// Build a profile from ordered coordinate segments.
    ///
    /// Points with non-finite or out-of-range coordinates are dropped. An
    /// empty input yields a profile with `total_length() == 0.0`; queries
    /// against it return `None` rather than failing.
    pub fn from_segments(segments: &[Vec<RoutePoint>]) -> Self {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);

        let points: Vec<RoutePoint> = segments
            .iter()
            .flatten()
            .filter(|p| p.coord().is_valid())
            .copied()
            .collect();

        if points.is_empty() {
            info!("[RouteProfile] Built empty profile (gen {})", generation);
            return Self {
                points,
                cumulative: Vec::new(),
                total_length: 0.0,
                mean_lat: 0.0,
                planar: Vec::new(),
                segments: Vec::new(),
                elevations: Vec::new(),
                generation,
            };
        }

        let mean_lat = points.iter().map(|p| p.lat).sum::<f64>() / points.len() as f64;

        let mut cumulative = vec![0.0; points.len()];
        for i in 1..points.len() {
            let step = haversine_distance(&points[i - 1].coord(), &points[i].coord());
            cumulative[i] = cumulative[i - 1] + step;
        }
        let total_length = *cumulative.last().unwrap_or(&0.0);

        // Equirectangular projection anchored at the mean latitude. Valid for
        // route extents up to national scale, which is all live tracking needs.
        let cos_ref = mean_lat.to_radians().cos();
        let planar: Vec<(f64, f64)> = points
            .iter()
            .map(|p| {
                (
                    p.lng.to_radians() * cos_ref * EARTH_RADIUS_M,
                    p.lat.to_radians() * EARTH_RADIUS_M,
                )
            })
            .collect();

        let segments: Vec<SegmentCache> = planar
            .windows(2)
            .map(|w| {
                let dx = w[1].0 - w[0].0;
                let dy = w[1].1 - w[0].1;
                SegmentCache {
                    angle_rad: dy.atan2(dx),
                    len2: dx * dx + dy * dy,
                }
            })
            .collect();

        let elevations: Vec<Option<f64>> = points
            .iter()
            .map(|p| p.elevation.filter(|e| e.is_finite()))
            .collect();

        info!(
            "[RouteProfile] Built profile: {} points, {:.0} m (gen {})",
            points.len(),
            total_length,
            generation
        );

        Self {
            points,
            cumulative,
            total_length,
            mean_lat,
            planar,
            segments,
            elevations,
            generation,
        }
    }

    /// A profile with no route loaded.
    pub fn empty() -> Self {
        Self::from_segments(&[])
    }

    /// All points of the flattened polyline, in route order.
    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    /// Meters from the route origin to each point; non-decreasing and the
    /// same length as [`points`](Self::points).
    pub fn cumulative_distances(&self) -> &[f64] {
        &self.cumulative
    }

    /// Total route length in meters.
    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    /// Arithmetic mean of all point latitudes; anchor of the planar frame.
    pub fn mean_latitude(&self) -> f64 {
        self.mean_lat
    }

    /// Unique id of this build, bumped on every construction.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Project an arbitrary coordinate into the profile's planar frame.
    pub(crate) fn to_planar(&self, coord: &GeoPoint) -> (f64, f64) {
        let cos_ref = self.mean_lat.to_radians().cos();
        (
            coord.lng.to_radians() * cos_ref * EARTH_RADIUS_M,
            coord.lat.to_radians() * EARTH_RADIUS_M,
        )
    }

    /// Planar coordinates of point `i`.
    pub(crate) fn planar(&self, i: usize) -> (f64, f64) {
        self.planar[i]
    }

    /// Cached direction/length of segment `i -> i+1`.
    pub(crate) fn segment(&self, i: usize) -> SegmentCache {
        self.segments[i]
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Coordinate at `distance_along` meters from the route origin.
    ///
    /// The distance is clamped to `[0, total_length]` and the result is
    /// linearly interpolated between the bracketing points. Returns `None`
    /// only when the profile has no points.
    pub fn point_at_distance(&self, distance_along: f64) -> Option<GeoPoint> {
        if self.points.is_empty() {
            return None;
        }
        let target = distance_along.clamp(0.0, self.total_length);
        let idx = self
            .cumulative
            .iter()
            .position(|&d| d >= target)
            .unwrap_or(0);
        if idx == 0 {
            return Some(self.points[0].coord());
        }
        if self.cumulative[idx] == target {
            return Some(self.points[idx].coord());
        }
        let prev = idx - 1;
        let span = self.cumulative[idx] - self.cumulative[prev];
        let t = if span > 0.0 {
            (target - self.cumulative[prev]) / span
        } else {
            0.0
        };
        Some(interpolate_point(
            &self.points[prev].coord(),
            &self.points[idx].coord(),
            t,
        ))
    }

    /// Distance/elevation series for gain and loss computation.
    pub fn elevation_profile(&self) -> ElevationProfile<'_> {
        ElevationProfile {
            distances: &self.cumulative,
            elevations: &self.elevations,
        }
    }

    /// Total climb and descent up to `limit` meters along the route (the
    /// whole route when `limit` is `None`).
    ///
    /// Walks consecutive point pairs accumulating positive and negative
    /// elevation deltas, interpolating linearly within the pair that spans
    /// the limit. Pairs with a missing elevation on either end are skipped.
    pub fn elevation_totals(&self, limit: Option<f64>) -> ElevationTotals {
        let mut totals = ElevationTotals {
            gain: 0.0,
            loss: 0.0,
        };
        if self.cumulative.is_empty() {
            return totals;
        }
        let target = limit.map_or(self.total_length, |l| l.clamp(0.0, self.total_length));

        for i in 1..self.cumulative.len() {
            let d0 = self.cumulative[i - 1];
            let d1 = self.cumulative[i];
            let (Some(e0), Some(e1)) = (self.elevations[i - 1], self.elevations[i]) else {
                continue;
            };
            if d0 >= target {
                break;
            }
            let (end_dist, end_ele) = if target >= d1 {
                (d1, e1)
            } else {
                let span = d1 - d0;
                let capped = if span > 0.0 {
                    e0 + (e1 - e0) * (target - d0) / span
                } else {
                    e0
                };
                (target, capped)
            };
            let diff = end_ele - e0;
            if diff > 0.0 {
                totals.gain += diff;
            } else {
                totals.loss += diff.abs();
            }
            if end_dist >= target {
                break;
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_route() -> RouteProfile {
        RouteProfile::from_segments(&[vec![
            RoutePoint::new(0.0, 0.0),
            RoutePoint::new(0.0, 0.001),
            RoutePoint::new(0.0, 0.002),
        ]])
    }

    #[test]
    fn test_empty_profile() {
        let profile = RouteProfile::empty();
        assert!(profile.is_empty());
        assert_eq!(profile.total_length(), 0.0);
        assert_eq!(profile.point_at_distance(0.0), None);
        assert_eq!(profile.cumulative_distances().len(), 0);
    }

    #[test]
    fn test_cumulative_monotonic() {
        let profile = straight_route();
        let cumulative = profile.cumulative_distances();
        assert_eq!(cumulative.len(), profile.points().len());
        assert_eq!(cumulative[0], 0.0);
        for pair in cumulative.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(profile.total_length(), *cumulative.last().unwrap());
    }

    #[test]
    fn test_segment_boundaries_do_not_reset_distance() {
        let joined = RouteProfile::from_segments(&[vec![
            RoutePoint::new(0.0, 0.0),
            RoutePoint::new(0.0, 0.001),
            RoutePoint::new(0.0, 0.002),
        ]]);
        let split = RouteProfile::from_segments(&[
            vec![RoutePoint::new(0.0, 0.0), RoutePoint::new(0.0, 0.001)],
            vec![RoutePoint::new(0.0, 0.002)],
        ]);
        assert!((joined.total_length() - split.total_length()).abs() < 1e-9);
    }

    #[test]
    fn test_point_at_distance_endpoints() {
        let profile = straight_route();
        let first = profile.point_at_distance(0.0).unwrap();
        let last = profile.point_at_distance(profile.total_length()).unwrap();
        assert!((first.lat - 0.0).abs() < 1e-9);
        assert!((first.lng - 0.0).abs() < 1e-9);
        assert!((last.lng - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_point_at_distance_clamps() {
        let profile = straight_route();
        let before = profile.point_at_distance(-100.0).unwrap();
        assert_eq!(before, profile.points()[0].coord());
        let beyond = profile
            .point_at_distance(profile.total_length() + 100.0)
            .unwrap();
        assert!((beyond.lng - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_point_at_distance_interpolates() {
        let profile = straight_route();
        let mid = profile
            .point_at_distance(profile.total_length() / 2.0)
            .unwrap();
        assert!((mid.lng - 0.001).abs() < 1e-7);
    }

    #[test]
    fn test_invalid_points_dropped() {
        let profile = RouteProfile::from_segments(&[vec![
            RoutePoint::new(0.0, 0.0),
            RoutePoint::new(f64::NAN, 0.001),
            RoutePoint::new(0.0, 0.002),
        ]]);
        assert_eq!(profile.len(), 2);
    }

    #[test]
    fn test_generation_increments() {
        let a = straight_route();
        let b = straight_route();
        assert_ne!(a.generation(), b.generation());
    }

    #[test]
    fn test_mean_latitude() {
        let profile = RouteProfile::from_segments(&[vec![
            RoutePoint::new(46.0, 7.0),
            RoutePoint::new(48.0, 7.0),
        ]]);
        assert!((profile.mean_latitude() - 47.0).abs() < 1e-9);
    }

    #[test]
    fn test_elevation_totals() {
        let profile = RouteProfile::from_segments(&[vec![
            RoutePoint::with_elevation(0.0, 0.0, 100.0),
            RoutePoint::with_elevation(0.0, 0.001, 150.0),
            RoutePoint::with_elevation(0.0, 0.002, 120.0),
        ]]);
        let totals = profile.elevation_totals(None);
        assert!((totals.gain - 50.0).abs() < 1e-9);
        assert!((totals.loss - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_elevation_totals_with_limit() {
        let profile = RouteProfile::from_segments(&[vec![
            RoutePoint::with_elevation(0.0, 0.0, 100.0),
            RoutePoint::with_elevation(0.0, 0.001, 150.0),
            RoutePoint::with_elevation(0.0, 0.002, 120.0),
        ]]);
        // Halfway through the first pair: half the 50 m climb, no descent yet
        let half_first = profile.cumulative_distances()[1] / 2.0;
        let totals = profile.elevation_totals(Some(half_first));
        assert!((totals.gain - 25.0).abs() < 0.5);
        assert_eq!(totals.loss, 0.0);
    }

    #[test]
    fn test_elevation_totals_skips_missing() {
        let profile = RouteProfile::from_segments(&[vec![
            RoutePoint::with_elevation(0.0, 0.0, 100.0),
            RoutePoint::new(0.0, 0.001),
            RoutePoint::with_elevation(0.0, 0.002, 180.0),
        ]]);
        let totals = profile.elevation_totals(None);
        // Both pairs touch the missing middle elevation, nothing accumulates
        assert_eq!(totals.gain, 0.0);
        assert_eq!(totals.loss, 0.0);
    }
}
