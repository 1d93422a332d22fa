//! # Geographic Utilities
//!
//! Core great-circle computations used throughout the library.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`initial_bearing`] | Initial bearing from one point toward another |
//! | [`polyline_length`] | Total length of a polyline |
//! | [`interpolate_point`] | Linear interpolation between two points |
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees),
//! which is the standard used by GPS receivers and mapping services.

use crate::GeoPoint;
use geo::{Bearing, Distance, Haversine, Point};

/// Calculate the great-circle distance between two GPS points using the
/// Haversine formula.
///
/// Returns the distance in meters along the Earth's surface (assuming a
/// spherical Earth with radius 6,371 km).
///
/// # Example
///
/// ```rust
/// use route_progress::{geo_utils, GeoPoint};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let p1 = Point::new(a.lng, a.lat);
    let p2 = Point::new(b.lng, b.lat);
    Haversine::distance(p1, p2)
}

/// Calculate the initial great-circle bearing from `a` toward `b`.
///
/// Returns degrees in `[0, 360)`, where north is 0° and east is 90°.
///
/// # Example
///
/// ```rust
/// use route_progress::{geo_utils, GeoPoint};
///
/// let origin = GeoPoint::new(0.0, 0.0);
/// let east = GeoPoint::new(0.0, 0.001);
/// let bearing = geo_utils::initial_bearing(&origin, &east);
/// assert!((bearing - 90.0).abs() < 1.0);
/// ```
#[inline]
pub fn initial_bearing(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let p1 = Point::new(a.lng, a.lat);
    let p2 = Point::new(b.lng, b.lat);
    Haversine::bearing(p1, p2).rem_euclid(360.0)
}

/// Total haversine length of a polyline, in meters.
///
/// Zero for fewer than two points.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

/// Linearly interpolate between two points in coordinate space.
///
/// `ratio` 0.0 yields `a`, 1.0 yields `b`. Adequate for the short segments
/// a route polyline is made of; no great-circle interpolation is attempted.
#[inline]
pub fn interpolate_point(a: &GeoPoint, b: &GeoPoint, ratio: f64) -> GeoPoint {
    GeoPoint::new(
        a.lat + (b.lat - a.lat) * ratio,
        a.lng + (b.lng - a.lng) * ratio,
    )
}
