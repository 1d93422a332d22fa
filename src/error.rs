//! Unified error handling for the route-progress library.
//!
//! Geometric queries against an empty route deliberately return `None`
//! rather than an error; this type covers genuinely invalid caller input.

use std::fmt;

/// Unified error type for route-progress operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackError {
    /// A position sample carried non-finite or out-of-range coordinates
    InvalidCoordinates {
        device_id: String,
        lat: f64,
        lng: f64,
    },
    /// A position sample carried a timestamp that cannot be ordered
    InvalidTimestamp {
        device_id: String,
        timestamp_ms: i64,
    },
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::InvalidCoordinates {
                device_id,
                lat,
                lng,
            } => {
                write!(
                    f,
                    "Device '{}' reported invalid coordinates ({}, {})",
                    device_id, lat, lng
                )
            }
            TrackError::InvalidTimestamp {
                device_id,
                timestamp_ms,
            } => {
                write!(
                    f,
                    "Device '{}' reported invalid timestamp {}",
                    device_id, timestamp_ms
                )
            }
        }
    }
}

impl std::error::Error for TrackError {}

/// Result type alias for route-progress operations.
pub type Result<T> = std::result::Result<T, TrackError>;
