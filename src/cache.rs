//! # Match Cache
//!
//! Bounded memoization for [`match_position`](crate::RouteMatcher::match_position).
//!
//! Matching is a pure function of the query and the route, so identical
//! queries can be answered from a map. Keys round the floating-point inputs
//! at fixed precision (sub-meter) so equal-in-practice queries share an
//! entry. Eviction is insertion-order: live tracking issues near-sequential
//! queries, so the oldest entry is also the least likely to recur and a
//! precise LRU would buy nothing.

use std::collections::{HashMap, VecDeque};

use crate::matcher::MatchResult;
use crate::GeoPoint;

/// Cache key: rounded coordinate plus the disambiguation hints.
///
/// Latitude and longitude are rounded to 1e-7 degrees (~1 cm), the hint to
/// 0.1 m and the heading to 0.1 degrees. Non-finite hints and headings are
/// treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey {
    lat_e7: i64,
    lng_e7: i64,
    hint_dm: Option<i64>,
    heading_ddeg: Option<i64>,
}

impl MatchKey {
    pub fn new(coord: &GeoPoint, hint_distance_along: Option<f64>, heading_deg: Option<f64>) -> Self {
        Self {
            lat_e7: (coord.lat * 1e7).round() as i64,
            lng_e7: (coord.lng * 1e7).round() as i64,
            hint_dm: hint_distance_along
                .filter(|h| h.is_finite())
                .map(|h| (h * 10.0).round() as i64),
            heading_ddeg: heading_deg
                .filter(|h| h.is_finite())
                .map(|h| (h * 10.0).round() as i64),
        }
    }
}

/// A bounded map of match results with insertion-order eviction.
#[derive(Debug)]
pub struct MatchCache {
    capacity: usize,
    entries: HashMap<MatchKey, MatchResult>,
    order: VecDeque<MatchKey>,
}

impl MatchCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::new(),
        }
    }

    /// Look up a memoized result.
    pub fn get(&self, key: &MatchKey) -> Option<&MatchResult> {
        self.entries.get(key)
    }

    /// Insert a result, evicting the oldest entry once over capacity.
    pub fn insert(&mut self, key: MatchKey, result: MatchResult) {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = result;
            return;
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, result);
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Drop all entries. Called whenever the route profile is rebuilt.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &MatchKey) -> bool {
        self.entries.contains_key(key)
    }
}
