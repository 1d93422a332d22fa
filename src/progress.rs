//! # Progress Statistics
//!
//! Per-device tracking state and the statistics derived from it: smoothed
//! speed with a dispersion estimate, recent heading, endpoint proximity
//! classification and confidence-bounded arrival estimates.
//!
//! Speed estimation must stay usable on irregular, sparse input, so sample
//! selection is a layered fallback tried in order:
//!
//! 1. samples inside the rolling time window and at/after `active_since`
//! 2. samples inside the rolling time window
//! 3. the full stored history
//!
//! The first layer needs at least two samples; the second wins whenever it
//! is non-empty, so stale out-of-window samples never leak into a speed
//! estimate while fresh data exists. Full history is the last resort for a
//! device that has gone quiet entirely.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_distance, initial_bearing};
use crate::matcher::{MatchResult, RouteMatcher};
use crate::profile::RouteProfile;
use crate::{PositionSample, TrackerConfig};

/// The most recent non-stale match for a device, kept as the next query's
/// disambiguation hint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastMatch {
    pub distance_along: f64,
    pub timestamp_ms: i64,
}

/// Which end of the route a position is near.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Start,
    Finish,
}

/// Smoothed speed over recent history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedStats {
    /// Distance-weighted mean speed in m/s (total distance / total time)
    pub mean_ms: f64,
    /// Sample standard deviation of the per-segment speeds
    pub std_dev: f64,
    /// Number of consecutive-sample segments that contributed
    pub segment_count: usize,
}

/// Current progress of a device along the route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceProgress {
    pub match_result: MatchResult,
    /// Smoothed speed in m/s, 0.0 when history is insufficient
    pub speed_ms: f64,
    pub off_track: bool,
    pub endpoint: Option<Endpoint>,
}

/// Low/high arrival bound derived from the standard error of recent speeds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EtaInterval {
    /// Arrival if the device keeps to the fast bound of its speed
    pub earliest_ms: i64,
    /// Arrival if the device keeps to the slow bound of its speed
    pub latest_ms: i64,
    pub confidence: f64,
}

/// Outcome of an arrival-time query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EtaStatus {
    /// The device is currently off-track (or has never been matched)
    OffTrack,
    /// The target distance is already behind the device
    Passed,
    /// Neither measured nor fallback speed is usable
    Unknown,
    /// Estimated arrival, with a confidence interval when the speed sample
    /// supports one
    Eta {
        arrival_ms: i64,
        interval: Option<EtaInterval>,
    },
}

/// Tracking state for one device: rolling position history, the last match
/// used for hint continuity, and the "has truly started" latch.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    history: VecDeque<PositionSample>,
    last_match: Option<LastMatch>,
    active_since: Option<i64>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample and prune entries older than the rolling window,
    /// measured from the newest stored timestamp.
    pub fn push_sample(&mut self, sample: PositionSample, window_ms: i64) {
        self.history.push_back(sample);
        let newest = self.history.back().map(|s| s.timestamp_ms).unwrap_or(0);
        let cutoff = newest - window_ms;
        while self
            .history
            .front()
            .is_some_and(|s| s.timestamp_ms < cutoff)
        {
            self.history.pop_front();
        }
    }

    /// Time-ordered stored samples, oldest first.
    pub fn history(&self) -> &VecDeque<PositionSample> {
        &self.history
    }

    pub fn last_sample(&self) -> Option<PositionSample> {
        self.history.back().copied()
    }

    /// The sample before the latest one (the latest itself on a one-sample
    /// history), used for endpoint disambiguation.
    pub fn previous_sample(&self) -> Option<PositionSample> {
        match self.history.len() {
            0 => None,
            1 => self.history.front().copied(),
            n => self.history.get(n - 2).copied(),
        }
    }

    /// The stored last-match distance, unless it has gone stale.
    pub fn fresh_hint(&self, now_ms: i64, stale_ms: i64) -> Option<f64> {
        self.last_match
            .filter(|m| now_ms - m.timestamp_ms <= stale_ms)
            .map(|m| m.distance_along)
    }

    pub fn last_match(&self) -> Option<LastMatch> {
        self.last_match
    }

    pub fn set_last_match(&mut self, distance_along: f64, now_ms: i64) {
        self.last_match = Some(LastMatch {
            distance_along,
            timestamp_ms: now_ms,
        });
    }

    /// When the device first progressed past the start threshold, if known.
    pub fn active_since(&self) -> Option<i64> {
        self.active_since
    }

    /// One-way latch; later calls never move an already-set start time.
    pub fn mark_active(&mut self, timestamp_ms: i64) {
        if self.active_since.is_none() {
            self.active_since = Some(timestamp_ms);
        }
    }

    /// Forget route-relative state after a route rebuild. History survives;
    /// the last match and the activity latch refer to the old geometry.
    pub(crate) fn reset_route_state(&mut self) {
        self.last_match = None;
        self.active_since = None;
    }

    /// Great-circle bearing from `window` samples back to the latest sample.
    ///
    /// `None` when there is no history or the two endpoints coincide.
    pub fn recent_heading(&self, window: usize) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let n = window.max(1).min(self.history.len());
        let a = self.history[self.history.len() - n];
        let b = self.history[self.history.len() - 1];
        if a.lat == b.lat && a.lng == b.lng {
            return None;
        }
        Some(initial_bearing(&a.coord(), &b.coord()))
    }
}

/// Distance-weighted mean speed and per-segment dispersion over `samples`.
///
/// The mean is `total distance / total elapsed time`, not a naive average of
/// per-segment speeds, so long segments weigh in proportionally. Segments
/// with non-positive elapsed time are skipped. Returns `None` when fewer
/// than two usable samples exist.
pub fn summarize_speeds(samples: &[PositionSample]) -> Option<SpeedStats> {
    if samples.len() < 2 {
        return None;
    }
    let mut speeds = Vec::with_capacity(samples.len() - 1);
    let mut total_dist = 0.0;
    let mut total_ms: i64 = 0;
    for pair in samples.windows(2) {
        let span_ms = pair[1].timestamp_ms - pair[0].timestamp_ms;
        if span_ms <= 0 {
            continue;
        }
        let dist = haversine_distance(&pair[0].coord(), &pair[1].coord());
        let speed = dist / (span_ms as f64 / 1000.0);
        if speed.is_finite() && speed >= 0.0 {
            speeds.push(speed);
            total_dist += dist;
            total_ms += span_ms;
        }
    }
    if speeds.is_empty() || total_ms <= 0 {
        return None;
    }
    let mean_ms = total_dist / (total_ms as f64 / 1000.0);
    let std_dev = if speeds.len() > 1 {
        let variance_sum: f64 = speeds.iter().map(|s| (s - mean_ms).powi(2)).sum();
        (variance_sum / (speeds.len() - 1) as f64).sqrt()
    } else {
        0.0
    };
    Some(SpeedStats {
        mean_ms,
        std_dev,
        segment_count: speeds.len(),
    })
}

/// Layered history selection; see the module documentation.
pub(crate) fn select_history_samples(
    state: &DeviceState,
    now_ms: i64,
    config: &TrackerConfig,
) -> Vec<PositionSample> {
    let cutoff = now_ms - config.history_window_ms;

    let windowed_active: Vec<PositionSample> = state
        .history()
        .iter()
        .filter(|s| {
            s.timestamp_ms >= cutoff
                && state.active_since().is_none_or(|a| s.timestamp_ms >= a)
        })
        .copied()
        .collect();
    if windowed_active.len() >= 2 {
        return windowed_active;
    }

    let windowed: Vec<PositionSample> = state
        .history()
        .iter()
        .filter(|s| s.timestamp_ms >= cutoff)
        .copied()
        .collect();
    if !windowed.is_empty() {
        return windowed;
    }

    state.history().iter().copied().collect()
}

/// Classify proximity to the route endpoints.
///
/// Within the proximity band of exactly one endpoint, that endpoint wins.
/// Within both bands (degenerate short routes) the previous known position
/// decides: its distance-along if a last match exists, otherwise the
/// previous history sample re-projected, otherwise `Start`.
pub(crate) fn infer_endpoint(
    matcher: &mut RouteMatcher,
    profile: &RouteProfile,
    distance_along: f64,
    previous: Option<LastMatch>,
    previous_sample: Option<PositionSample>,
    config: &TrackerConfig,
) -> Option<Endpoint> {
    let total = profile.total_length();
    if !distance_along.is_finite() || total <= 0.0 {
        return None;
    }
    let near_start = distance_along <= config.endpoint_proximity_m;
    let near_finish = (total - distance_along).max(0.0) <= config.endpoint_proximity_m;
    match (near_start, near_finish) {
        (false, false) => None,
        (true, false) => Some(Endpoint::Start),
        (false, true) => Some(Endpoint::Finish),
        (true, true) => {
            if let Some(prev) = previous {
                return Some(half_of(prev.distance_along, total));
            }
            if let Some(sample) = previous_sample {
                if let Some(proj) = matcher.project(profile, &sample.coord()) {
                    return Some(half_of(proj.distance_along, total));
                }
            }
            Some(Endpoint::Start)
        }
    }
}

fn half_of(distance_along: f64, total: f64) -> Endpoint {
    if distance_along > total / 2.0 {
        Endpoint::Finish
    } else {
        Endpoint::Start
    }
}

/// Confidence interval around an arrival estimate, from the standard error
/// of the mean speed. `None` whenever the bounds would be degenerate.
pub(crate) fn eta_interval(
    delta_m: f64,
    stats: &SpeedStats,
    now_ms: i64,
    z: f64,
) -> Option<EtaInterval> {
    if stats.mean_ms <= 0.0 || stats.std_dev <= 0.0 || stats.segment_count < 2 {
        return None;
    }
    let standard_error = stats.std_dev / (stats.segment_count as f64).sqrt();
    if !standard_error.is_finite() || standard_error <= 0.0 {
        return None;
    }
    let margin = z * standard_error;
    if !margin.is_finite() || margin <= 0.0 || margin >= stats.mean_ms {
        return None;
    }
    let fast = stats.mean_ms + margin;
    let slow = stats.mean_ms - margin;
    if fast <= 0.0 || slow <= 0.0 {
        return None;
    }
    Some(EtaInterval {
        earliest_ms: now_ms + (delta_m / fast * 1000.0).round() as i64,
        latest_ms: now_ms + (delta_m / slow * 1000.0).round() as i64,
        confidence: 0.9,
    })
}

/// Replay the stored history through the matcher, chaining each projection
/// as the next hint, and report when the start threshold was first crossed.
///
/// This back-computation lets a late-joining observer see a historically
/// accurate start time. Replay with irregular sampling may differ slightly
/// from what live matching would have produced; that divergence is accepted.
pub(crate) fn find_active_start_time(
    matcher: &mut RouteMatcher,
    profile: &RouteProfile,
    state: &DeviceState,
    threshold_m: f64,
) -> Option<i64> {
    let mut hint: Option<f64> = None;
    for sample in state.history() {
        let Some(proj) = matcher.project_with_hint(profile, &sample.coord(), hint, None) else {
            continue;
        };
        hint = Some(proj.distance_along);
        if proj.distance_along >= threshold_m {
            return Some(sample.timestamp_ms);
        }
    }
    None
}
