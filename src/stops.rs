//! # Stop Detection
//!
//! Finds places where the athlete stayed put: runs of samples that remain
//! within a small radius of their first point for longer than a minimum
//! duration, with real travel immediately before or after.
//!
//! ## Algorithm
//!
//! 1. Trim a small fraction of samples from both ends of the stream (GPS is
//!    unreliable while the device is still indoors or being stowed).
//! 2. From index `i`, extend `j` while every sample stays within
//!    `max_stop_radius_m` of sample `i`. This is the stationary window.
//! 3. A window lasting at least `min_duration_minutes` is a candidate. It is
//!    accepted when the sample `movement_sample_offset` steps before the window
//!    or after it is more than `min_movement_threshold_m` away, which rejects
//!    drift recorded while standing still with no travel around it.
//! 4. Continue after the window (or at `i + 1` when there was no candidate).
//!
//! Results are chronological and capped at `max_stops`; the cap keeps the
//! numbered markers legible, so it truncates rather than ranking.

use crate::geo_utils::{compute_center, haversine_distance};
use crate::{GpsPoint, GpsStream};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Configuration for stop detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Minimum dwell time for a stop.
    /// Default: 5 minutes
    pub min_duration_minutes: f64,

    /// Every sample of a stop stays within this distance of its first sample.
    /// Default: 50.0 meters
    pub max_stop_radius_m: f64,

    /// Displacement before or after the window that proves real travel.
    /// Default: 50.0 meters
    pub min_movement_threshold_m: f64,

    /// How many samples before/after the window to compare against.
    /// Default: 10
    pub movement_sample_offset: usize,

    /// Fraction of samples ignored at each end of the stream.
    /// Default: 0.02
    pub trim_fraction: f64,

    /// Maximum stops returned (chronologically first ones win).
    /// Default: 9
    pub max_stops: usize,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            min_duration_minutes: 5.0,
            max_stop_radius_m: 50.0,
            min_movement_threshold_m: 50.0,
            movement_sample_offset: 10,
            trim_fraction: 0.02,
            max_stops: 9,
        }
    }
}

/// A detected stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Mean position of all samples in the window
    pub point: GpsPoint,
    /// Seconds from activity start
    pub start_time: f64,
    pub end_time: f64,
    pub duration_seconds: f64,
    /// Number of samples in the window
    pub support_point_count: usize,
    pub movement_before_meters: f64,
    pub movement_after_meters: f64,
}

impl Stop {
    pub fn duration_minutes(&self) -> f64 {
        self.duration_seconds / 60.0
    }
}

/// Detect stops in a GPS stream.
///
/// Returns an empty list when nothing qualifies; no placeholder stop is ever
/// synthesized.
pub fn detect_stops(stream: &GpsStream, config: &StopConfig) -> Vec<Stop> {
    let coords = stream.coordinates();
    let times = stream.timestamps();
    let n = coords.len();

    let trim = (n as f64 * config.trim_fraction).floor() as usize;
    if n < 2 || trim * 2 >= n {
        return Vec::new();
    }
    let start = trim;
    let end = n - trim;
    let min_duration = config.min_duration_minutes * 60.0;

    let mut stops = Vec::new();
    let mut discarded = 0usize;
    let mut i = start;

    while i < end {
        let anchor = &coords[i];
        let mut stationary_end = i;
        while stationary_end + 1 < end
            && haversine_distance(anchor, &coords[stationary_end + 1]) <= config.max_stop_radius_m
        {
            stationary_end += 1;
        }

        let duration = times[stationary_end] - times[i];
        if stationary_end == i || duration < min_duration {
            i += 1;
            continue;
        }

        let before = i.saturating_sub(config.movement_sample_offset);
        let after = (stationary_end + config.movement_sample_offset).min(n - 1);
        let movement_before = haversine_distance(&coords[before], anchor);
        let movement_after = haversine_distance(&coords[stationary_end], &coords[after]);

        if movement_before > config.min_movement_threshold_m
            || movement_after > config.min_movement_threshold_m
        {
            if stops.len() < config.max_stops {
                stops.push(Stop {
                    point: compute_center(&coords[i..=stationary_end]),
                    start_time: times[i],
                    end_time: times[stationary_end],
                    duration_seconds: duration,
                    support_point_count: stationary_end - i + 1,
                    movement_before_meters: movement_before,
                    movement_after_meters: movement_after,
                });
            } else {
                discarded += 1;
            }
        } else {
            debug!(
                "[StopDetector] Rejected {:.1} min window at {}..={}: no movement around it ({:.0}m / {:.0}m)",
                duration / 60.0,
                i,
                stationary_end,
                movement_before,
                movement_after
            );
        }

        i = stationary_end + 1;
    }

    if discarded > 0 {
        info!(
            "[StopDetector] Kept first {} stops, discarded {} later ones",
            stops.len(),
            discarded
        );
    }
    debug!("[StopDetector] {} samples -> {} stops", n, stops.len());

    stops
}
