// src/tracking/metrics.rs
//! Pace and target progress derived from distance and time

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Minutes per kilometer, `0.0` while no distance has been covered
    pub pace_min_per_km: f64,
    /// Fraction of the target covered, clamped to `[0, 1]`
    pub progress: f64,
    pub remaining_km: f64,
}

impl RunMetrics {
    pub fn derive(distance_km: f64, elapsed_seconds: u64, target_km: f64) -> Self {
        let pace_min_per_km = if distance_km > 0.0 {
            (elapsed_seconds as f64 / 60.0) / distance_km
        } else {
            0.0
        };

        let progress = if target_km > 0.0 {
            (distance_km / target_km).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            pace_min_per_km,
            progress,
            remaining_km: (target_km - distance_km).max(0.0),
        }
    }

    pub fn has_pace(&self) -> bool {
        self.pace_min_per_km > 0.0
    }

    /// Progress as a whole percentage for display
    pub fn progress_percent(&self) -> u32 {
        (self.progress * 100.0).round() as u32
    }
}

/// Edge-triggered "target reached" flag, armed once per session.
#[derive(Debug, Clone, Default)]
pub struct TargetLatch {
    fired: bool,
}

impl TargetLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only on the first observation at or past the target.
    pub fn observe(&mut self, distance_km: f64, target_km: f64) -> bool {
        if self.fired || target_km <= 0.0 || distance_km < target_km {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn reset(&mut self) {
        self.fired = false;
    }
}

/// Format pace as `m:ss`; the zero sentinel renders as `0:00`.
pub fn format_pace(pace_min_per_km: f64) -> String {
    if !pace_min_per_km.is_finite() || pace_min_per_km <= 0.0 {
        return "0:00".to_string();
    }
    let total_seconds = (pace_min_per_km * 60.0).round() as u64;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Format elapsed time as `MM:SS`, or `HH:MM:SS` from one hour on.
pub fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}
