// src/tracking/session.rs
//! Session data: the in-progress run, its snapshot, and the persisted record

use super::{accumulator::DistanceAccumulator, metrics::RunMetrics};
use crate::geo::GeoFix;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Tracking,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Tracking => write!(f, "tracking"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Mutable state of one run. Only the lifecycle touches it.
#[derive(Debug)]
pub(crate) struct TrackingSession {
    pub id: Uuid,
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub distance: DistanceAccumulator,
    pub route: Option<Vec<GeoFix>>,
    pub last_fix: Option<GeoFix>,
}

impl TrackingSession {
    pub fn new(record_route: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            started_at: None,
            distance: DistanceAccumulator::new(),
            route: record_route.then(Vec::new),
            last_fix: None,
        }
    }

    pub fn record_fix(&mut self, fix: GeoFix) {
        self.last_fix = Some(fix);
        if let Some(route) = self.route.as_mut() {
            route.push(fix);
        }
    }

    pub fn distance_km(&self) -> f64 {
        self.distance.total_km()
    }

    pub fn route_len(&self) -> usize {
        self.route.as_ref().map_or(0, Vec::len)
    }
}

/// Finalized run handed to a [`crate::persistence::RunSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRunRecord {
    pub id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    pub distance_km: f64,
    pub duration_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Vec<GeoFix>>,
}

impl PersistedRunRecord {
    pub fn metrics(&self) -> RunMetrics {
        RunMetrics::derive(self.distance_km, self.duration_secs, 0.0)
    }
}

/// Read-only view of a session for display.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub distance_km: f64,
    pub elapsed_seconds: u64,
    pub metrics: RunMetrics,
    pub target_km: f64,
    pub target_reached: bool,
    pub route_points: usize,
    pub last_fix: Option<GeoFix>,
}

impl SessionSnapshot {
    pub fn is_tracking(&self) -> bool {
        self.state == SessionState::Tracking
    }
}
