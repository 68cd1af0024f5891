// src/tracking/filter.rs
//! GPS noise filtering between consecutive fixes

use crate::geo::GeoFix;
use serde::{Deserialize, Serialize};

/// Upper bound a runner can plausibly cover between two fixes
pub const DEFAULT_MAX_JUMP_KM: f64 = 0.2;

/// Movement floor used by the minimum-movement policy (5 m)
pub const DEFAULT_MIN_MOVEMENT_KM: f64 = 0.005;

/// How a fix-to-fix delta is judged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Drop deltas larger than `max_km` as GPS jumps.
    MaxJump { max_km: f64 },
    /// Ignore deltas not exceeding `min_km` as jitter around a standing point.
    MinMovement { min_km: f64 },
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy::MaxJump {
            max_km: DEFAULT_MAX_JUMP_KM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooFar,
    TooClose,
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterDecision {
    pub accepted: bool,
    pub delta_km: f64,
    pub reason: Option<RejectReason>,
}

impl FilterDecision {
    fn accept(delta_km: f64) -> Self {
        Self {
            accepted: true,
            delta_km,
            reason: None,
        }
    }

    fn reject(delta_km: f64, reason: RejectReason) -> Self {
        Self {
            accepted: false,
            delta_km,
            reason: Some(reason),
        }
    }
}

/// Judge `next` against the last accepted fix. Has no side effects.
pub fn evaluate(policy: FilterPolicy, previous: Option<&GeoFix>, next: &GeoFix) -> FilterDecision {
    let previous = match previous {
        Some(p) => p,
        None => return FilterDecision::accept(0.0),
    };

    let delta = previous.distance_km(next);
    if !delta.is_finite() || delta < 0.0 {
        return FilterDecision::reject(delta, RejectReason::NonFinite);
    }

    match policy {
        FilterPolicy::MaxJump { max_km } if delta > max_km => {
            FilterDecision::reject(delta, RejectReason::TooFar)
        }
        FilterPolicy::MinMovement { min_km } if delta <= min_km => {
            FilterDecision::reject(delta, RejectReason::TooClose)
        }
        _ => FilterDecision::accept(delta),
    }
}

/// Keeps the reference fix and applies [`evaluate`] to each new fix.
#[derive(Debug, Clone)]
pub struct PositionFilter {
    policy: FilterPolicy,
    reference: Option<GeoFix>,
}

impl PositionFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        Self {
            policy,
            reference: None,
        }
    }

    /// Accepted fixes become the new reference; rejected ones are discarded.
    pub fn accept(&mut self, next: GeoFix) -> FilterDecision {
        let decision = evaluate(self.policy, self.reference.as_ref(), &next);
        if decision.accepted {
            self.reference = Some(next);
        }
        decision
    }

    pub fn reference(&self) -> Option<&GeoFix> {
        self.reference.as_ref()
    }

    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }
}
