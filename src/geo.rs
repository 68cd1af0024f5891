// src/geo.rs
//! Position samples and great-circle distance

use crate::error::{Result, TrackerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A single GPS observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl GeoFix {
    /// Create a fix, rejecting coordinates outside the valid ranges.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Result<Self> {
        let fix = Self {
            latitude,
            longitude,
            timestamp,
        };

        if fix.is_valid() {
            Ok(fix)
        } else {
            Err(TrackerError::InvalidFix {
                latitude,
                longitude,
            })
        }
    }

    /// Create a fix stamped with the current time
    pub fn now(latitude: f64, longitude: f64) -> Result<Self> {
        Self::new(latitude, longitude, Utc::now())
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to another fix in kilometers
    pub fn distance_km(&self, other: &GeoFix) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine distance between two lat/lon pairs given in degrees.
///
/// Spherical Earth of radius [`EARTH_RADIUS_KM`], no altitude correction.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let sin_d_phi = (d_phi / 2.0).sin();
    let sin_d_lambda = (d_lambda / 2.0).sin();

    let a = sin_d_phi * sin_d_phi + phi1.cos() * phi2.cos() * sin_d_lambda * sin_d_lambda;
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}
