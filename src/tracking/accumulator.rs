// src/tracking/accumulator.rs
//! Running distance total

#[derive(Debug, Clone, Default)]
pub struct DistanceAccumulator {
    total_km: f64,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an accepted delta and return the new total.
    ///
    /// Non-finite or negative deltas are dropped and `None` is returned; the
    /// total never decreases.
    pub fn add_delta(&mut self, delta_km: f64) -> Option<f64> {
        if !delta_km.is_finite() || delta_km < 0.0 {
            return None;
        }
        self.total_km += delta_km;
        Some(self.total_km)
    }

    pub fn total_km(&self) -> f64 {
        self.total_km
    }

    pub fn reset(&mut self) {
        self.total_km = 0.0;
    }
}
