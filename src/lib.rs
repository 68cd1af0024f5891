// src/lib.rs
//! Run Tracker Library
//!
//! Client-side GPS run tracking: filters noisy fixes, accumulates distance,
//! keeps the elapsed-time clock, derives pace and target progress, and hands
//! finished runs to persistence sinks.

pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod export;
pub mod geo;
pub mod persistence;
pub mod sources;
pub mod tracking;

// Re-export main types for convenience
pub use config::{RunnerCategory, TrackerConfig};
pub use controller::{ControllerHandle, TrackingController};
pub use error::{Result, TrackerError};
pub use geo::GeoFix;
pub use tracking::{PersistedRunRecord, RunTracker, SessionSnapshot, SessionState};
