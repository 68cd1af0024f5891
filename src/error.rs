// src/error.rs
//! Error types for the run tracker

use crate::tracking::SessionState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Location permission denied: enable location access to start tracking")]
    PermissionDenied,

    #[error("Could not start tracking: {0}")]
    Acquisition(String),

    #[error("Failed to save run: {0}")]
    Persistence(String),

    #[error("Cannot {action} a session that is {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("Invalid fix: latitude {latitude}, longitude {longitude}")]
    InvalidFix { latitude: f64, longitude: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Error: {0}")]
    Other(String),
}

impl TrackerError {
    /// Wrap any source failure as an acquisition failure, keeping its message.
    pub fn acquisition(error: impl std::fmt::Display) -> Self {
        TrackerError::Acquisition(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_single_line() {
        let errors = [
            TrackerError::PermissionDenied,
            TrackerError::acquisition("gpsd not reachable"),
            TrackerError::InvalidTransition {
                action: "start",
                state: SessionState::Stopped,
            },
        ];

        for error in errors {
            assert!(!error.to_string().contains('\n'));
        }
    }

    #[test]
    fn test_acquisition_wraps_source_error() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "no fix");
        let err = TrackerError::acquisition(TrackerError::from(io));
        assert_eq!(err.to_string(), "Could not start tracking: IO error: no fix");
    }
}
