// src/config.rs
//! Configuration management with file storage under ~/.config

use crate::{
    error::{Result, TrackerError},
    tracking::{FilterPolicy, TrackerSettings, DEFAULT_PERSIST_THRESHOLD_KM},
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};

/// Runner category; decides the default distance target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerCategory {
    #[default]
    Militer,
    Asn,
}

impl RunnerCategory {
    pub fn target_km(&self) -> f64 {
        match self {
            RunnerCategory::Militer => 14.0,
            RunnerCategory::Asn => 10.0,
        }
    }
}

impl fmt::Display for RunnerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerCategory::Militer => write!(f, "militer"),
            RunnerCategory::Asn => write!(f, "asn"),
        }
    }
}

impl FromStr for RunnerCategory {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "militer" => Ok(RunnerCategory::Militer),
            "asn" => Ok(RunnerCategory::Asn),
            other => Err(TrackerError::Config(format!("unknown runner category '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub source_type: String, // "gpsd", "serial", "replay"
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    pub replay_file: Option<PathBuf>,
    pub replay_speed: f64,
    pub fix_timeout_secs: u64,

    pub category: RunnerCategory,
    pub target_km: Option<f64>, // overrides the category target
    pub filter: FilterPolicy,
    pub persist_threshold_km: f64,
    pub record_route: bool,
    pub location_permission: bool,

    pub history_path: Option<PathBuf>,
    pub api_url: Option<String>,
    pub user_id: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            source_type: "gpsd".to_string(),
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            replay_file: None,
            replay_speed: 1.0,
            fix_timeout_secs: 30,
            category: RunnerCategory::default(),
            target_km: None,
            filter: FilterPolicy::default(),
            persist_threshold_km: DEFAULT_PERSIST_THRESHOLD_KM,
            record_route: true,
            location_permission: true,
            history_path: None,
            api_url: None,
            user_id: None,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from storage
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .map_err(|e| TrackerError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| TrackerError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to storage
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_path()?;

        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrackerError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)?;

        std::fs::write(&config_path, contents)
            .map_err(|e| TrackerError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config_path)
    }

    /// `$HOME/.config/run-tracker`
    pub fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| TrackerError::Config("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home).join(".config").join("run-tracker"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.history_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("runs.jsonl")),
        }
    }

    /// Distance goal for this runner
    pub fn effective_target_km(&self) -> f64 {
        self.target_km
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or_else(|| self.category.target_km())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            filter: self.filter,
            persist_threshold_km: self.persist_threshold_km.max(0.0),
            record_route: self.record_route,
        }
    }

    /// Update configuration with new source settings
    pub fn update_source(&mut self, source_type: &str) {
        self.source_type = source_type.to_string();
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.source_type = "serial".to_string();
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate);
    }

    /// Update gpsd settings
    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.source_type = "gpsd".to_string();
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }

    /// Update replay settings
    pub fn update_replay(&mut self, file: PathBuf, speed: f64) {
        self.source_type = "replay".to_string();
        self.replay_file = Some(file);
        self.replay_speed = speed;
    }
}
