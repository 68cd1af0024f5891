// src/persistence/history.rs
//! Local run history as an append-only JSON-lines file

use super::RunSink;
use crate::{
    error::{Result, TrackerError},
    tracking::{format_pace, PersistedRunRecord, RunMetrics},
};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All readable records, oldest first. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<PersistedRunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PersistedRunRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = index + 1, error = %e, "skipping corrupt history line"),
            }
        }
        Ok(records)
    }

    /// Look a run up by full id or unambiguous id prefix
    pub fn find(&self, id: &str) -> Result<PersistedRunRecord> {
        let mut matches: Vec<PersistedRunRecord> = self
            .load()?
            .into_iter()
            .filter(|r| r.id.to_string().starts_with(id))
            .collect();

        match matches.len() {
            0 => Err(TrackerError::Other(format!("No run with id {}", id))),
            1 => Ok(matches.remove(0)),
            n => Err(TrackerError::Other(format!("Id prefix {} matches {} runs", id, n))),
        }
    }
}

#[async_trait]
impl RunSink for JsonlHistory {
    async fn submit_run(&self, record: &PersistedRunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| TrackerError::Persistence(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Totals across a runner's history.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HistorySummary {
    pub total_runs: usize,
    pub total_km: f64,
    pub total_secs: u64,
    pub avg_pace_min_per_km: f64,
}

impl HistorySummary {
    pub fn from_records(records: &[PersistedRunRecord]) -> Self {
        let total_km: f64 = records.iter().map(|r| r.distance_km).sum();
        let total_secs: u64 = records.iter().map(|r| r.duration_secs).sum();

        Self {
            total_runs: records.len(),
            total_km,
            total_secs,
            avg_pace_min_per_km: RunMetrics::derive(total_km, total_secs, 0.0).pace_min_per_km,
        }
    }

    pub fn format_pace(&self) -> String {
        format_pace(self.avg_pace_min_per_km)
    }
}
