// src/persistence/mod.rs
//! Where finished runs go

pub mod history;
pub mod http;

pub use history::{HistorySummary, JsonlHistory};
pub use http::HttpRunSink;

use crate::{error::Result, tracking::PersistedRunRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Persistence collaborator. Called at most once per completed session; the
/// tracker logs a failure and never retries.
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn submit_run(&self, record: &PersistedRunRecord) -> Result<()>;
}

/// Submits to every sink in order. All sinks are tried; the first error is
/// returned.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn RunSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn RunSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl RunSink for FanoutSink {
    async fn submit_run(&self, record: &PersistedRunRecord) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.submit_run(record).await {
                warn!(run = %record.id, error = %e, "sink rejected run");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
