// src/persistence/http.rs
//! Upload finished runs to the run API

use super::RunSink;
use crate::{
    error::{Result, TrackerError},
    geo::GeoFix,
    tracking::PersistedRunRecord,
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoutePoint {
    latitude: f64,
    longitude: f64,
    /// Milliseconds since the Unix epoch
    timestamp: i64,
}

impl From<&GeoFix> for RoutePoint {
    fn from(fix: &GeoFix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunPayload<'a> {
    user_id: &'a str,
    distance_km: f64,
    duration_sec: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    route: Option<Vec<RoutePoint>>,
}

/// `POST {base_url}/runs` with the run as JSON.
pub struct HttpRunSink {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
}

impl HttpRunSink {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/runs", self.base_url)
    }

    fn payload<'a>(&'a self, record: &PersistedRunRecord) -> RunPayload<'a> {
        RunPayload {
            user_id: &self.user_id,
            distance_km: record.distance_km,
            duration_sec: record.duration_secs,
            route: record
                .route
                .as_ref()
                .map(|route| route.iter().map(RoutePoint::from).collect()),
        }
    }
}

#[async_trait]
impl RunSink for HttpRunSink {
    async fn submit_run(&self, record: &PersistedRunRecord) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&self.payload(record))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Persistence(format!(
                "server answered {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(())
    }
}
