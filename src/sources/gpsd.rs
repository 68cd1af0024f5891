// src/sources/gpsd.rs
//! gpsd client position source

use super::{
    with_timeout, EventSender, PositionSource, SourceEvent, Subscription, SubscriptionId,
    TaskSubscription,
};
use crate::{
    error::{Result, TrackerError},
    geo::GeoFix,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(flatten)]
    data: HashMap<String, serde_json::Value>,
}

/// Connect to a gpsd daemon and return a stream reader
pub async fn connect_gpsd(host: &str, port: u16) -> Result<BufReader<TcpStream>> {
    let mut stream = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| TrackerError::Connection(format!("Failed to connect to gpsd at {}:{}: {}", host, port, e)))?;

    // Send WATCH command to start receiving JSON data
    let watch_cmd = "?WATCH={\"enable\":true,\"json\":true}\n";
    stream
        .write_all(watch_cmd.as_bytes())
        .await
        .map_err(|e| TrackerError::Connection(format!("Failed to send WATCH command: {}", e)))?;

    Ok(BufReader::new(stream))
}

/// Parse a single line of gpsd JSON.
///
/// Returns a fix only for TPV reports with a 2D or 3D fix; every other
/// report class yields `None`.
pub fn parse_gpsd_fix(line: &str) -> Result<Option<GeoFix>> {
    let msg: GpsdMessage = serde_json::from_str(line)
        .map_err(|e| TrackerError::Parse(format!("Failed to parse gpsd JSON: {}", e)))?;

    match msg.class.as_str() {
        "TPV" => Ok(parse_tpv_message(&msg.data)),
        "VERSION" => {
            if let Some(version) = msg.data.get("release").and_then(|v| v.as_str()) {
                info!(version, "connected to gpsd");
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Parse TPV (Time Position Velocity) message
fn parse_tpv_message(msg_data: &HashMap<String, serde_json::Value>) -> Option<GeoFix> {
    let mode = msg_data.get("mode").and_then(|v| v.as_u64()).unwrap_or(0);
    if mode < 2 {
        return None;
    }

    let lat = msg_data.get("lat").and_then(|v| v.as_f64())?;
    let lon = msg_data.get("lon").and_then(|v| v.as_f64())?;

    let timestamp = msg_data
        .get("time")
        .and_then(|v| v.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    GeoFix::new(lat, lon, timestamp).ok()
}

async fn next_fix(reader: &mut BufReader<TcpStream>) -> Result<GeoFix> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(TrackerError::Connection("gpsd closed the connection".to_string()));
        }
        match parse_gpsd_fix(line.trim()) {
            Ok(Some(fix)) => return Ok(fix),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "skipping gpsd line"),
        }
    }
}

pub struct GpsdSource {
    host: String,
    port: u16,
    fix_timeout: Duration,
    events: EventSender,
}

impl GpsdSource {
    pub fn new(host: String, port: u16, fix_timeout: Duration, events: EventSender) -> Self {
        Self {
            host,
            port,
            fix_timeout,
            events,
        }
    }
}

#[async_trait]
impl PositionSource for GpsdSource {
    async fn current_fix(&mut self) -> Result<GeoFix> {
        let (host, port) = (self.host.as_str(), self.port);
        with_timeout(self.fix_timeout, "a gpsd fix", async move {
            let mut reader = connect_gpsd(host, port).await?;
            next_fix(&mut reader).await
        })
        .await
    }

    async fn subscribe(&mut self) -> Result<Box<dyn Subscription>> {
        let mut reader = connect_gpsd(&self.host, self.port).await?;
        let id = SubscriptionId::next();
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let reason = loop {
                match next_fix(&mut reader).await {
                    Ok(fix) => {
                        if events.send(SourceEvent::Fix { subscription: id, fix }).is_err() {
                            return;
                        }
                    }
                    Err(e) => break e.to_string(),
                }
            };
            warn!(%reason, "gpsd stream ended");
            let _ = events.send(SourceEvent::Closed {
                subscription: id,
                reason: Some(reason),
            });
        });

        Ok(Box::new(TaskSubscription::new(id, task)))
    }
}
