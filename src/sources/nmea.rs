// src/sources/nmea.rs
//! NMEA 0183 position source over a serial port

use super::{
    with_timeout, EventSender, PositionSource, SourceEvent, Subscription, SubscriptionId,
    TaskSubscription,
};
use crate::{
    error::{Result, TrackerError},
    geo::GeoFix,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::warn;

/// Parse a single NMEA sentence into a fix.
///
/// GGA and RMC carry positions; anything else, or a sentence reporting no
/// fix, yields `None`.
pub fn parse_nmea_fix(line: &str) -> Option<GeoFix> {
    let line = line.trim();
    let body = line.split('*').next().unwrap_or(line);
    let parts: Vec<&str> = body.split(',').collect();

    if line.starts_with("$GPGGA") || line.starts_with("$GNGGA") {
        parse_gga(&parts)
    } else if line.starts_with("$GPRMC") || line.starts_with("$GNRMC") {
        parse_rmc(&parts)
    } else {
        None
    }
}

/// GGA: time, lat, N/S, lon, E/W, quality, ...
fn parse_gga(parts: &[&str]) -> Option<GeoFix> {
    if parts.len() < 7 {
        return None;
    }

    let quality = parts[6].parse::<u8>().ok()?;
    if quality == 0 {
        return None;
    }

    let latitude = parse_coordinate(parts[2], parts[3])?;
    let longitude = parse_coordinate(parts[4], parts[5])?;
    let time = parse_time(parts[1])?;
    let timestamp = Utc::now().date_naive().and_time(time).and_utc();

    GeoFix::new(latitude, longitude, timestamp).ok()
}

/// RMC: time, status, lat, N/S, lon, E/W, speed, course, date, ...
fn parse_rmc(parts: &[&str]) -> Option<GeoFix> {
    if parts.len() < 10 || parts[2] != "A" {
        return None;
    }

    let latitude = parse_coordinate(parts[3], parts[4])?;
    let longitude = parse_coordinate(parts[5], parts[6])?;
    let time = parse_time(parts[1])?;
    let date = NaiveDate::parse_from_str(parts[9], "%d%m%y").ok()?;
    let timestamp: DateTime<Utc> = date.and_time(time).and_utc();

    GeoFix::new(latitude, longitude, timestamp).ok()
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed degrees
fn parse_coordinate(value: &str, hemisphere: &str) -> Option<f64> {
    if value.is_empty() || hemisphere.is_empty() {
        return None;
    }
    let raw = value.parse::<f64>().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let coordinate = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Some(coordinate),
        "S" | "W" => Some(-coordinate),
        _ => None,
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let whole = value.split('.').next()?;
    NaiveTime::parse_from_str(whole, "%H%M%S").ok()
}

/// Reads sentences from a serial port and yields each new fix once.
///
/// Receivers usually send GGA and RMC for the same epoch; the second one
/// carries the same timestamp and is skipped.
struct FixReader {
    reader: BufReader<SerialStream>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl FixReader {
    fn open(port: &str, baudrate: u32) -> Result<Self> {
        let serial = tokio_serial::new(port, baudrate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| TrackerError::Connection(format!("Failed to open serial port {}: {}", port, e)))?;

        Ok(Self {
            reader: BufReader::new(serial),
            last_timestamp: None,
        })
    }

    async fn next_fix(&mut self) -> Result<GeoFix> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(TrackerError::Connection("serial port closed".to_string()));
            }
            if let Some(fix) = parse_nmea_fix(&line) {
                if self.last_timestamp == Some(fix.timestamp) {
                    continue;
                }
                self.last_timestamp = Some(fix.timestamp);
                return Ok(fix);
            }
        }
    }
}

pub struct NmeaSerialSource {
    port: String,
    baudrate: u32,
    fix_timeout: Duration,
    events: EventSender,
}

impl NmeaSerialSource {
    pub fn new(port: String, baudrate: u32, fix_timeout: Duration, events: EventSender) -> Self {
        Self {
            port,
            baudrate,
            fix_timeout,
            events,
        }
    }
}

#[async_trait]
impl PositionSource for NmeaSerialSource {
    async fn current_fix(&mut self) -> Result<GeoFix> {
        let mut reader = FixReader::open(&self.port, self.baudrate)?;
        with_timeout(self.fix_timeout, "an NMEA fix", reader.next_fix()).await
    }

    async fn subscribe(&mut self) -> Result<Box<dyn Subscription>> {
        let mut reader = FixReader::open(&self.port, self.baudrate)?;
        let id = SubscriptionId::next();
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let reason = loop {
                match reader.next_fix().await {
                    Ok(fix) => {
                        if events.send(SourceEvent::Fix { subscription: id, fix }).is_err() {
                            return;
                        }
                    }
                    Err(e) => break e.to_string(),
                }
            };
            warn!(%reason, "serial stream ended");
            let _ = events.send(SourceEvent::Closed {
                subscription: id,
                reason: Some(reason),
            });
        });

        Ok(Box::new(TaskSubscription::new(id, task)))
    }
}

/// List available serial ports
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| TrackerError::Other(format!("Failed to list serial ports: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
