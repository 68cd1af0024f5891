// src/export.rs
//! Route export for finished runs

use crate::{
    error::{Result, TrackerError},
    geo::GeoFix,
    tracking::{format_elapsed, format_pace, PersistedRunRecord},
};
use std::{fmt, fs::File, io::Write, path::Path, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFormat {
    Gpx,
    GeoJson,
    Csv,
}

impl RouteFormat {
    pub fn extension(&self) -> &str {
        match self {
            RouteFormat::Gpx => "gpx",
            RouteFormat::GeoJson => "geojson",
            RouteFormat::Csv => "csv",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            RouteFormat::Gpx => "GPX (GPS Exchange)",
            RouteFormat::GeoJson => "GeoJSON",
            RouteFormat::Csv => "CSV",
        }
    }
}

impl fmt::Display for RouteFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for RouteFormat {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gpx" => Ok(RouteFormat::Gpx),
            "geojson" | "json" => Ok(RouteFormat::GeoJson),
            "csv" => Ok(RouteFormat::Csv),
            other => Err(TrackerError::Config(format!("unknown export format '{}'", other))),
        }
    }
}

pub struct RouteExporter<'a> {
    record: &'a PersistedRunRecord,
    route: &'a [GeoFix],
}

impl<'a> RouteExporter<'a> {
    /// Fails when the run was saved without a route
    pub fn new(record: &'a PersistedRunRecord) -> Result<Self> {
        match record.route.as_deref() {
            Some(route) if !route.is_empty() => Ok(Self { record, route }),
            _ => Err(TrackerError::Other(format!(
                "Run {} has no recorded route",
                record.id
            ))),
        }
    }

    pub fn point_count(&self) -> usize {
        self.route.len()
    }

    pub fn export_to_file(&self, path: &Path, format: RouteFormat) -> Result<()> {
        let content = self.render(format)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    pub fn render(&self, format: RouteFormat) -> Result<String> {
        match format {
            RouteFormat::Gpx => Ok(self.to_gpx()),
            RouteFormat::GeoJson => self.to_geojson(),
            RouteFormat::Csv => Ok(self.to_csv()),
        }
    }

    fn title(&self) -> String {
        format!(
            "Run {:.2} km in {}",
            self.record.distance_km,
            format_elapsed(self.record.duration_secs)
        )
    }

    fn to_gpx(&self) -> String {
        let mut gpx = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="Run Tracker" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
"#,
        );
        gpx.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.title())));
        gpx.push_str("    <trkseg>\n");

        for fix in self.route {
            gpx.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\"><time>{}</time></trkpt>\n",
                fix.latitude,
                fix.longitude,
                fix.timestamp.to_rfc3339()
            ));
        }

        gpx.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
        gpx
    }

    fn to_geojson(&self) -> Result<String> {
        let coordinates: Vec<[f64; 2]> = self
            .route
            .iter()
            .map(|fix| [fix.longitude, fix.latitude])
            .collect();
        let times: Vec<String> = self
            .route
            .iter()
            .map(|fix| fix.timestamp.to_rfc3339())
            .collect();

        let metrics = self.record.metrics();
        let feature = serde_json::json!({
            "type": "Feature",
            "geometry": {
                "type": "LineString",
                "coordinates": coordinates,
            },
            "properties": {
                "id": self.record.id.to_string(),
                "distance_km": self.record.distance_km,
                "duration_secs": self.record.duration_secs,
                "pace": format_pace(metrics.pace_min_per_km),
                "completed_at": self.record.completed_at.to_rfc3339(),
                "times": times,
            }
        });

        Ok(serde_json::to_string_pretty(&feature)?)
    }

    fn to_csv(&self) -> String {
        let mut csv = String::from("index,latitude,longitude,timestamp\n");
        for (index, fix) in self.route.iter().enumerate() {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                index,
                fix.latitude,
                fix.longitude,
                fix.timestamp.to_rfc3339()
            ));
        }
        csv
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
