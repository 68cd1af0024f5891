// src/sources/replay.rs
//! Replays recorded fixes from a JSON-lines file

use super::{EventSender, PositionSource, SourceEvent, Subscription, SubscriptionId, TaskSubscription};
use crate::{
    error::{Result, TrackerError},
    geo::GeoFix,
};
use async_trait::async_trait;
use std::{path::Path, time::Duration};
use tracing::{info, warn};

/// Parse one fix per non-empty line.
pub fn parse_fixes(contents: &str) -> Result<Vec<GeoFix>> {
    let mut fixes = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fix: GeoFix = serde_json::from_str(line)
            .map_err(|e| TrackerError::Parse(format!("line {}: {}", index + 1, e)))?;
        if !fix.is_valid() {
            return Err(TrackerError::Parse(format!("line {}: coordinates out of range", index + 1)));
        }
        fixes.push(fix);
    }
    Ok(fixes)
}

/// Plays fixes back with their original spacing divided by `speed`.
/// A `speed` of zero or less, or one that is not finite, delivers them
/// without waiting.
pub struct ReplaySource {
    fixes: Vec<GeoFix>,
    speed: f64,
    position: usize,
    events: EventSender,
}

impl ReplaySource {
    pub fn new(fixes: Vec<GeoFix>, speed: f64, events: EventSender) -> Self {
        let speed = if speed.is_finite() {
            speed
        } else {
            warn!(speed, "replay speed is not finite, replaying without delay");
            0.0
        };
        Self {
            fixes,
            speed,
            position: 0,
            events,
        }
    }

    pub fn open(path: &Path, speed: f64, events: EventSender) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let fixes = parse_fixes(&contents)?;
        info!(path = %path.display(), fixes = fixes.len(), "loaded replay file");
        Ok(Self::new(fixes, speed, events))
    }

    fn delay(&self, from: &GeoFix, to: &GeoFix) -> Option<Duration> {
        if self.speed <= 0.0 {
            return None;
        }
        let gap = (to.timestamp - from.timestamp).to_std().ok()?;
        // Gaps too long to represent are not waited for
        Duration::try_from_secs_f64(gap.as_secs_f64() / self.speed).ok()
    }
}

#[async_trait]
impl PositionSource for ReplaySource {
    async fn current_fix(&mut self) -> Result<GeoFix> {
        let first = *self
            .fixes
            .first()
            .ok_or_else(|| TrackerError::Acquisition("replay file has no fixes".to_string()))?;
        self.position = 1;
        Ok(first)
    }

    async fn subscribe(&mut self) -> Result<Box<dyn Subscription>> {
        let id = SubscriptionId::next();
        let events = self.events.clone();
        let start = self.position.min(self.fixes.len());

        let mut previous = start.checked_sub(1).map(|i| self.fixes[i]);
        let mut schedule = Vec::with_capacity(self.fixes.len() - start);
        for fix in &self.fixes[start..] {
            let wait = previous.as_ref().and_then(|p| self.delay(p, fix));
            schedule.push((wait, *fix));
            previous = Some(*fix);
        }
        self.position = self.fixes.len();

        let task = tokio::spawn(async move {
            for (wait, fix) in schedule {
                if let Some(wait) = wait {
                    tokio::time::sleep(wait).await;
                }
                if events.send(SourceEvent::Fix { subscription: id, fix }).is_err() {
                    return;
                }
            }
            let _ = events.send(SourceEvent::Closed {
                subscription: id,
                reason: Some("end of replay".to_string()),
            });
        });

        Ok(Box::new(TaskSubscription::new(id, task)))
    }
}
