// src/sources/mod.rs
//! Position, permission and clock collaborators

pub mod gpsd;
pub mod nmea;
pub mod permission;
pub mod replay;
pub mod timer;

pub use gpsd::GpsdSource;
pub use nmea::NmeaSerialSource;
pub use permission::StaticPermission;
pub use replay::ReplaySource;
pub use timer::TokioIntervalTimer;

use crate::{
    config::TrackerConfig,
    error::{Result, TrackerError},
    geo::GeoFix,
    tracking::TimerHandle,
};
use async_trait::async_trait;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};

/// Identifies one fix-stream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate a process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything the sources push into the tracker's event loop.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Tick(TimerHandle),
    Fix {
        subscription: SubscriptionId,
        fix: GeoFix,
    },
    /// The stream ended on its own (EOF, device gone).
    Closed {
        subscription: SubscriptionId,
        reason: Option<String>,
    },
}

pub type EventSender = mpsc::UnboundedSender<SourceEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SourceEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[async_trait]
pub trait LocationPermission: Send + Sync {
    async fn has_foreground_permission(&self) -> bool;
    async fn request_foreground_permission(&mut self) -> bool;
}

/// A live fix stream. Cancelling must stop delivery before it returns.
pub trait Subscription: Send {
    fn id(&self) -> SubscriptionId;
    fn cancel(&mut self);
}

#[async_trait]
pub trait PositionSource: Send {
    /// One-shot position request
    async fn current_fix(&mut self) -> Result<GeoFix>;

    /// Start pushing [`SourceEvent::Fix`] events for the returned subscription
    async fn subscribe(&mut self) -> Result<Box<dyn Subscription>>;
}

/// Subscription backed by a spawned reader task.
pub struct TaskSubscription {
    id: SubscriptionId,
    task: Option<JoinHandle<()>>,
}

impl TaskSubscription {
    pub fn new(id: SubscriptionId, task: JoinHandle<()>) -> Self {
        Self {
            id,
            task: Some(task),
        }
    }
}

impl Subscription for TaskSubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TaskSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Await `fut` for at most `limit`, mapping expiry to an acquisition error.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TrackerError::Acquisition(format!(
            "timed out after {}s waiting for {}",
            limit.as_secs(),
            what
        ))),
    }
}

/// Build the position source selected by the configuration
pub fn from_config(config: &TrackerConfig, events: EventSender) -> Result<Box<dyn PositionSource>> {
    let fix_timeout = Duration::from_secs(config.fix_timeout_secs.max(1));

    match config.source_type.as_str() {
        "gpsd" => Ok(Box::new(GpsdSource::new(
            config.gpsd_host.clone().unwrap_or_else(|| "localhost".to_string()),
            config.gpsd_port.unwrap_or(2947),
            fix_timeout,
            events,
        ))),
        "serial" => {
            let port = config
                .serial_port
                .clone()
                .ok_or_else(|| {
                    let available = nmea::list_serial_ports().unwrap_or_default();
                    TrackerError::Config(format!(
                        "serial source needs serial_port (available: {})",
                        if available.is_empty() { "none".to_string() } else { available.join(", ") }
                    ))
                })?;
            Ok(Box::new(NmeaSerialSource::new(
                port,
                config.serial_baudrate.unwrap_or(9600),
                fix_timeout,
                events,
            )))
        }
        "replay" => {
            let path = config
                .replay_file
                .clone()
                .ok_or_else(|| TrackerError::Config("replay source needs replay_file".to_string()))?;
            Ok(Box::new(ReplaySource::open(&path, config.replay_speed, events)?))
        }
        other => Err(TrackerError::Config(format!("unknown source type '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unknown_source_type() {
        let (tx, _rx) = event_channel();
        let mut config = TrackerConfig::default();
        config.update_source("bluetooth");
        assert!(matches!(from_config(&config, tx), Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_serial_requires_port() {
        let (tx, _rx) = event_channel();
        let mut config = TrackerConfig::default();
        config.update_source("serial");
        config.serial_port = None;
        assert!(from_config(&config, tx).is_err());
    }

    #[tokio::test]
    async fn test_task_subscription_cancel_aborts() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let mut sub = TaskSubscription::new(SubscriptionId::next(), task);
        sub.cancel();
        sub.cancel();
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "a fix", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(TrackerError::Acquisition(_))));
    }
}
