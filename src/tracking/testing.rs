// src/tracking/testing.rs
//! In-memory collaborators for exercising the tracker without devices

use super::{
    clock::{IntervalTimer, TimerHandle},
    lifecycle::{EventOutcome, Notice, NoticeReceiver, RunTracker, TrackerContext, TrackerSettings},
    session::PersistedRunRecord,
};
use crate::{
    error::{Result, TrackerError},
    geo::{GeoFix, EARTH_RADIUS_KM},
    persistence::RunSink,
    sources::{PositionSource, SourceEvent, StaticPermission, Subscription, SubscriptionId},
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;

/// Fix `km` kilometers north of (0, 106.8), `secs` after a fixed start time.
pub fn north_fix(km: f64, secs: i64) -> GeoFix {
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
    let lat = (km / EARTH_RADIUS_KM).to_degrees();
    GeoFix::new(lat, 106.8, t0 + ChronoDuration::seconds(secs)).unwrap()
}

#[derive(Default)]
struct TimerState {
    next: u64,
    created: usize,
    active: Vec<TimerHandle>,
}

#[derive(Clone, Default)]
pub struct FakeTimer {
    state: Arc<Mutex<TimerState>>,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn active(&self) -> Vec<TimerHandle> {
        self.state.lock().unwrap().active.clone()
    }

    /// `n` ticks from every live timer
    pub fn tick_all(&self, n: usize) -> Vec<TimerHandle> {
        let active = self.active();
        (0..n).flat_map(|_| active.iter().copied()).collect()
    }
}

impl IntervalTimer for FakeTimer {
    fn set_interval(&mut self, _period: Duration) -> TimerHandle {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        state.created += 1;
        let handle = TimerHandle::new(state.next);
        state.active.push(handle);
        handle
    }

    fn clear_interval(&mut self, handle: TimerHandle) {
        self.state.lock().unwrap().active.retain(|h| *h != handle);
    }
}

struct PositionsState {
    initial: Option<GeoFix>,
    fail_subscribe: bool,
    subscribed: Vec<SubscriptionId>,
    cancelled: Vec<SubscriptionId>,
}

#[derive(Clone)]
pub struct FakePositions {
    state: Arc<Mutex<PositionsState>>,
}

impl FakePositions {
    pub fn new(initial: GeoFix) -> Self {
        Self {
            state: Arc::new(Mutex::new(PositionsState {
                initial: Some(initial),
                fail_subscribe: false,
                subscribed: Vec::new(),
                cancelled: Vec::new(),
            })),
        }
    }

    pub fn set_initial(&self, initial: Option<GeoFix>) {
        self.state.lock().unwrap().initial = initial;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.state.lock().unwrap().fail_subscribe = fail;
    }

    pub fn subscribed(&self) -> Vec<SubscriptionId> {
        self.state.lock().unwrap().subscribed.clone()
    }

    pub fn cancelled(&self) -> Vec<SubscriptionId> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl PositionSource for FakePositions {
    async fn current_fix(&mut self) -> Result<GeoFix> {
        self.state
            .lock()
            .unwrap()
            .initial
            .ok_or_else(|| TrackerError::Acquisition("no fix available".to_string()))
    }

    async fn subscribe(&mut self) -> Result<Box<dyn Subscription>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribe {
            return Err(TrackerError::Connection("stream refused".to_string()));
        }
        let id = SubscriptionId::next();
        state.subscribed.push(id);
        Ok(Box::new(FakeSubscription {
            id,
            state: Arc::clone(&self.state),
            cancelled: false,
        }))
    }
}

struct FakeSubscription {
    id: SubscriptionId,
    state: Arc<Mutex<PositionsState>>,
    cancelled: bool,
}

impl Subscription for FakeSubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.state.lock().unwrap().cancelled.push(self.id);
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<PersistedRunRecord>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submission attempt, failed ones included
    pub fn records(&self) -> Vec<PersistedRunRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl RunSink for RecordingSink {
    async fn submit_run(&self, record: &PersistedRunRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        if *self.failing.lock().unwrap() {
            return Err(TrackerError::Persistence("server unreachable".to_string()));
        }
        Ok(())
    }
}

/// A tracker wired to fakes, with handles to inspect them.
pub struct Harness {
    pub tracker: RunTracker,
    pub timer: FakeTimer,
    pub positions: FakePositions,
    pub sink: RecordingSink,
    pub notices: NoticeReceiver,
}

impl Harness {
    pub fn new(target_km: f64) -> Self {
        Self::build(target_km, true, TrackerSettings::default())
    }

    pub fn with_permission(target_km: f64, granted: bool) -> Self {
        Self::build(target_km, granted, TrackerSettings::default())
    }

    pub fn with_settings(target_km: f64, settings: TrackerSettings) -> Self {
        Self::build(target_km, true, settings)
    }

    fn build(target_km: f64, granted: bool, settings: TrackerSettings) -> Self {
        let timer = FakeTimer::new();
        let positions = FakePositions::new(north_fix(0.0, 0));
        let sink = RecordingSink::new();
        let (tx, notices) = mpsc::unbounded_channel();

        let ctx = TrackerContext::new(target_km, Arc::new(sink.clone()))
            .with_settings(settings)
            .with_notices(tx);
        let tracker = RunTracker::new(
            ctx,
            Box::new(StaticPermission::new(granted)),
            Box::new(positions.clone()),
            Box::new(timer.clone()),
        );

        Self {
            tracker,
            timer,
            positions,
            sink,
            notices,
        }
    }

    /// Deliver `n` ticks from the live timer
    pub fn tick(&mut self, n: usize) {
        for handle in self.timer.tick_all(n) {
            self.tracker.handle_event(SourceEvent::Tick(handle));
        }
    }

    /// Deliver a fix on the most recent subscription
    pub fn fix(&mut self, fix: GeoFix) -> EventOutcome {
        let subscription = *self
            .positions
            .subscribed()
            .last()
            .expect("tracker has not subscribed");
        self.tracker
            .handle_event(SourceEvent::Fix { subscription, fix })
    }

    pub fn notices(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }
}
