// src/tracking/lifecycle.rs
//! Session lifecycle: Idle -> Tracking -> Stopped -> (reset) -> Idle

use super::{
    clock::{ElapsedClock, IntervalTimer},
    filter::{FilterPolicy, PositionFilter, RejectReason},
    metrics::{RunMetrics, TargetLatch},
    session::{PersistedRunRecord, SessionSnapshot, SessionState, TrackingSession},
};
use crate::{
    error::{Result, TrackerError},
    geo::GeoFix,
    persistence::RunSink,
    sources::{LocationPermission, PositionSource, SourceEvent, Subscription, SubscriptionId},
};
use chrono::Utc;
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs at or below this distance are treated as accidental and not saved
pub const DEFAULT_PERSIST_THRESHOLD_KM: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    pub filter: FilterPolicy,
    pub persist_threshold_km: f64,
    pub record_route: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            filter: FilterPolicy::default(),
            persist_threshold_km: DEFAULT_PERSIST_THRESHOLD_KM,
            record_route: true,
        }
    }
}

/// User-facing messages emitted by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    TargetReached { distance_km: f64, target_km: f64 },
    StartFailed(String),
    RunSaved { id: Uuid, distance_km: f64 },
    RunDiscarded { distance_km: f64 },
    PersistenceFailed(String),
    SourceClosed(Option<String>),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::TargetReached { target_km, .. } => {
                write!(f, "Target reached: {} km done", target_km)
            }
            Notice::StartFailed(msg) => write!(f, "{}", msg),
            Notice::RunSaved { distance_km, .. } => write!(f, "Run saved ({:.2} km)", distance_km),
            Notice::RunDiscarded { distance_km } => {
                write!(f, "Run too short to save ({:.3} km)", distance_km)
            }
            Notice::PersistenceFailed(msg) => write!(f, "Run kept locally, upload failed: {}", msg),
            Notice::SourceClosed(Some(reason)) => write!(f, "Position source closed: {}", reason),
            Notice::SourceClosed(None) => write!(f, "Position source closed"),
        }
    }
}

pub type NoticeSender = mpsc::UnboundedSender<Notice>;
pub type NoticeReceiver = mpsc::UnboundedReceiver<Notice>;

/// What the tracker is given by whoever owns it.
#[derive(Clone)]
pub struct TrackerContext {
    pub target_km: f64,
    pub sink: Arc<dyn RunSink>,
    pub settings: TrackerSettings,
    pub notices: Option<NoticeSender>,
}

impl TrackerContext {
    pub fn new(target_km: f64, sink: Arc<dyn RunSink>) -> Self {
        Self {
            target_km,
            sink,
            settings: TrackerSettings::default(),
            notices: None,
        }
    }

    pub fn with_settings(mut self, settings: TrackerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_notices(mut self, notices: NoticeSender) -> Self {
        self.notices = Some(notices);
        self
    }
}

/// Result of feeding one [`SourceEvent`] to the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventOutcome {
    Ignored,
    Ticked { elapsed_seconds: u64 },
    FixAccepted { delta_km: f64, total_km: f64 },
    FixRejected(RejectReason),
    SourceClosed,
}

pub struct RunTracker {
    ctx: TrackerContext,
    permission: Box<dyn LocationPermission>,
    positions: Box<dyn PositionSource>,
    clock: ElapsedClock,
    filter: PositionFilter,
    latch: TargetLatch,
    session: TrackingSession,
    subscription: Option<Box<dyn Subscription>>,
}

impl RunTracker {
    pub fn new(
        ctx: TrackerContext,
        permission: Box<dyn LocationPermission>,
        positions: Box<dyn PositionSource>,
        timer: Box<dyn IntervalTimer>,
    ) -> Self {
        let settings = ctx.settings;
        Self {
            ctx,
            permission,
            positions,
            clock: ElapsedClock::new(timer),
            filter: PositionFilter::new(settings.filter),
            latch: TargetLatch::new(),
            session: TrackingSession::new(settings.record_route),
            subscription: None,
        }
    }

    /// Idle -> Tracking.
    ///
    /// A no-op while already tracking. On failure the tracker is back in a
    /// clean Idle state with no timer or subscription left behind.
    pub async fn start(&mut self) -> Result<()> {
        match self.session.state {
            SessionState::Tracking => return Ok(()),
            SessionState::Stopped => {
                return Err(TrackerError::InvalidTransition {
                    action: "start",
                    state: SessionState::Stopped,
                })
            }
            SessionState::Idle => {}
        }

        if !self.ensure_permission().await {
            warn!("location permission denied");
            let err = TrackerError::PermissionDenied;
            self.notify(Notice::StartFailed(err.to_string()));
            return Err(err);
        }

        self.clock.start();

        if let Err(e) = self.acquire().await {
            self.unwind();
            let err = match e {
                TrackerError::Acquisition(_) => e,
                other => TrackerError::acquisition(other),
            };
            warn!(error = %err, "tracking start unwound");
            self.notify(Notice::StartFailed(err.to_string()));
            return Err(err);
        }

        self.session.state = SessionState::Tracking;
        self.session.started_at = Some(Utc::now());
        info!(
            session = %self.session.id,
            target_km = self.ctx.target_km,
            filter = ?self.filter.policy(),
            "tracking started"
        );
        Ok(())
    }

    async fn ensure_permission(&mut self) -> bool {
        if self.permission.has_foreground_permission().await {
            return true;
        }
        self.permission.request_foreground_permission().await
    }

    async fn acquire(&mut self) -> Result<()> {
        let initial = self.positions.current_fix().await?;
        self.filter.accept(initial);
        self.session.record_fix(initial);

        let subscription = self.positions.subscribe().await?;
        debug!(subscription = ?subscription.id(), "subscribed to fix stream");
        self.subscription = Some(subscription);
        Ok(())
    }

    fn unwind(&mut self) {
        self.halt();
        self.clock.reset();
        self.filter.reset();
        self.session = TrackingSession::new(self.ctx.settings.record_route);
    }

    /// Cancel the fix stream and the timer. Synchronous, so nothing mutates
    /// the session after this returns.
    fn halt(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.clock.stop();
    }

    /// Tracking -> Stopped.
    ///
    /// Freezes the session, then hands a record to the sink if the run is long
    /// enough. A sink failure is reported but the returned record and the
    /// in-memory session stay as they are. Calling again does nothing.
    pub async fn stop(&mut self) -> Option<PersistedRunRecord> {
        if self.session.state != SessionState::Tracking {
            return None;
        }

        self.halt();
        self.session.state = SessionState::Stopped;

        let distance_km = self.session.distance_km();
        let duration_secs = self.clock.elapsed_seconds();
        info!(
            session = %self.session.id,
            distance_km,
            duration_secs,
            "tracking stopped"
        );

        // Zero-distance runs are never persisted, whatever the configured threshold
        if distance_km <= self.ctx.settings.persist_threshold_km.max(0.0) {
            info!(distance_km, "run below persist threshold, discarded");
            self.notify(Notice::RunDiscarded { distance_km });
            return None;
        }

        let record = PersistedRunRecord {
            id: self.session.id,
            started_at: self.session.started_at,
            completed_at: Utc::now(),
            distance_km,
            duration_secs,
            route: self.session.route.clone(),
        };

        match self.ctx.sink.submit_run(&record).await {
            Ok(()) => {
                info!(run = %record.id, "run persisted");
                self.notify(Notice::RunSaved {
                    id: record.id,
                    distance_km,
                });
            }
            Err(e) => {
                warn!(run = %record.id, error = %e, "failed to persist run");
                self.notify(Notice::PersistenceFailed(e.to_string()));
            }
        }

        Some(record)
    }

    /// Back to Idle from any state, discarding the session without saving it.
    pub fn reset(&mut self) {
        self.halt();
        self.clock.reset();
        self.filter.reset();
        self.latch.reset();
        self.session = TrackingSession::new(self.ctx.settings.record_route);
        info!("session reset");
    }

    /// Feed one clock or position event. Events arriving outside the
    /// Tracking state, or from a cancelled timer/subscription, are ignored.
    pub fn handle_event(&mut self, event: SourceEvent) -> EventOutcome {
        if self.session.state != SessionState::Tracking {
            return EventOutcome::Ignored;
        }

        match event {
            SourceEvent::Tick(handle) => {
                if !self.clock.on_tick(handle) {
                    return EventOutcome::Ignored;
                }
                self.check_target();
                EventOutcome::Ticked {
                    elapsed_seconds: self.clock.elapsed_seconds(),
                }
            }
            SourceEvent::Fix { subscription, fix } => {
                if !self.is_current(subscription) {
                    return EventOutcome::Ignored;
                }
                self.record_fix(fix)
            }
            SourceEvent::Closed {
                subscription,
                reason,
            } => {
                if !self.is_current(subscription) {
                    return EventOutcome::Ignored;
                }
                warn!(reason = ?reason, "fix stream closed");
                self.notify(Notice::SourceClosed(reason));
                EventOutcome::SourceClosed
            }
        }
    }

    fn is_current(&self, id: SubscriptionId) -> bool {
        self.subscription.as_ref().map(|s| s.id()) == Some(id)
    }

    fn record_fix(&mut self, fix: GeoFix) -> EventOutcome {
        if !fix.is_valid() {
            debug!(?fix, "dropping invalid fix");
            return EventOutcome::FixRejected(RejectReason::NonFinite);
        }

        let decision = self.filter.accept(fix);
        if !decision.accepted {
            let reason = decision.reason.unwrap_or(RejectReason::NonFinite);
            debug!(delta_km = decision.delta_km, ?reason, "fix filtered");
            return EventOutcome::FixRejected(reason);
        }

        let total_km = match self.session.distance.add_delta(decision.delta_km) {
            Some(total) => total,
            None => return EventOutcome::FixRejected(RejectReason::NonFinite),
        };
        self.session.record_fix(fix);
        self.check_target();

        EventOutcome::FixAccepted {
            delta_km: decision.delta_km,
            total_km,
        }
    }

    fn check_target(&mut self) {
        let distance_km = self.session.distance_km();
        if self.latch.observe(distance_km, self.ctx.target_km) {
            info!(distance_km, target_km = self.ctx.target_km, "target reached");
            self.notify(Notice::TargetReached {
                distance_km,
                target_km: self.ctx.target_km,
            });
        }
    }

    fn notify(&self, notice: Notice) {
        if let Some(tx) = &self.ctx.notices {
            // Nobody listening is fine
            let _ = tx.send(notice);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.session.state,
            distance_km: self.distance_km(),
            elapsed_seconds: self.elapsed_seconds(),
            metrics: self.metrics(),
            target_km: self.target_km(),
            target_reached: self.latch.has_fired(),
            route_points: self.session.route_len(),
            last_fix: self.session.last_fix,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn is_tracking(&self) -> bool {
        self.session.state == SessionState::Tracking
    }

    pub fn distance_km(&self) -> f64 {
        self.session.distance_km()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.clock.elapsed_seconds()
    }

    pub fn metrics(&self) -> RunMetrics {
        RunMetrics::derive(self.distance_km(), self.elapsed_seconds(), self.ctx.target_km)
    }

    pub fn route(&self) -> Option<&[GeoFix]> {
        self.session.route.as_deref()
    }

    pub fn target_km(&self) -> f64 {
        self.ctx.target_km
    }
}

impl Drop for RunTracker {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::testing::{north_fix, Harness};

    fn count_target_notices(notices: &[Notice]) -> usize {
        notices
            .iter()
            .filter(|n| matches!(n, Notice::TargetReached { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_normal_session() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        assert_eq!(h.tracker.state(), SessionState::Tracking);

        // 143 steps of 0.1 km along a meridian = 14.3 km
        for i in 1..=143 {
            let outcome = h.fix(north_fix(i as f64 * 0.1, i));
            assert!(matches!(outcome, EventOutcome::FixAccepted { .. }));
        }
        h.tick(4500);

        let snap = h.tracker.snapshot();
        assert!((snap.distance_km - 14.3).abs() < 1e-6);
        assert_eq!(snap.elapsed_seconds, 4500);
        assert!((snap.metrics.pace_min_per_km - 75.0 / 14.3).abs() < 1e-6);
        assert_eq!(snap.metrics.progress, 1.0);
        assert!(snap.target_reached);
        assert_eq!(snap.route_points, 144);

        let record = h.tracker.stop().await.expect("record");
        assert!((record.distance_km - 14.3).abs() < 1e-6);
        assert_eq!(record.duration_secs, 4500);
        assert_eq!(record.route.as_ref().map(Vec::len), Some(144));

        let records = h.sink.records();
        assert_eq!(records.len(), 1);
        assert!((records[0].distance_km - 14.3).abs() < 1e-6);

        let notices = h.notices();
        assert_eq!(count_target_notices(&notices), 1);
        assert!(notices.iter().any(|n| matches!(n, Notice::RunSaved { .. })));
    }

    #[tokio::test]
    async fn test_noisy_gps_jump_is_excluded() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();

        h.fix(north_fix(0.1, 1));
        let outcome = h.fix(north_fix(5.1, 2));
        assert_eq!(outcome, EventOutcome::FixRejected(RejectReason::TooFar));
        h.fix(north_fix(0.2, 3));

        assert!((h.tracker.distance_km() - 0.2).abs() < 1e-9);
        assert_eq!(h.tracker.route().map(|r| r.len()), Some(3));
    }

    #[tokio::test]
    async fn test_abandoned_session_is_not_persisted() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        h.fix(north_fix(0.005, 1));
        h.tick(3);

        assert!(h.tracker.stop().await.is_none());
        assert_eq!(h.tracker.state(), SessionState::Stopped);
        assert!(h.sink.records().is_empty());
        assert!(h
            .notices()
            .iter()
            .any(|n| matches!(n, Notice::RunDiscarded { .. })));
    }

    #[tokio::test]
    async fn test_reset_mid_track() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        h.fix(north_fix(0.1, 1));
        h.fix(north_fix(0.2, 2));
        h.tick(20);

        h.tracker.reset();

        let snap = h.tracker.snapshot();
        assert_eq!(snap.state, SessionState::Idle);
        assert_eq!(snap.distance_km, 0.0);
        assert_eq!(snap.elapsed_seconds, 0);
        assert_eq!(snap.route_points, 0);
        assert!(snap.last_fix.is_none());
        assert!(h.timer.active().is_empty());
        assert_eq!(h.positions.cancelled().len(), 1);
        assert!(h.sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_double_start_keeps_one_clock() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        h.tracker.start().await.unwrap();
        assert_eq!(h.timer.created(), 1);
        assert_eq!(h.positions.subscribed().len(), 1);

        h.tick(10);
        assert_eq!(h.tracker.elapsed_seconds(), 10);
    }

    #[tokio::test]
    async fn test_permission_denied_stays_idle() {
        let mut h = Harness::with_permission(14.0, false);
        let err = h.tracker.start().await.unwrap_err();
        assert!(matches!(err, TrackerError::PermissionDenied));
        assert_eq!(h.tracker.state(), SessionState::Idle);
        assert_eq!(h.timer.created(), 0);
        assert!(matches!(h.notices().as_slice(), [Notice::StartFailed(_)]));
    }

    #[tokio::test]
    async fn test_initial_fix_failure_unwinds_clock() {
        let mut h = Harness::new(14.0);
        h.positions.set_initial(None);

        let err = h.tracker.start().await.unwrap_err();
        assert!(matches!(err, TrackerError::Acquisition(_)));
        assert_eq!(h.tracker.state(), SessionState::Idle);
        assert_eq!(h.timer.created(), 1);
        assert!(h.timer.active().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_failure_unwinds() {
        let mut h = Harness::new(14.0);
        h.positions.fail_subscribe(true);

        let err = h.tracker.start().await.unwrap_err();
        assert!(err.to_string().starts_with("Could not start tracking"));
        let snap = h.tracker.snapshot();
        assert_eq!(snap.state, SessionState::Idle);
        assert_eq!(snap.route_points, 0);
        assert!(h.timer.active().is_empty());

        // A later attempt works once the source recovers
        h.positions.fail_subscribe(false);
        h.tracker.start().await.unwrap();
        assert!(h.tracker.is_tracking());
    }

    #[tokio::test]
    async fn test_events_after_stop_are_ignored() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        h.fix(north_fix(0.1, 1));
        let handle = h.timer.active()[0];
        let subscription = h.positions.subscribed()[0];
        h.tick(5);

        h.tracker.stop().await;

        assert_eq!(
            h.tracker.handle_event(SourceEvent::Tick(handle)),
            EventOutcome::Ignored
        );
        assert_eq!(
            h.tracker.handle_event(SourceEvent::Fix {
                subscription,
                fix: north_fix(0.15, 6),
            }),
            EventOutcome::Ignored
        );
        assert_eq!(h.tracker.elapsed_seconds(), 5);
        assert!((h.tracker.distance_km() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_persists_once() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        h.fix(north_fix(0.1, 1));

        assert!(h.tracker.stop().await.is_some());
        assert!(h.tracker.stop().await.is_none());
        assert_eq!(h.sink.records().len(), 1);
        assert_eq!(h.positions.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn test_start_after_stop_requires_reset() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        h.tracker.stop().await;

        assert!(matches!(
            h.tracker.start().await,
            Err(TrackerError::InvalidTransition { .. })
        ));

        h.tracker.reset();
        h.tracker.start().await.unwrap();
        assert!(h.tracker.is_tracking());
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_session() {
        let mut h = Harness::new(14.0);
        h.sink.set_failing(true);
        h.tracker.start().await.unwrap();
        h.fix(north_fix(0.1, 1));
        h.tick(60);

        let record = h.tracker.stop().await;
        assert!(record.is_some());
        assert_eq!(h.sink.records().len(), 1);
        assert!((h.tracker.distance_km() - 0.1).abs() < 1e-9);
        assert_eq!(h.tracker.elapsed_seconds(), 60);
        assert!(h
            .notices()
            .iter()
            .any(|n| matches!(n, Notice::PersistenceFailed(_))));
    }

    #[tokio::test]
    async fn test_target_notice_fires_once() {
        let mut h = Harness::new(0.3);
        h.tracker.start().await.unwrap();
        for i in 1..=10 {
            h.fix(north_fix(i as f64 * 0.1, i));
            h.tick(1);
        }
        assert_eq!(count_target_notices(&h.notices()), 1);
    }

    #[tokio::test]
    async fn test_fix_from_stale_subscription_is_ignored() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        let outcome = h.tracker.handle_event(SourceEvent::Fix {
            subscription: SubscriptionId::new(u64::MAX),
            fix: north_fix(0.1, 1),
        });
        assert_eq!(outcome, EventOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_source_closed_is_reported() {
        let mut h = Harness::new(14.0);
        h.tracker.start().await.unwrap();
        let subscription = h.positions.subscribed()[0];
        let outcome = h.tracker.handle_event(SourceEvent::Closed {
            subscription,
            reason: Some("EOF".to_string()),
        });
        assert_eq!(outcome, EventOutcome::SourceClosed);
        assert!(h.tracker.is_tracking());
    }

    #[tokio::test]
    async fn test_min_movement_policy() {
        let settings = TrackerSettings {
            filter: FilterPolicy::MinMovement { min_km: 0.005 },
            ..TrackerSettings::default()
        };
        let mut h = Harness::with_settings(14.0, settings);
        h.tracker.start().await.unwrap();

        h.fix(north_fix(0.002, 1));
        h.fix(north_fix(0.004, 2));
        assert_eq!(h.tracker.distance_km(), 0.0);
        h.fix(north_fix(0.010, 3));
        assert!((h.tracker.distance_km() - 0.010).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_negative_threshold_still_discards_empty_run() {
        for threshold in [-1.0, 0.0] {
            let settings = TrackerSettings {
                persist_threshold_km: threshold,
                ..TrackerSettings::default()
            };
            let mut h = Harness::with_settings(14.0, settings);
            h.tracker.start().await.unwrap();
            h.tick(30);

            assert!(h.tracker.stop().await.is_none());
            assert!(h.sink.records().is_empty());
        }

        let settings = TrackerSettings {
            persist_threshold_km: -1.0,
            ..TrackerSettings::default()
        };
        let mut h = Harness::with_settings(14.0, settings);
        h.tracker.start().await.unwrap();
        h.fix(north_fix(0.004, 1));
        let record = h.tracker.stop().await.expect("positive distance is kept");
        assert!(record.distance_km > 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_matches_accessors() {
        let mut h = Harness::new(1.0);
        h.tracker.start().await.unwrap();
        h.fix(north_fix(0.1, 1));
        h.fix(north_fix(0.25, 2));
        h.tick(90);

        let snap = h.tracker.snapshot();
        assert_eq!(snap.target_km, h.tracker.target_km());
        assert_eq!(snap.metrics, h.tracker.metrics());
        assert!((h.tracker.metrics().pace_min_per_km - 6.0).abs() < 1e-9);
        assert!((h.tracker.metrics().remaining_km - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_drop_releases_timer_and_stream() {
        let h = Harness::new(14.0);
        let Harness {
            mut tracker,
            timer,
            positions,
            ..
        } = h;
        tracker.start().await.unwrap();
        drop(tracker);
        assert!(timer.active().is_empty());
        assert_eq!(positions.cancelled().len(), 1);
    }
}
