// src/tracking/mod.rs
//! Run-tracking core: filtering, accumulation, timing, metrics and lifecycle

pub mod accumulator;
pub mod clock;
pub mod filter;
pub mod lifecycle;
pub mod metrics;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use accumulator::DistanceAccumulator;
pub use clock::{ElapsedClock, IntervalTimer, TimerHandle, TICK_PERIOD};
pub use filter::{FilterDecision, FilterPolicy, PositionFilter, RejectReason};
pub use lifecycle::{
    EventOutcome, Notice, NoticeReceiver, NoticeSender, RunTracker, TrackerContext, TrackerSettings,
    DEFAULT_PERSIST_THRESHOLD_KM,
};
pub use metrics::{format_elapsed, format_pace, RunMetrics, TargetLatch};
pub use session::{PersistedRunRecord, SessionSnapshot, SessionState};
