// src/tracking/clock.rs
//! Elapsed session time driven by a 1 Hz interval timer

use std::time::Duration;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Identifies one repeating timer created by an [`IntervalTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Clock collaborator: a `setInterval` / `clearInterval` pair.
///
/// Ticks are delivered out of band (see [`crate::sources::SourceEvent::Tick`])
/// carrying the handle that produced them.
pub trait IntervalTimer: Send {
    fn set_interval(&mut self, period: Duration) -> TimerHandle;

    /// Cancel the timer. Must be synchronous: once this returns the timer
    /// produces no new ticks.
    fn clear_interval(&mut self, handle: TimerHandle);
}

/// Counts whole seconds while running. Owns at most one timer.
pub struct ElapsedClock {
    timer: Box<dyn IntervalTimer>,
    active: Option<TimerHandle>,
    elapsed_seconds: u64,
}

impl ElapsedClock {
    pub fn new(timer: Box<dyn IntervalTimer>) -> Self {
        Self {
            timer,
            active: None,
            elapsed_seconds: 0,
        }
    }

    /// Start ticking. Returns `false` if already running; no second timer is created.
    pub fn start(&mut self) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.active = Some(self.timer.set_interval(TICK_PERIOD));
        true
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.active.take() {
            self.timer.clear_interval(handle);
        }
    }

    pub fn reset(&mut self) {
        self.stop();
        self.elapsed_seconds = 0;
    }

    /// Count a tick. Ticks from a stale or foreign handle are ignored.
    pub fn on_tick(&mut self, handle: TimerHandle) -> bool {
        if self.active != Some(handle) {
            return false;
        }
        self.elapsed_seconds += 1;
        true
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn active_handle(&self) -> Option<TimerHandle> {
        self.active
    }
}

impl Drop for ElapsedClock {
    fn drop(&mut self) {
        self.stop();
    }
}
