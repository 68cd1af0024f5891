// src/sources/timer.rs
//! Interval timer on the tokio clock

use super::{EventSender, SourceEvent};
use crate::tracking::{IntervalTimer, TimerHandle};
use std::{collections::HashMap, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant},
};

/// Spawns one task per interval that pushes [`SourceEvent::Tick`] into the
/// tracker's event channel. Must be used from within a tokio runtime.
pub struct TokioIntervalTimer {
    events: EventSender,
    next_id: u64,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioIntervalTimer {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_id: 0,
            tasks: HashMap::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

impl IntervalTimer for TokioIntervalTimer {
    fn set_interval(&mut self, period: Duration) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle::new(self.next_id);
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            // First tick one full period after start
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if events.send(SourceEvent::Tick(handle)).is_err() {
                    break;
                }
            }
        });

        self.tasks.insert(handle, task);
        handle
    }

    fn clear_interval(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
    }
}

impl Drop for TokioIntervalTimer {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}
