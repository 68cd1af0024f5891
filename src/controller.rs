// src/controller.rs
//! Owns a tracker and serialises commands and source events onto one task

use crate::{
    error::{Result, TrackerError},
    sources::EventReceiver,
    tracking::{EventOutcome, PersistedRunRecord, RunTracker, SessionSnapshot},
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

#[derive(Debug)]
enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Option<PersistedRunRecord>>),
    Reset(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<Option<PersistedRunRecord>>),
}

/// The screen-controller side of a run: the only place the tracker is mutated.
pub struct TrackingController {
    tracker: RunTracker,
    events: EventReceiver,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<SessionSnapshot>,
    stop_on_source_close: bool,
}

/// Cheap handle for issuing commands and reading snapshots.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl TrackingController {
    /// `events` must be the receiving end of the channel the tracker's timer
    /// and position source were built with.
    pub fn new(tracker: RunTracker, events: EventReceiver) -> (Self, ControllerHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(tracker.snapshot());

        let controller = Self {
            tracker,
            events,
            commands: command_rx,
            snapshots: snapshot_tx,
            stop_on_source_close: false,
        };
        let handle = ControllerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (controller, handle)
    }

    /// Finish the run when the fix stream ends by itself (replays, unplugged receivers)
    pub fn stop_on_source_close(mut self, enabled: bool) -> Self {
        self.stop_on_source_close = enabled;
        self
    }

    /// Process commands and events until shutdown or until every handle is
    /// dropped. A run still in progress at that point is stopped normally.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        debug!("all controller handles dropped");
                        self.tracker.stop().await;
                        self.publish();
                        break;
                    }
                },
                Some(event) = self.events.recv() => {
                    let outcome = self.tracker.handle_event(event);
                    if outcome == EventOutcome::SourceClosed && self.stop_on_source_close {
                        info!("fix stream ended, stopping run");
                        self.tracker.stop().await;
                    }
                    if outcome != EventOutcome::Ignored {
                        self.publish();
                    }
                }
            }
        }
        info!("tracking controller finished");
    }

    /// Returns `false` once the controller should exit
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start(reply) => {
                let result = self.tracker.start().await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                let record = self.tracker.stop().await;
                self.publish();
                let _ = reply.send(record);
            }
            Command::Reset(reply) => {
                self.tracker.reset();
                self.publish();
                let _ = reply.send(());
            }
            Command::Shutdown(reply) => {
                let record = self.tracker.stop().await;
                self.publish();
                let _ = reply.send(record);
                return false;
            }
        }
        true
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.tracker.snapshot());
    }
}

impl ControllerHandle {
    pub async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx)).await?;
        rx.await.map_err(|_| controller_gone())?
    }

    pub async fn stop(&self) -> Result<Option<PersistedRunRecord>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop(tx)).await?;
        rx.await.map_err(|_| controller_gone())
    }

    pub async fn reset(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Reset(tx)).await?;
        rx.await.map_err(|_| controller_gone())
    }

    /// Stop any run in progress and end the controller task
    pub async fn shutdown(&self) -> Result<Option<PersistedRunRecord>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| controller_gone())
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| controller_gone())
    }
}

fn controller_gone() -> TrackerError {
    TrackerError::Other("tracking controller has shut down".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sources::{event_channel, SourceEvent},
        tracking::{
            testing::{north_fix, Harness},
            SessionState,
        },
    };

    #[tokio::test]
    async fn test_commands_and_events_flow() {
        let Harness {
            tracker,
            timer,
            positions,
            sink,
            ..
        } = Harness::new(0.25);
        let (events, rx) = event_channel();
        let (controller, handle) = TrackingController::new(tracker, rx);
        let task = tokio::spawn(controller.run());

        handle.start().await.unwrap();
        assert!(handle.snapshot().is_tracking());

        let subscription = positions.subscribed()[0];
        let tick = timer.active()[0];
        for i in 1..=3 {
            events
                .send(SourceEvent::Fix {
                    subscription,
                    fix: north_fix(i as f64 * 0.1, i),
                })
                .unwrap();
            events.send(SourceEvent::Tick(tick)).unwrap();
        }

        let mut snapshots = handle.watch();
        let snap = snapshots
            .wait_for(|s| s.elapsed_seconds == 3)
            .await
            .unwrap()
            .clone();
        assert!((snap.distance_km - 0.3).abs() < 1e-9);
        assert!(snap.target_reached);

        let record = handle.stop().await.unwrap().expect("persisted");
        assert_eq!(record.duration_secs, 3);
        assert_eq!(sink.records().len(), 1);

        assert!(handle.shutdown().await.unwrap().is_none());
        task.await.unwrap();
        assert!(handle.start().await.is_err());
    }

    #[tokio::test]
    async fn test_stops_when_stream_closes() {
        let Harness {
            tracker,
            positions,
            sink,
            ..
        } = Harness::new(14.0);
        let (events, rx) = event_channel();
        let (controller, handle) = TrackingController::new(tracker, rx);
        let task = tokio::spawn(controller.stop_on_source_close(true).run());

        handle.start().await.unwrap();
        let subscription = positions.subscribed()[0];
        events
            .send(SourceEvent::Fix {
                subscription,
                fix: north_fix(0.1, 1),
            })
            .unwrap();
        events
            .send(SourceEvent::Closed {
                subscription,
                reason: None,
            })
            .unwrap();

        let mut snapshots = handle.watch();
        snapshots
            .wait_for(|s| s.state == SessionState::Stopped)
            .await
            .unwrap();
        assert_eq!(sink.records().len(), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_handles_tears_down() {
        let Harness {
            tracker,
            timer,
            positions,
            sink,
            ..
        } = Harness::new(14.0);
        let (events, rx) = event_channel();
        let (controller, handle) = TrackingController::new(tracker, rx);
        let task = tokio::spawn(controller.run());

        handle.start().await.unwrap();
        let subscription = positions.subscribed()[0];
        events
            .send(SourceEvent::Fix {
                subscription,
                fix: north_fix(0.1, 1),
            })
            .unwrap();
        handle.reset().await.unwrap();
        assert_eq!(handle.snapshot().state, SessionState::Idle);

        handle.start().await.unwrap();
        drop(handle);
        task.await.unwrap();

        assert!(timer.active().is_empty());
        assert_eq!(positions.cancelled().len(), 2);
        // Second run had no distance, nothing saved
        assert!(sink.records().is_empty());
    }
}
