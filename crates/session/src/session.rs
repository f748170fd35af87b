use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kwatch_core::{EventSource, ObjectSnapshot, ResolvedTarget, ResourceTarget, WatchError};
use kwatch_render::DiffRenderer;
use kwatch_store::SnapshotTracker;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Watching,
    /// The stream ended or failed.
    Stopping,
    TimedOut,
    Cancelled,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TimedOut,
    StreamEnded,
    StreamFailed(WatchError),
}

/// Outcome of one finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub target: ResourceTarget,
    pub transitions: Vec<SessionState>,
    pub stop_reason: StopReason,
    /// Diff blocks written to the sink.
    pub diffs: u64,
    /// Events dropped because the payload was malformed or unserializable.
    pub dropped: u64,
    pub render_failures: u64,
    pub duplicates: u64,
}

/// Watches one target until cancelled, timed out or the stream ends.
pub struct WatchSession {
    target: ResourceTarget,
    source: Box<dyn EventSource>,
    renderer: Arc<DiffRenderer>,
    timeout: Duration,
    transitions: Vec<SessionState>,
}

impl WatchSession {
    pub fn new(resolved: ResolvedTarget, renderer: Arc<DiffRenderer>, timeout: Duration) -> Self {
        Self {
            target: resolved.target,
            source: resolved.source,
            renderer,
            timeout,
            transitions: vec![SessionState::Starting],
        }
    }

    pub fn state(&self) -> SessionState {
        self.transitions.last().copied().unwrap_or(SessionState::Starting)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(object = %self.target, from = ?self.state(), to = ?next, "session state");
        self.transitions.push(next);
    }

    /// Drive the session to completion. Cancellation is checked first on every
    /// wakeup, so once it is observed no further event is processed; a render
    /// already under way is allowed to finish.
    pub async fn run(mut self, shutdown: CancellationToken) -> SessionReport {
        counter!("kwatch_sessions_started_total", 1u64);
        let mut events = self.source.watch();
        let mut tracker = SnapshotTracker::new(self.target.clone());
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        info!("start watching the diff of {} @Now={}", self.target, chrono::Local::now());
        self.transition(SessionState::Watching);

        let mut diffs = 0u64;
        let mut dropped = 0u64;
        let mut render_failures = 0u64;
        let reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break StopReason::Cancelled,
                _ = &mut deadline => break StopReason::TimedOut,
                next = events.next() => match next {
                    None => break StopReason::StreamEnded,
                    Some(Err(e)) => {
                        warn!(object = %self.target, error = %e, "watch stream failed");
                        break StopReason::StreamFailed(e);
                    }
                    Some(Ok(ev)) => {
                        let kind = ev.kind();
                        let snap = match ObjectSnapshot::capture(ev.into_object()) {
                            Ok(s) => s,
                            Err(e) => {
                                dropped += 1;
                                counter!("kwatch_events_dropped_total", 1u64);
                                warn!(object = %self.target, kind, error = %e, at = %chrono::Local::now(), "dropping event");
                                continue;
                            }
                        };
                        let Some(record) = tracker.observe(snap) else { continue };
                        match self.renderer.render(&record).await {
                            Ok(()) => diffs += 1,
                            Err(e) => {
                                render_failures += 1;
                                warn!(object = %self.target, error = %e, at = %record.timestamp, "diff not rendered");
                            }
                        }
                    }
                },
            }
        };
        // release the subscription before reporting
        drop(events);

        match reason {
            StopReason::Cancelled => self.transition(SessionState::Cancelled),
            StopReason::TimedOut => self.transition(SessionState::TimedOut),
            StopReason::StreamEnded | StopReason::StreamFailed(_) => self.transition(SessionState::Stopping),
        }
        self.transition(SessionState::Stopped);
        info!(object = %self.target, reason = ?reason, diffs, dropped, "stopped watching");

        SessionReport {
            target: self.target,
            transitions: self.transitions,
            stop_reason: reason,
            diffs,
            dropped,
            render_failures,
            duplicates: tracker.duplicates(),
        }
    }
}
