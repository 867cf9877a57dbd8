//! Live session registry.
//!
//! Tracks every session between activation and close so shutdown can reach
//! them all. Sessions remove themselves on close; [`SessionRegistry::close_all`]
//! is the shutdown path and always leaves the registry empty.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use qos_core::SessionId;
use tracing::{info, warn};

use super::session::{CloseReason, SessionControl};

/// Slack over a session's drain bound for its final teardown to run.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Outcome of [`SessionRegistry::close_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Sessions told to close.
    pub signalled: usize,
    /// Whether all of them reached `Closed` before the timeout.
    pub completed: bool,
}

/// Set of live sessions, keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionControl>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session. Replaces any entry with the same id.
    pub fn register(&self, control: SessionControl) {
        let _ = self.sessions.lock().insert(control.id().clone(), control);
    }

    /// Stop tracking a session. Returns whether it was present.
    pub fn unregister(&self, id: &SessionId) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    /// Whether `id` is tracked.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Close every tracked session with [`CloseReason::Shutdown`], wait for
    /// them to finish draining, then clear the registry.
    ///
    /// The wait is never shorter than the longest session drain bound (plus
    /// a small grace). Entries
    /// still present after it are dropped from the registry anyway. Sessions
    /// are signalled outside the lock, so one blocked session cannot delay
    /// the others from being told.
    pub async fn close_all(&self, timeout: Duration) -> DrainReport {
        let controls: Vec<SessionControl> = self.sessions.lock().values().cloned().collect();
        if controls.is_empty() {
            return DrainReport {
                signalled: 0,
                completed: true,
            };
        }

        info!(count = controls.len(), "closing realtime sessions");
        for control in &controls {
            control.close(CloseReason::Shutdown);
        }

        let wait = controls
            .iter()
            .map(|c| c.drain_timeout() + DRAIN_GRACE)
            .fold(timeout, Duration::max);
        let completed = tokio::time::timeout(wait, join_all(controls.iter().map(SessionControl::closed)))
            .await
            .is_ok();
        if !completed {
            let mut sessions = self.sessions.lock();
            let before = sessions.len();
            for control in &controls {
                let _ = sessions.remove(control.id());
            }
            warn!(purged = before - sessions.len(), wait = ?wait, "sessions still draining after timeout");
        }
        DrainReport {
            signalled: controls.len(),
            completed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
