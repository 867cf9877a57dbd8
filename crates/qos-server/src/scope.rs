//! Per-request cancellation scopes for CRUD handlers.
//!
//! [`RequestScopeTracker::begin`] hands out a [`RequestScope`] guard that
//! owns a child cancellation token and a deadline. Dropping the guard
//! cancels the token and releases the scope, so release happens on every
//! exit path, including early returns, `?` and panics.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use qos_core::ScopeId;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics::{REQUEST_SCOPE_TIMEOUTS_TOTAL, REQUEST_SCOPES_ACTIVE};

/// Why scoped work did not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// The deadline passed first.
    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    /// The scope (or its parent) was cancelled first.
    #[error("request cancelled")]
    Cancelled,
}

/// Hands out request scopes and counts the live ones.
#[derive(Debug, Clone, Default)]
pub struct RequestScopeTracker {
    active: Arc<AtomicUsize>,
}

impl RequestScopeTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope bounded by `timeout`, cancelled with `parent`.
    pub fn begin(&self, parent: &CancellationToken, timeout: Duration) -> RequestScope {
        let count = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!(REQUEST_SCOPES_ACTIVE).set(count as f64);
        RequestScope {
            id: ScopeId::new(),
            token: parent.child_token(),
            timeout,
            deadline: Instant::now() + timeout,
            active: Arc::clone(&self.active),
            ended: false,
        }
    }

    /// Scopes begun and not yet ended.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// One request's cancellation handle. Released on drop.
#[derive(Debug)]
pub struct RequestScope {
    id: ScopeId,
    token: CancellationToken,
    timeout: Duration,
    deadline: Instant,
    active: Arc<AtomicUsize>,
    ended: bool,
}

impl RequestScope {
    /// Scope identifier, for logs.
    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    /// Token downstream calls should observe.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Instant after which [`run`](Self::run) gives up.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Drive `work` until it finishes, the deadline passes, or the scope is
    /// cancelled. Hitting the deadline also cancels the token.
    pub async fn run<F, T>(&self, work: F) -> Result<T, ScopeError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(ScopeError::Cancelled),
            () = tokio::time::sleep_until(self.deadline) => {
                self.token.cancel();
                counter!(REQUEST_SCOPE_TIMEOUTS_TOTAL).increment(1);
                debug!(scope_id = %self.id, timeout = ?self.timeout, "request deadline exceeded");
                Err(ScopeError::DeadlineExceeded(self.timeout))
            }
            out = work => Ok(out),
        }
    }

    /// Cancel the token and release the scope. Later calls are no-ops.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.token.cancel();
        let count = self.active.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!(REQUEST_SCOPES_ACTIVE).set(count as f64);
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.end();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
