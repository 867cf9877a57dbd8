//! Fixed-window admission limiter keyed by client identity.
//!
//! Each identifier owns one [`RateBucket`]. The first request after the
//! bucket's `reset_at` (or the first request ever) opens a fresh window of
//! length `window` with a count of 1. Inside a window at most `limit`
//! requests are admitted. Windows are fixed, not sliding: a client may land
//! up to `2 × limit` requests in any window-length interval that straddles a
//! boundary.
//!
//! One mutex guards the whole identifier map. Every critical section is
//! O(1) (a map lookup plus arithmetic); the periodic sweep is the only
//! O(n) pass and takes the same lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::{
    ADMISSION_ALLOWED_TOTAL, ADMISSION_BUCKETS, ADMISSION_REJECTED_TOTAL, ADMISSION_SWEPT_TOTAL,
};

/// Limiter parameters that can never be valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionConfigError {
    /// `limit` was zero.
    #[error("admission limit must be positive")]
    ZeroLimit,
    /// `window` was zero.
    #[error("admission window must be positive")]
    ZeroWindow,
    /// `window` does not fit a timestamp offset.
    #[error("admission window {0:?} is too large")]
    WindowTooLarge(Duration),
}

/// A validated request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    limit: u32,
    window: TimeDelta,
}

impl AdmissionPolicy {
    /// Validate `limit` requests per `window`.
    pub fn new(limit: u32, window: Duration) -> Result<Self, AdmissionConfigError> {
        if limit == 0 {
            return Err(AdmissionConfigError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(AdmissionConfigError::ZeroWindow);
        }
        let window =
            TimeDelta::from_std(window).map_err(|_| AdmissionConfigError::WindowTooLarge(window))?;
        Ok(Self { limit, window })
    }

    /// Requests admitted per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length.
    pub fn window(&self) -> TimeDelta {
        self.window
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the request may proceed.
    pub permitted: bool,
    /// When the identifier's current window ends.
    pub reset_at: DateTime<Utc>,
    /// Budget of the window.
    pub limit: u32,
    /// Requests still admissible in this window.
    pub remaining: u32,
}

impl AdmissionDecision {
    /// `reset_at` as unix seconds, for headers and `retry_after`.
    pub fn reset_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

#[derive(Debug, Clone, Copy)]
struct RateBucket {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Concurrent fixed-window counter.
#[derive(Debug)]
pub struct AdmissionLimiter {
    policy: AdmissionPolicy,
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl AdmissionLimiter {
    /// Limiter enforcing `policy` by default.
    pub fn new(policy: AdmissionPolicy) -> Self {
        Self {
            policy,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Default policy.
    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Check `identifier` against the default policy, now.
    pub fn allow(&self, identifier: &str) -> AdmissionDecision {
        self.check(identifier, &self.policy, Utc::now())
    }

    /// Check `identifier` against the default policy at `now`.
    pub fn allow_at(&self, identifier: &str, now: DateTime<Utc>) -> AdmissionDecision {
        self.check(identifier, &self.policy, now)
    }

    /// Check `identifier` against an explicit `policy` at `now`.
    pub fn check(
        &self,
        identifier: &str,
        policy: &AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        let (decision, tracked) = {
            let mut buckets = self.buckets.lock();
            let decision = match buckets.get_mut(identifier) {
                Some(bucket) if now < bucket.reset_at => {
                    if bucket.count >= policy.limit {
                        AdmissionDecision {
                            permitted: false,
                            reset_at: bucket.reset_at,
                            limit: policy.limit,
                            remaining: 0,
                        }
                    } else {
                        bucket.count += 1;
                        AdmissionDecision {
                            permitted: true,
                            reset_at: bucket.reset_at,
                            limit: policy.limit,
                            remaining: policy.limit - bucket.count,
                        }
                    }
                }
                // absent or expired: open a fresh window
                _ => {
                    let bucket = RateBucket {
                        count: 1,
                        reset_at: now + policy.window,
                    };
                    let _ = buckets.insert(identifier.to_string(), bucket);
                    AdmissionDecision {
                        permitted: true,
                        reset_at: bucket.reset_at,
                        limit: policy.limit,
                        remaining: policy.limit - 1,
                    }
                }
            };
            (decision, buckets.len())
        };

        gauge!(ADMISSION_BUCKETS).set(tracked as f64);
        if decision.permitted {
            counter!(ADMISSION_ALLOWED_TOTAL).increment(1);
        } else {
            counter!(ADMISSION_REJECTED_TOTAL).increment(1);
            debug!(identifier, reset_at = %decision.reset_at, "admission denied");
        }
        decision
    }

    /// Remove buckets whose window has ended.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Remove buckets whose `reset_at` is at or before `now`. Returns how
    /// many were removed.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let (removed, tracked) = {
            let mut buckets = self.buckets.lock();
            let before = buckets.len();
            buckets.retain(|_, bucket| bucket.reset_at > now);
            (before - buckets.len(), buckets.len())
        };
        gauge!(ADMISSION_BUCKETS).set(tracked as f64);
        if removed > 0 {
            counter!(ADMISSION_SWEPT_TOTAL).increment(removed as u64);
        }
        removed
    }

    /// Number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Whether no identifier is tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the immediate first tick
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = limiter.len(), "swept expired rate buckets");
                        }
                    }
                }
            }
            info!("admission sweeper stopped");
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn limiter(limit: u32, window_secs: u64) -> AdmissionLimiter {
        AdmissionLimiter::new(AdmissionPolicy::new(limit, Duration::from_secs(window_secs)).unwrap())
    }

    #[test]
    fn zero_limit_is_config_error() {
        assert_matches!(
            AdmissionPolicy::new(0, Duration::from_secs(60)),
            Err(AdmissionConfigError::ZeroLimit)
        );
    }

    #[test]
    fn zero_window_is_config_error() {
        assert_matches!(
            AdmissionPolicy::new(10, Duration::ZERO),
            Err(AdmissionConfigError::ZeroWindow)
        );
    }

    #[test]
    fn limit_three_window_sixty() {
        let limiter = limiter(3, 60);

        for t in 0..3 {
            let d = limiter.allow_at("ip:A", at(t));
            assert!(d.permitted, "call at t={t} should pass");
            assert_eq!(d.reset_at, at(60));
        }

        let denied = limiter.allow_at("ip:A", at(3));
        assert!(!denied.permitted);
        assert_eq!(denied.reset_at, at(60));
        assert_eq!(denied.remaining, 0);

        let fresh = limiter.allow_at("ip:A", at(61));
        assert!(fresh.permitted);
        assert_eq!(fresh.reset_at, at(121));
        assert_eq!(fresh.remaining, 2);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = limiter(3, 60);
        let remaining: Vec<u32> = (0..3)
            .map(|t| limiter.allow_at("a", at(t)).remaining)
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let limiter = limiter(1, 60);
        assert!(limiter.allow_at("a", at(0)).permitted);
        assert!(!limiter.allow_at("a", at(59)).permitted);
        // now == reset_at opens a new window
        let d = limiter.allow_at("a", at(60));
        assert!(d.permitted);
        assert_eq!(d.reset_at, at(120));
    }

    #[test]
    fn boundary_burst_is_allowed() {
        let limiter = limiter(5, 60);
        let before = (0..5).filter(|_| limiter.allow_at("a", at(59)).permitted).count();
        // first call at 59 opened the window at 59, so it ends at 119
        assert_eq!(before, 5);
        let after = (0..5).filter(|_| limiter.allow_at("a", at(119)).permitted).count();
        assert_eq!(after + before, 10);
    }

    #[test]
    fn identifiers_are_independent() {
        let limiter = limiter(1, 60);
        assert!(limiter.allow_at("a", at(0)).permitted);
        assert!(limiter.allow_at("b", at(0)).permitted);
        assert!(!limiter.allow_at("a", at(1)).permitted);
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn explicit_policy_overrides_default() {
        let limiter = limiter(100, 60);
        let strict = AdmissionPolicy::new(1, Duration::from_secs(10)).unwrap();
        assert!(limiter.check("a", &strict, at(0)).permitted);
        let denied = limiter.check("a", &strict, at(1));
        assert!(!denied.permitted);
        assert_eq!(denied.reset_at, at(10));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let limiter = limiter(5, 60);
        let _ = limiter.allow_at("old", at(0));
        let _ = limiter.allow_at("new", at(30));

        assert_eq!(limiter.sweep_at(at(59)), 0);
        assert_eq!(limiter.sweep_at(at(60)), 1);
        assert_eq!(limiter.len(), 1);
        assert!(limiter.allow_at("new", at(61)).permitted);
        assert_eq!(limiter.sweep_at(at(200)), 1);
        assert!(limiter.is_empty());
    }

    #[test]
    fn bucket_recreated_after_sweep() {
        let limiter = limiter(1, 60);
        let _ = limiter.allow_at("a", at(0));
        let _ = limiter.sweep_at(at(60));
        let d = limiter.allow_at("a", at(60));
        assert!(d.permitted);
        assert_eq!(d.reset_at, at(120));
    }

    #[test]
    fn concurrent_first_access_shares_one_bucket() {
        let limiter = Arc::new(limiter(10, 60));
        let now = at(0);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..5).filter(|_| limiter.allow_at("hot", now).permitted).count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancel() {
        let limiter = Arc::new(limiter(1, 60));
        let cancel = CancellationToken::new();
        let handle = limiter.spawn_sweeper(Duration::from_secs(1), cancel.clone());
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_more_than_limit_within_window(
                limit in 1u32..20,
                offsets in proptest::collection::vec(0i64..60, 1..100),
            ) {
                let limiter = limiter(limit, 60);
                let mut offsets = offsets;
                offsets.sort_unstable();
                let permitted = offsets
                    .iter()
                    .filter(|t| limiter.allow_at("id", at(**t)).permitted)
                    .count();
                prop_assert_eq!(permitted, offsets.len().min(limit as usize));
            }

            #[test]
            fn denial_keeps_reset_at(limit in 1u32..10, extra in 1usize..10) {
                let limiter = limiter(limit, 60);
                let first = limiter.allow_at("id", at(0));
                for _ in 1..limit {
                    let _ = limiter.allow_at("id", at(1));
                }
                for _ in 0..extra {
                    let d = limiter.allow_at("id", at(2));
                    prop_assert!(!d.permitted);
                    prop_assert_eq!(d.reset_at, first.reset_at);
                }
            }

            #[test]
            fn sweep_never_drops_live_buckets(
                starts in proptest::collection::vec(0i64..120, 1..30),
                sweep_at in 0i64..200,
            ) {
                let limiter = limiter(3, 60);
                for (i, start) in starts.iter().enumerate() {
                    let _ = limiter.allow_at(&format!("id-{i}"), at(*start));
                }
                let live = starts.iter().filter(|s| at(**s + 60) > at(sweep_at)).count();
                let _ = limiter.sweep_at(at(sweep_at));
                prop_assert_eq!(limiter.len(), live);
            }
        }
    }
}
