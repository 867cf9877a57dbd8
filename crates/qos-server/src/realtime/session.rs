//! Per-connection realtime multiplexer.
//!
//! A [`RealtimeSession`] fans three sources into one [`OutputSink`]:
//! pub/sub messages (as `event` envelopes), periodic metrics snapshots (as
//! `metrics` envelopes, from a second task) and keepalive probes. Both tasks
//! watch the session's cancellation token, so whichever side fails first
//! stops the other.
//!
//! Lifecycle: `Connecting → Active → Draining → Closed`. The session is in
//! the [`SessionRegistry`] exactly while it is `Active` or `Draining`. Once
//! registered, teardown is owned by a guard, so it also runs when the `run`
//! future is dropped or a panic unwinds through it.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use metrics::{counter, gauge, histogram};
use qos_core::{Envelope, EnvelopeKind, SessionId};
use qos_store::{EventSource, MetricsSource, StoreError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, instrument, warn};

use super::registry::SessionRegistry;
use super::sink::{Frame, OutputSink};
use crate::config::RealtimeConfig;
use crate::metrics::{
    REALTIME_ENVELOPES_TOTAL, REALTIME_METRICS_FETCH_FAILURES_TOTAL,
    REALTIME_SESSION_DURATION_SECONDS, REALTIME_SESSIONS_ACTIVE, REALTIME_SESSIONS_TOTAL,
    REALTIME_WRITE_FAILURES_TOTAL,
};

/// Lifecycle state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Created, not yet subscribed.
    Connecting,
    /// Registered and delivering.
    Active,
    /// Releasing resources.
    Draining,
    /// Terminal.
    Closed,
}

/// Why a session ended. The first reason recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection or stopped reading.
    ClientDisconnected,
    /// Writing an envelope failed.
    WriteFailed,
    /// Writing a keepalive probe failed.
    KeepaliveFailed,
    /// The pub/sub subscription ended.
    UpstreamClosed,
    /// Process shutdown.
    Shutdown,
    /// The session's token was cancelled without a more specific reason.
    Cancelled,
}

impl CloseReason {
    /// Stable name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnected => "client_disconnected",
            Self::WriteFailed => "write_failed",
            Self::KeepaliveFailed => "keepalive_failed",
            Self::UpstreamClosed => "upstream_closed",
            Self::Shutdown => "shutdown",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Setup failures. Nothing was registered when one of these is returned.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Opening the pub/sub subscription failed.
    #[error("subscription failed: {0}")]
    Subscribe(#[source] StoreError),
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: SessionId,
    /// Why it ended.
    pub reason: CloseReason,
    /// Event envelopes written.
    pub events_sent: u64,
    /// Metrics envelopes written.
    pub metrics_sent: u64,
    /// Time from `run` to `Closed`.
    pub duration: Duration,
}

/// Cloneable handle to a running session.
#[derive(Clone, Debug)]
pub struct SessionControl {
    id: SessionId,
    token: CancellationToken,
    reason: Arc<OnceLock<CloseReason>>,
    state: watch::Receiver<SessionState>,
    created_at: DateTime<Utc>,
    drain_timeout: Duration,
}

impl SessionControl {
    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Cancellation token shared by the session's tasks.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// When the session was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Upper bound on the time from cancellation to `Closed`.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Recorded close reason, if any.
    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Ask the session to drain. Only the first reason is kept.
    pub fn close(&self, reason: CloseReason) {
        if self.reason.set(reason).is_ok() {
            debug!(session_id = %self.id, reason = reason.as_str(), "session close requested");
        }
        self.token.cancel();
    }

    /// Wait until the session reaches at least `target`.
    ///
    /// Also returns if the session was dropped without running.
    pub async fn wait_for(&self, target: SessionState) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|s| *s >= target).await;
    }

    /// Wait until the session is `Closed`.
    pub async fn closed(&self) {
        self.wait_for(SessionState::Closed).await;
    }
}

/// One client's multiplexer.
pub struct RealtimeSession {
    control: SessionControl,
    state_tx: watch::Sender<SessionState>,
    sink: Arc<dyn OutputSink>,
    events: Arc<dyn EventSource>,
    metrics: Arc<dyn MetricsSource>,
    config: RealtimeConfig,
}

impl RealtimeSession {
    /// New session in `Connecting`. Cancelling `parent` drains it.
    pub fn new(
        sink: Arc<dyn OutputSink>,
        events: Arc<dyn EventSource>,
        metrics: Arc<dyn MetricsSource>,
        config: RealtimeConfig,
        parent: &CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        Self {
            control: SessionControl {
                id: SessionId::new(),
                token: parent.child_token(),
                reason: Arc::new(OnceLock::new()),
                state: state_rx,
                created_at: Utc::now(),
                drain_timeout: config.drain_timeout,
            },
            state_tx,
            sink,
            events,
            metrics,
            config,
        }
    }

    /// Handle for closing or observing this session from elsewhere.
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.control.id
    }

    /// Run until the client leaves, a write fails, the subscription ends or
    /// the session is cancelled, then release everything.
    #[instrument(skip_all, fields(session_id = %self.control.id))]
    pub async fn run(self, registry: &SessionRegistry) -> Result<SessionSummary, SessionError> {
        let Self {
            control,
            state_tx,
            sink,
            events,
            metrics,
            config,
        } = self;
        let token = control.token.clone();

        let mut stream = match events.subscribe(&config.channels, token.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "subscription failed, aborting session");
                let _ = state_tx.send_replace(SessionState::Closed);
                return Err(SessionError::Subscribe(e));
            }
        };

        registry.register(control.clone());
        let pusher = AbortOnDropHandle::new(tokio::spawn(push_metrics(
            Arc::clone(&sink),
            metrics,
            control.clone(),
            config.metrics_interval,
            config.metrics_timeout,
        )));
        let mut guard = ActiveGuard {
            registry,
            control: control.clone(),
            state_tx,
            pusher,
            started: Instant::now(),
        };
        guard.set_state(SessionState::Active);
        counter!(REALTIME_SESSIONS_TOTAL).increment(1);
        gauge!(REALTIME_SESSIONS_ACTIVE).increment(1.0);
        info!(channels = ?config.channels, "session active");

        let period = config.keepalive_interval;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_sent = 0u64;

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        control.close(CloseReason::UpstreamClosed);
                        break;
                    };
                    let frame = match Envelope::event(msg.payload).to_json() {
                        Ok(json) => Frame::Text(json),
                        Err(e) => {
                            warn!(channel = %msg.channel, error = %e, "failed to encode event envelope");
                            continue;
                        }
                    };
                    if !write_frame(&*sink, &control, frame, CloseReason::WriteFailed).await {
                        break;
                    }
                    events_sent += 1;
                    counter!(REALTIME_ENVELOPES_TOTAL, "kind" => EnvelopeKind::Event.as_str()).increment(1);
                }
                _ = keepalive.tick() => {
                    if !write_frame(&*sink, &control, Frame::Ping, CloseReason::KeepaliveFailed).await {
                        break;
                    }
                }
            }
        }

        // ── Draining ────────────────────────────────────────────────
        guard.set_state(SessionState::Draining);
        control.close(CloseReason::Cancelled);
        let deadline = Instant::now() + config.drain_timeout;

        let metrics_sent = match tokio::time::timeout_at(deadline, &mut guard.pusher).await {
            Ok(Ok(sent)) => sent,
            Ok(Err(e)) => {
                warn!(error = %e, "metrics pusher failed");
                0
            }
            Err(_) => {
                warn!("metrics pusher did not stop in time, aborting");
                guard.pusher.abort();
                0
            }
        };
        drop(stream);
        if tokio::time::timeout_at(deadline, sink.close()).await.is_err() {
            debug!("transport close timed out");
        }

        let reason = control.reason().unwrap_or(CloseReason::Cancelled);
        let duration = guard.started.elapsed();
        drop(guard);
        info!(
            reason = reason.as_str(),
            events_sent,
            metrics_sent,
            duration_ms = duration.as_millis() as u64,
            "session closed"
        );

        Ok(SessionSummary {
            id: control.id.clone(),
            reason,
            events_sent,
            metrics_sent,
            duration,
        })
    }
}

/// Teardown for a registered session: cancels the token, aborts the metrics
/// pusher, unregisters and publishes `Closed`. Runs exactly once, on drop.
struct ActiveGuard<'a> {
    registry: &'a SessionRegistry,
    control: SessionControl,
    state_tx: watch::Sender<SessionState>,
    pusher: AbortOnDropHandle<u64>,
    started: Instant,
}

impl ActiveGuard<'_> {
    fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send_replace(state);
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        // no-op on the normal path; records a reason when `run` was dropped
        self.control.close(CloseReason::Cancelled);
        self.pusher.abort();
        let _ = self.registry.unregister(&self.control.id);
        gauge!(REALTIME_SESSIONS_ACTIVE).decrement(1.0);
        histogram!(REALTIME_SESSION_DURATION_SECONDS).record(self.started.elapsed().as_secs_f64());
        self.set_state(SessionState::Closed);
    }
}

/// Write one frame unless the session is cancelled first. On failure the
/// session is closed with `on_error`. Returns whether the frame was written.
async fn write_frame(
    sink: &dyn OutputSink,
    control: &SessionControl,
    frame: Frame,
    on_error: CloseReason,
) -> bool {
    tokio::select! {
        biased;
        () = control.token.cancelled() => false,
        result = sink.send(frame) => match result {
            Ok(()) => true,
            Err(e) => {
                counter!(REALTIME_WRITE_FAILURES_TOTAL).increment(1);
                debug!(session_id = %control.id, error = %e, "write failed");
                control.close(on_error);
                false
            }
        },
    }
}

/// Push a metrics envelope every `period` until cancelled. Fetch failures
/// are skipped; a write failure closes the session. Returns envelopes sent.
async fn push_metrics(
    sink: Arc<dyn OutputSink>,
    source: Arc<dyn MetricsSource>,
    control: SessionControl,
    period: Duration,
    fetch_timeout: Duration,
) -> u64 {
    let token = control.token.clone();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sent = 0;

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            () = token.cancelled() => break,
            fetched = tokio::time::timeout(fetch_timeout, source.snapshot()) => fetched,
        };
        let snapshot = match fetched {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                counter!(REALTIME_METRICS_FETCH_FAILURES_TOTAL).increment(1);
                warn!(session_id = %control.id, error = %e, "metrics snapshot failed, skipping");
                continue;
            }
            Err(_) => {
                counter!(REALTIME_METRICS_FETCH_FAILURES_TOTAL).increment(1);
                warn!(session_id = %control.id, timeout = ?fetch_timeout, "metrics snapshot timed out, skipping");
                continue;
            }
        };

        let frame = match Envelope::metrics(&snapshot).and_then(|e| e.to_json()) {
            Ok(json) => Frame::Text(json),
            Err(e) => {
                warn!(session_id = %control.id, error = %e, "failed to encode metrics envelope");
                continue;
            }
        };
        if !write_frame(&*sink, &control, frame, CloseReason::WriteFailed).await {
            break;
        }
        sent += 1;
        counter!(REALTIME_ENVELOPES_TOTAL, "kind" => EnvelopeKind::Metrics.as_str()).increment(1);
    }
    sent
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::realtime::sink::SinkError;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use qos_core::SystemMetrics;
    use qos_store::PubSubHub;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sink that records frames and can be told to fail or hang.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub frames: Mutex<Vec<Frame>>,
        pub fail_text: AtomicBool,
        pub fail_ping: AtomicBool,
        pub hang: AtomicBool,
        pub closed: AtomicBool,
    }

    impl RecordingSink {
        pub fn texts(&self) -> Vec<serde_json::Value> {
            self.frames
                .lock()
                .iter()
                .filter_map(|f| match f {
                    Frame::Text(t) => Some(serde_json::from_str(t).unwrap()),
                    Frame::Ping => None,
                })
                .collect()
        }

        pub fn pings(&self) -> usize {
            self.frames
                .lock()
                .iter()
                .filter(|f| **f == Frame::Ping)
                .count()
        }
    }

    #[async_trait]
    impl OutputSink for RecordingSink {
        async fn send(&self, frame: Frame) -> Result<(), SinkError> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let fail = match frame {
                Frame::Text(_) => self.fail_text.load(Ordering::SeqCst),
                Frame::Ping => self.fail_ping.load(Ordering::SeqCst),
            };
            if fail {
                return Err(SinkError::Transport("broken pipe".into()));
            }
            self.frames.lock().push(frame);
            Ok(())
        }

        async fn close(&self) {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) enum Snapshot {
        Ok,
        Fail,
        Hang,
    }

    pub(crate) struct FakeMetrics(pub Snapshot);

    #[async_trait]
    impl MetricsSource for FakeMetrics {
        async fn snapshot(&self) -> qos_store::Result<SystemMetrics> {
            match self.0 {
                Snapshot::Ok => Ok(SystemMetrics {
                    requests_total: 10,
                    l3_hits: 5,
                    ..SystemMetrics::default()
                }
                .with_hit_ratio()),
                Snapshot::Fail => Err(StoreError::Closed),
                Snapshot::Hang => std::future::pending().await,
            }
        }
    }

    struct Harness {
        hub: Arc<PubSubHub>,
        sink: Arc<RecordingSink>,
        registry: Arc<SessionRegistry>,
        root: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                hub: Arc::new(PubSubHub::new(64)),
                sink: Arc::new(RecordingSink::default()),
                registry: Arc::new(SessionRegistry::new()),
                root: CancellationToken::new(),
            }
        }

        fn session(&self, metrics: Snapshot) -> RealtimeSession {
            RealtimeSession::new(
                self.sink.clone(),
                self.hub.clone(),
                Arc::new(FakeMetrics(metrics)),
                RealtimeConfig::default(),
                &self.root,
            )
        }

        /// Spawn the session and wait until it is active.
        async fn start(
            &self,
            metrics: Snapshot,
        ) -> (
            SessionControl,
            tokio::task::JoinHandle<Result<SessionSummary, SessionError>>,
        ) {
            let session = self.session(metrics);
            let control = session.control();
            let registry = Arc::clone(&self.registry);
            let handle = tokio::spawn(async move { session.run(&registry).await });
            control.wait_for(SessionState::Active).await;
            (control, handle)
        }

        async fn publish(&self, channel: &str, payload: &str) {
            let _ = self.hub.publish(channel, payload.into()).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_events_and_one_metrics_tick() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Ok).await;
        assert_eq!(h.registry.len(), 1);

        h.publish("ratelimit:events", r#"{"type":"first"}"#).await;
        h.publish("ratelimit:config_update", r#"{"type":"second"}"#).await;
        tokio::time::sleep(Duration::from_millis(5500)).await;
        control.close(CloseReason::ClientDisconnected);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::ClientDisconnected);
        assert_eq!(summary.events_sent, 2);
        assert_eq!(summary.metrics_sent, 1);

        let texts = h.sink.texts();
        assert_eq!(texts.len(), 3);
        let events: Vec<_> = texts.iter().filter(|t| t["type"] == "event").collect();
        assert_eq!(events[0]["data"], r#"{"type":"first"}"#);
        assert_eq!(events[1]["data"], r#"{"type":"second"}"#);
        let metrics: Vec<_> = texts.iter().filter(|t| t["type"] == "metrics").collect();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0]["data"]["requests_total"], 10);
        assert!(texts.iter().all(|t| t["timestamp"].is_string()));

        assert!(h.registry.is_empty());
        assert_eq!(control.state(), SessionState::Closed);
        assert!(h.sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_channels_are_not_delivered() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Ok).await;
        h.publish("elsewhere", "nope").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        control.close(CloseReason::ClientDisconnected);
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.events_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_probe_after_interval() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Fail).await;
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(h.sink.pings(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.sink.pings(), 1);
        control.close(CloseReason::ClientDisconnected);
        let _ = handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_failure_drains() {
        let h = Harness::new();
        h.sink.fail_ping.store(true, Ordering::SeqCst);
        let (_control, handle) = h.start(Snapshot::Fail).await;
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::KeepaliveFailed);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn event_write_failure_drains() {
        let h = Harness::new();
        h.sink.fail_text.store(true, Ordering::SeqCst);
        let (_control, handle) = h.start(Snapshot::Fail).await;
        h.publish("ratelimit:events", "x").await;
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::WriteFailed);
        assert_eq!(summary.events_sent, 0);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_write_failure_stops_event_loop() {
        let h = Harness::new();
        h.sink.fail_text.store(true, Ordering::SeqCst);
        let (_control, handle) = h.start(Snapshot::Ok).await;
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::WriteFailed);
        assert!(summary.duration >= Duration::from_secs(5));
        assert!(summary.duration < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_fetch_failures_are_skipped() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Fail).await;
        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(control.state(), SessionState::Active);
        assert!(h.sink.texts().is_empty());
        control.close(CloseReason::ClientDisconnected);
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.metrics_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_fetch_timeout_is_skipped() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Hang).await;
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(control.state(), SessionState::Active);
        h.publish("ratelimit:events", "still flowing").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.sink.texts().len(), 1);
        control.close(CloseReason::ClientDisconnected);
        let _ = handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_close_drains() {
        let h = Harness::new();
        let (_control, handle) = h.start(Snapshot::Ok).await;
        h.hub.close();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::UpstreamClosed);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancel_drains_with_cancelled() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Ok).await;
        h.root.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(control.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn first_close_reason_wins() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Ok).await;
        control.close(CloseReason::Shutdown);
        control.close(CloseReason::WriteFailed);
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn no_output_after_cancel() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Ok).await;
        control.close(CloseReason::ClientDisconnected);
        let _ = handle.await.unwrap().unwrap();
        let before = h.sink.frames.lock().len();
        h.publish("ratelimit:events", "late").await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.sink.frames.lock().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_failure_aborts_before_registration() {
        let h = Harness::new();
        h.hub.close();
        let session = h.session(Snapshot::Ok);
        let control = session.control();
        let result = session.run(&h.registry).await;
        assert_matches!(result, Err(SessionError::Subscribe(StoreError::Closed)));
        assert!(h.registry.is_empty());
        assert_eq!(control.state(), SessionState::Closed);
        assert!(h.sink.frames.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_writer_still_closes() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Ok).await;
        h.sink.hang.store(true, Ordering::SeqCst);
        h.publish("ratelimit:events", "stuck").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        control.close(CloseReason::Shutdown);
        let summary = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.reason, CloseReason::Shutdown);
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_run_still_releases_everything() {
        let h = Harness::new();
        let (control, handle) = h.start(Snapshot::Ok).await;
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(h.sink.texts().len(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(h.registry.is_empty());
        assert!(control.token().is_cancelled());
        assert_eq!(control.state(), SessionState::Closed);
        assert_eq!(control.reason(), Some(CloseReason::Cancelled));

        let before = h.sink.frames.lock().len();
        h.publish("ratelimit:events", "orphaned").await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.sink.frames.lock().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_future_releases_everything() {
        let h = Harness::new();
        let session = h.session(Snapshot::Ok);
        let control = session.control();
        {
            let run = session.run(&h.registry);
            tokio::pin!(run);
            // poll until the session is registered, then drop the future
            let _ = tokio::time::timeout(Duration::from_secs(1), &mut run).await;
            assert!(h.registry.contains(control.id()));
        }
        assert!(h.registry.is_empty());
        assert_eq!(control.state(), SessionState::Closed);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.sink.frames.lock().is_empty());
    }
}
