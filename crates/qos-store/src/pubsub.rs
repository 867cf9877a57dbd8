//! In-process publish/subscribe hub.
//!
//! One `tokio::sync::broadcast` channel carries every message. Each
//! subscription owns its own receiver, so a slow subscriber only ever lags
//! itself: once its queue is full the oldest messages are dropped for that
//! subscriber alone and publishers never block.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Result, StoreError};
use crate::traits::{EventSource, MessageStream, PubSubMessage};

/// Messages dropped because a subscriber fell behind (counter).
pub const PUBSUB_LAGGED_TOTAL: &str = "pubsub_lagged_total";

/// Default per-subscriber queue depth.
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// In-process [`EventSource`].
pub struct PubSubHub {
    sender: RwLock<Option<broadcast::Sender<Arc<PubSubMessage>>>>,
}

impl PubSubHub {
    /// Create a hub whose subscribers each buffer up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(tx)),
        }
    }

    /// Shut the hub down. Open streams end; new subscriptions fail.
    pub fn close(&self) {
        if self.sender.write().take().is_some() {
            debug!("pub/sub hub closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for PubSubHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

#[async_trait]
impl EventSource for PubSubHub {
    async fn subscribe(
        &self,
        channels: &[String],
        cancel: CancellationToken,
    ) -> Result<MessageStream> {
        if channels.is_empty() {
            return Err(StoreError::InvalidInput(
                "subscribe requires at least one channel".into(),
            ));
        }
        let mut rx = self
            .sender
            .read()
            .as_ref()
            .ok_or(StoreError::Closed)?
            .subscribe();
        let wanted: HashSet<String> = channels.iter().cloned().collect();

        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    msg = rx.recv() => Some(msg),
                };
                match next {
                    None | Some(Err(RecvError::Closed)) => break,
                    Some(Err(RecvError::Lagged(skipped))) => {
                        warn!(skipped, "subscriber lagged, oldest messages dropped");
                        counter!(PUBSUB_LAGGED_TOTAL).increment(skipped);
                    }
                    Some(Ok(msg)) => {
                        if wanted.contains(&msg.channel) {
                            yield PubSubMessage::clone(&msg);
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        let guard = self.sender.read();
        let tx = guard.as_ref().ok_or(StoreError::Closed)?;
        let msg = Arc::new(PubSubMessage {
            channel: channel.to_string(),
            payload,
        });
        // send only fails when nobody is subscribed
        Ok(tx.send(msg).unwrap_or(0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
