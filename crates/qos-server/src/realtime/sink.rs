//! Output side of a realtime session.
//!
//! A session writes whole [`Frame`]s through an [`OutputSink`]. The
//! WebSocket implementation serialises writers behind one async mutex, so
//! the event loop and the metrics pusher can share it without interleaving,
//! and bounds every write with a timeout.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use super::session::{CloseReason, SessionControl};

/// One unit written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A serialised envelope.
    Text(String),
    /// A payload-less liveness probe.
    Ping,
}

/// Terminal write failure. Never retried.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The write did not complete in time.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    /// The transport rejected the write.
    #[error("transport error: {0}")]
    Transport(String),
    /// The sink was already closed.
    #[error("sink closed")]
    Closed,
}

/// Ordered, backpressured write side of one client connection.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Write one frame. Each call is atomic with respect to other callers.
    async fn send(&self, frame: Frame) -> Result<(), SinkError>;

    /// Close the transport. Best effort.
    async fn close(&self);
}

/// [`OutputSink`] over the write half of an axum WebSocket.
pub struct WsSink {
    inner: Mutex<SplitSink<WebSocket, Message>>,
    write_timeout: Duration,
}

impl WsSink {
    /// Wrap a write half.
    pub fn new(inner: SplitSink<WebSocket, Message>, write_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(inner),
            write_timeout,
        }
    }
}

#[async_trait]
impl OutputSink for WsSink {
    async fn send(&self, frame: Frame) -> Result<(), SinkError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Ping => Message::Ping(vec![].into()),
        };
        // waiting for the lock counts against the write budget
        let write = async {
            let mut ws = self.inner.lock().await;
            ws.send(message).await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SinkError::Transport(e.to_string())),
            Err(_) => Err(SinkError::Timeout(self.write_timeout)),
        }
    }

    async fn close(&self) {
        let close = async {
            let mut ws = self.inner.lock().await;
            ws.close().await
        };
        if let Ok(Err(e)) = tokio::time::timeout(self.write_timeout, close).await {
            debug!(error = %e, "websocket close failed");
        }
    }
}

/// Drain frames sent by the client until it goes away.
///
/// The admin feed is push-only, so inbound text is ignored. A Close frame,
/// a read error or end of stream closes the session with
/// [`CloseReason::ClientDisconnected`]. Returns when the session's token fires.
pub async fn read_client(mut stream: SplitStream<WebSocket>, control: SessionControl) {
    let token = control.token();
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Close(_))) | None => {
                debug!(session_id = %control.id(), "client closed connection");
                break;
            }
            Some(Err(e)) => {
                debug!(session_id = %control.id(), error = %e, "client read failed");
                break;
            }
            Some(Ok(_)) => {}
        }
    }
    control.close(CloseReason::ClientDisconnected);
}
