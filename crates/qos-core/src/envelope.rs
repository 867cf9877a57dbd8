//! The tagged unit delivered to realtime sessions.
//!
//! Wire shape: `{"type": "event"|"metrics", "data": <payload>, "timestamp": <rfc3339>}`.
//! Envelopes are built once and written verbatim; there are no setters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::SystemMetrics;

/// Which source produced an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// A message received from the pub/sub backend.
    Event,
    /// A periodic metrics snapshot.
    Metrics,
}

impl EnvelopeKind {
    /// Wire name, also used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Metrics => "metrics",
        }
    }
}

/// One outbound realtime message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: EnvelopeKind,
    data: Value,
    timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wrap a pub/sub payload. The payload text is carried as-is in `data`.
    pub fn event(payload: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::Event,
            data: Value::String(payload.into()),
            timestamp: Utc::now(),
        }
    }

    /// Wrap a metrics snapshot.
    pub fn metrics(snapshot: &SystemMetrics) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: EnvelopeKind::Metrics,
            data: serde_json::to_value(snapshot)?,
            timestamp: Utc::now(),
        })
    }

    /// Source kind.
    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    /// Payload.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Construction time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serialize to the JSON text written on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
