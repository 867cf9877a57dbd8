//! Realtime push feed: sessions, their output sinks and the live registry.

pub mod registry;
pub mod session;
pub mod sink;

pub use registry::{DrainReport, SessionRegistry};
pub use session::{
    CloseReason, RealtimeSession, SessionControl, SessionError, SessionState, SessionSummary,
};
pub use sink::{Frame, OutputSink, SinkError, WsSink, read_client};
