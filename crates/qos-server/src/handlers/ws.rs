//! `GET /ws`: upgrade into a realtime session.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::realtime::{RealtimeSession, WsSink, read_client};
use crate::server::AppState;

/// Upgrade the connection. Authentication has already run.
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| serve(socket, state))
}

async fn serve(socket: WebSocket, state: AppState) {
    let (writer, reader) = socket.split();
    let config = state.config.realtime.clone();
    let sink = Arc::new(WsSink::new(writer, config.write_timeout));
    let session = RealtimeSession::new(
        sink,
        Arc::clone(&state.events),
        Arc::clone(&state.metrics),
        config,
        state.shutdown.token(),
    );

    let reader_task = tokio::spawn(read_client(reader, session.control()));
    match session.run(&state.sessions).await {
        Ok(summary) => debug!(
            session_id = %summary.id,
            reason = summary.reason.as_str(),
            "websocket session finished"
        ),
        Err(e) => warn!(error = %e, "websocket session failed to start"),
    }
    // the reader exits once the session token is cancelled
    reader_task.abort();
}
