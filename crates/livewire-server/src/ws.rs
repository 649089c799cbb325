//! WebSocket transport for change events.
//!
//! Each session gets a [`ConnectionHandle`] backed by a channel. The
//! session registers it with every model, reports the outcome in a
//! `"registered"` frame, then forwards change events as JSON text frames
//! until the client leaves or the application stops. Every session is
//! counted in [`Sessions`](crate::state::Sessions), and it is unregistered
//! from every model before it stops counting, so a drained application
//! holds no stale registrations.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use livewire_models::{ConnectionHandle, RegistrationReport};
use livewire_types::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::{AppState, SessionTicket};

/// Event name of the first frame on every session.
pub const REGISTERED_EVENT: &str = "registered";

/// Upgrade an HTTP request to a WebSocket session.
///
/// # Route
///
/// `GET {socket.path}` (default `/socket`)
pub async fn ws_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let mut session = state.sessions.open();
    if !state.accepts_sessions() {
        debug!(phase = %state.phase(), "Refusing WebSocket session, application is not running");
        close_socket(&mut socket).await;
        return;
    }

    let (connection, close, mut frames) = ConnectionHandle::channel();
    debug!(connection_id = %connection.id(), "WebSocket client connected");

    let report = state.on_connect(&connection).await;
    if send_envelope(&mut socket, &registered_frame(&report)).await.is_ok() {
        forward(&mut socket, &mut session, &mut frames).await;
    }

    close.close();
    let removed = state.registry.unregister_all(connection.id()).await;
    debug!(connection_id = %connection.id(), models = removed, "WebSocket session ended");
}

/// Pump frames to the client until either side goes away.
async fn forward(
    socket: &mut WebSocket,
    session: &mut SessionTicket<'_>,
    frames: &mut mpsc::UnboundedReceiver<Envelope>,
) {
    loop {
        tokio::select! {
            // A change event for this connection.
            frame = frames.recv() => {
                let Some(envelope) = frame else {
                    return;
                };
                if send_envelope(socket, &envelope).await.is_err() {
                    debug!("WebSocket client disconnected (send failed)");
                    return;
                }
            }
            // Check if the client sent a close frame or disconnected.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {
                        // Ignore other message types (text, binary from client).
                    }
                }
            }
            // The application is shutting down.
            () = session.shutdown() => {
                debug!("Closing WebSocket session for shutdown");
                close_socket(socket).await;
                return;
            }
        }
    }
}

async fn close_socket(socket: &mut WebSocket) {
    if socket.send(Message::Close(None)).await.is_err() {
        debug!("WebSocket client already gone at shutdown");
    }
}

fn registered_frame(report: &RegistrationReport) -> Envelope {
    let failures: Vec<serde_json::Value> = report
        .failures
        .iter()
        .map(|f| serde_json::json!({ "model": f.model, "error": f.source.to_string() }))
        .collect();
    Envelope {
        event: String::from(REGISTERED_EVENT),
        payload: serde_json::json!({
            "connection": report.connection,
            "models": report.registered,
            "failures": failures,
        }),
    }
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(envelope) {
        Ok(j) => j,
        Err(e) => {
            warn!(event = %envelope.event, "Failed to serialize frame: {e}");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}
