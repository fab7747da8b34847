//! WebSocket endpoint for host connections.
//!
//! Flow:
//! 1. Host connects to `/v1/hosts/ws?token=<pre-shared-token>`
//! 2. Hub sends `welcome` with advisory timing hints
//! 3. Host sends `register`; hub answers `registered { session_id }` or
//!    closes with 4002
//! 4. Bidirectional loop: hub sends `execute` / `cancel`, host sends
//!    `register_tools` / `command_result`, both exchange `ping` / `pong`

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use hl_protocol::{WsMessage, CLOSE_INVALID_REGISTRATION};

use super::{Registration, SessionHub};
use crate::state::AppState;

/// How long a freshly opened socket has to send `register`.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue depth per session.
const OUTBOUND_CAPACITY: usize = 64;

/// Constant-time token comparison via SHA-256 digest.
/// Hashing normalizes lengths so ct_eq always compares 32 bytes.
pub fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Pre-shared token.
    pub token: Option<String>,
    /// Identity hash hint, logged only.
    pub host: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/hosts/ws — upgrade to WebSocket.
///
/// When a token is configured (`server.token_env` names the variable) the
/// `token` query param must match it; otherwise access is open.
pub async fn host_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Some(expected) = state.token.as_deref() {
        let provided = query.token.as_deref().unwrap_or("");
        if !token_eq(provided, expected) {
            tracing::warn!(host = ?query.host, "host socket rejected: bad token");
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing host token",
            )
                .into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let hub = state.hub.clone();

    // 1. Advisory timing hints.
    let welcome = WsMessage::Welcome {
        server_timeout: state.config.heartbeat.server_timeout_secs,
        keep_alive_interval: state.config.heartbeat.keep_alive_secs,
    };
    if send_ws_message(&mut ws_sink, &welcome).await.is_err() {
        tracing::debug!("host socket closed before welcome");
        return;
    }

    // 2. Wait for register.
    let registration = match wait_for_register(&mut ws_stream).await {
        Some(r) => r,
        None => {
            tracing::warn!("host did not register in time");
            let _ = close(&mut ws_sink, CLOSE_INVALID_REGISTRATION, "registration timeout").await;
            return;
        }
    };

    // 3. Create the session.  Nothing is forwarded to it before the
    //    `registered` frame goes out because the writer starts after.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(OUTBOUND_CAPACITY);
    let ticket = match hub.register_session(registration, outbound_tx) {
        Ok(ticket) => ticket,
        Err(e) => {
            tracing::warn!(error = %e, "invalid registration");
            let _ = close(&mut ws_sink, CLOSE_INVALID_REGISTRATION, "invalid registration").await;
            return;
        }
    };
    let session_id = ticket.session_id.clone();

    let registered = WsMessage::Registered {
        session_id: session_id.clone(),
    };
    if send_ws_message(&mut ws_sink, &registered).await.is_err() {
        hub.disconnect(&session_id);
        return;
    }

    // 4. Writer task: forwards outbound messages until the channel closes
    //    or the hub evicts the session.
    let mut evicted = ticket.evicted;
    let writer_session = session_id.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if send_ws_message(&mut ws_sink, &msg).await.is_err() {
                        break;
                    }
                }
                eviction = &mut evicted => {
                    if let Ok(eviction) = eviction {
                        tracing::info!(
                            session_id = %writer_session,
                            code = eviction.code,
                            reason = %eviction.reason,
                            "closing host socket"
                        );
                        let _ = close(&mut ws_sink, eviction.code, &eviction.reason).await;
                    }
                    break;
                }
            }
        }
    });

    // 5. Reader loop.
    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                let Some(Ok(msg)) = frame else { break };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                        Ok(ws_msg) => handle_inbound(&hub, &session_id, ws_msg),
                        Err(e) => {
                            tracing::debug!(session_id = %session_id, error = %e, "ignoring unparseable message");
                        }
                    },
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => hub.touch(&session_id),
                    _ => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    // Cleanup: fail in-flight commands and drop the session.
    writer.abort();
    hub.disconnect(&session_id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn wait_for_register(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Registration> {
    let wait = tokio::time::timeout(REGISTER_TIMEOUT, async {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(msg) => {
                        if let Some(registration) = Registration::from_message(msg) {
                            return Some(registration);
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "ignoring unparseable pre-registration frame"),
                },
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await;

    wait.unwrap_or(None)
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &WsMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

async fn close(
    sink: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
) -> Result<(), ()> {
    let frame = CloseFrame {
        code,
        reason: Cow::Owned(reason.to_string()),
    };
    sink.send(Message::Close(Some(frame))).await.map_err(|_| ())
}

fn handle_inbound(hub: &Arc<SessionHub>, session_id: &str, msg: WsMessage) {
    hub.touch(session_id);

    match msg {
        WsMessage::RegisterTools { tools } => {
            hub.declare_capabilities(session_id, tools);
        }
        WsMessage::CommandResult { id, result } => {
            hub.complete_command(session_id, &id, result);
        }
        WsMessage::Ping { .. } => {
            hub.push(
                session_id,
                WsMessage::Pong {
                    session_id: Some(session_id.to_string()),
                },
            );
        }
        WsMessage::Pong { .. } => {}
        other => {
            tracing::debug!(
                session_id = %session_id,
                msg_type = other.kind(),
                "unexpected inbound message type"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(token_eq("secret", "secret"));
        assert!(!token_eq("secret", "secret2"));
        assert!(!token_eq("", "secret"));
    }
}
