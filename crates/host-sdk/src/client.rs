//! Core host client: owns the hub connection lifecycle, heartbeat, and
//! command dispatch into the [`ExecutionQueue`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hl_protocol::{HostRecord, ToolDescriptor, WsMessage, CLOSE_NORMAL, CLOSE_SUPERSEDED};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::health::HealthListener;
use crate::host_file::HostFile;
use crate::queue::ExecutionQueue;
use crate::reconnect::ReconnectBackoff;
use crate::registry::CommandRegistry;
use crate::state::{ConnectionState, ConnectionStateMachine};
use crate::types::{CommandContext, CommandError, HostSdkError};

type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A fully-configured host client ready to connect to the hub.
///
/// Create via [`HostClientBuilder`](crate::builder::HostClientBuilder).
pub struct HostClient {
    pub(crate) hub_ws_url: String,
    pub(crate) token: Option<String>,
    pub(crate) project_name: String,
    pub(crate) host_path: String,
    pub(crate) host_label: String,
    pub(crate) identity_hash: String,
    pub(crate) host_version: String,
    pub(crate) client_name: Option<String>,
    pub(crate) platform: Option<String>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) reconnect_backoff: ReconnectBackoff,
    pub(crate) tick_interval: Duration,
    pub(crate) max_request_bytes: usize,
    pub(crate) max_response_bytes: usize,
    pub(crate) host_file: Option<PathBuf>,
}

/// Frames queued for the writer task.
enum Outbound {
    Frame(WsMessage),
    Close { code: u16, reason: String },
}

/// Why a registered session ended.
#[derive(Debug)]
enum SessionEnd {
    Closed(String),
    Superseded,
    Suspended,
    Shutdown,
}

struct Control {
    suspended: watch::Sender<bool>,
    connect_now: Notify,
    shutdown: CancellationToken,
}

/// Handle to a running [`HostClient`].
pub struct HostHandle {
    identity_hash: String,
    state: watch::Receiver<ConnectionState>,
    session: watch::Receiver<Option<String>>,
    control: Arc<Control>,
    task: JoinHandle<Result<(), HostSdkError>>,
}

impl HostClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::HostClientBuilder {
        crate::builder::HostClientBuilder::new()
    }

    /// Identity hash sent as `project_hash`.
    pub fn identity_hash(&self) -> &str {
        &self.identity_hash
    }

    pub fn host_path(&self) -> &str {
        &self.host_path
    }

    /// Spawn the connection loop.  The loop dials the hub, keeps the
    /// session alive, and reconnects per the backoff schedule until
    /// [`HostHandle::shutdown`] is called.
    pub fn spawn(self, registry: CommandRegistry) -> HostHandle {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (session_tx, session_rx) = watch::channel(None);
        let (suspended, _) = watch::channel(false);
        let control = Arc::new(Control {
            suspended,
            connect_now: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        let identity_hash = self.identity_hash.clone();
        let task = tokio::spawn(self.run(registry, control.clone(), state_tx, session_tx));
        HostHandle {
            identity_hash,
            state: state_rx,
            session: session_rx,
            control,
            task,
        }
    }

    async fn run(
        self,
        registry: CommandRegistry,
        control: Arc<Control>,
        state_tx: watch::Sender<ConnectionState>,
        session_tx: watch::Sender<Option<String>>,
    ) -> Result<(), HostSdkError> {
        let registry = Arc::new(registry);
        let descriptors = registry.descriptors();
        let queue = ExecutionQueue::new(registry, self.tick_interval);
        let mut machine = ConnectionStateMachine::new(self.reconnect_backoff.clone());
        let mut suspended = control.suspended.subscribe();

        let host_file = self.host_file.as_ref().map(HostFile::new);
        let health = match &host_file {
            Some(_) => match HealthListener::bind(self.host_path.clone()).await {
                Ok(listener) => Some(listener),
                Err(e) => {
                    tracing::warn!(error = %e, "health listener unavailable, host will not be published");
                    None
                }
            },
            None => None,
        };

        loop {
            if control.shutdown.is_cancelled() {
                break;
            }

            if *suspended.borrow_and_update() {
                machine.tear_down();
                state_tx.send_replace(machine.state());
                tokio::select! {
                    r = suspended.wait_for(|s| !*s) => {
                        if r.is_err() {
                            break;
                        }
                    }
                    _ = control.shutdown.cancelled() => break,
                }
                tracing::info!(host = %self.identity_hash, "resuming after teardown");
            }
            if machine.state() == ConnectionState::TornDown {
                machine.resume();
            }

            if !machine.begin_connect() {
                tracing::debug!(state = ?machine.state(), "connect skipped");
                continue;
            }
            state_tx.send_replace(machine.state());

            let dialed = tokio::select! {
                r = self.dial() => r,
                _ = suspended.changed() => {
                    machine.tear_down();
                    state_tx.send_replace(machine.state());
                    continue;
                }
                _ = control.shutdown.cancelled() => break,
            };

            let (ws, session_id) = match dialed {
                Ok(v) => v,
                Err(e) => {
                    let delay = machine.on_dial_failed();
                    state_tx.send_replace(machine.state());
                    tracing::warn!(
                        host = %self.identity_hash,
                        error = %e,
                        failures = machine.consecutive_failures(),
                        delay_ms = delay.as_millis() as u64,
                        "dial failed"
                    );
                    if !self.wait_backoff(delay, &control, &mut suspended).await {
                        break;
                    }
                    continue;
                }
            };

            session_tx.send_replace(Some(session_id.clone()));
            machine.on_connected();
            state_tx.send_replace(machine.state());
            tracing::info!(
                host = %self.identity_hash,
                session_id = %session_id,
                project = %self.project_name,
                "registered with hub"
            );

            if let (Some(file), Some(listener)) = (&host_file, &health) {
                self.publish(file, listener);
            }

            let end = self
                .run_session(ws, &session_id, &descriptors, &queue, &control, &mut suspended)
                .await;
            session_tx.send_replace(None);

            match end {
                SessionEnd::Closed(reason) => {
                    machine.on_closed();
                    state_tx.send_replace(machine.state());
                    tracing::info!(session_id = %session_id, reason = %reason, "connection lost, reconnecting");
                }
                SessionEnd::Superseded => {
                    let delay = machine.on_superseded();
                    state_tx.send_replace(machine.state());
                    tracing::warn!(
                        session_id = %session_id,
                        delay_ms = delay.as_millis() as u64,
                        "session superseded by another connection for this host"
                    );
                    if !self.wait_backoff(delay, &control, &mut suspended).await {
                        break;
                    }
                }
                SessionEnd::Suspended => {
                    machine.tear_down();
                    state_tx.send_replace(machine.state());
                    tracing::info!(session_id = %session_id, "connection torn down");
                }
                SessionEnd::Shutdown => break,
            }
        }

        tracing::info!(host = %self.identity_hash, "host client shutting down");
        queue.cancel_all("host shutting down");
        state_tx.send_replace(ConnectionState::Disconnected);
        if let Some(file) = &host_file {
            if let Err(e) = file.remove(&self.host_path) {
                tracing::warn!(error = %e, path = %file.path().display(), "failed to remove host record");
            }
        }
        drop(health);
        Ok(())
    }

    /// Sleep out a backoff delay.  Returns `false` on shutdown.
    async fn wait_backoff(
        &self,
        delay: Duration,
        control: &Control,
        suspended: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = control.connect_now.notified() => {
                tracing::info!("connect requested, skipping backoff");
                true
            }
            _ = suspended.changed() => true,
            _ = control.shutdown.cancelled() => false,
        }
    }

    /// Dial, send `register`, and wait for `registered`.  Only a completed
    /// registration counts as a successful connect.
    async fn dial(&self) -> anyhow::Result<(HubSocket, String)> {
        tracing::info!(url = %self.hub_ws_url, host = %self.identity_hash, "connecting to hub");
        let (mut ws, _response) = tokio_tungstenite::connect_async(self.build_url()).await?;

        let register = WsMessage::Register {
            project_name: self.project_name.clone(),
            project_hash: self.identity_hash.clone(),
            host_version: self.host_version.clone(),
            client_name: self.client_name.clone(),
            platform: self.platform.clone(),
        };
        ws.send(Message::Text(serde_json::to_string(&register)?)).await?;

        let session_id = tokio::time::timeout(self.handshake_timeout, await_registered(&mut ws))
            .await
            .map_err(|_| anyhow::anyhow!("registered not received within {:?}", self.handshake_timeout))??;
        Ok((ws, session_id))
    }

    async fn run_session(
        &self,
        ws: HubSocket,
        session_id: &str,
        descriptors: &[ToolDescriptor],
        queue: &ExecutionQueue,
        control: &Control,
        suspended: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(64);

        // Writer task: the only place that touches the sink.
        let mut writer_task = tokio::spawn(async move {
            while let Some(out) = outbound_rx.recv().await {
                match out {
                    Outbound::Frame(msg) => {
                        let json = match serde_json::to_string(&msg) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!(error = %e, "failed to serialize outbound message");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        let _ = outbound_tx
            .send(Outbound::Frame(WsMessage::RegisterTools {
                tools: descriptors.to_vec(),
            }))
            .await;

        let ping_tx = outbound_tx.clone();
        let ping_interval = self.heartbeat_interval;
        let ping_session = session_id.to_string();
        let ping_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(ping_interval);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let msg = WsMessage::Ping {
                    session_id: Some(ping_session.clone()),
                };
                if ping_tx.send(Outbound::Frame(msg)).await.is_err() {
                    break;
                }
            }
        });

        let session = SessionCtx {
            session_id: session_id.to_string(),
            queue: queue.clone(),
            outbound: outbound_tx.clone(),
            inflight: CancellationToken::new(),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            max_request_bytes: self.max_request_bytes,
            max_response_bytes: self.max_response_bytes,
        };

        let end = loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => session.handle_inbound(&text),
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        if code == Some(CLOSE_SUPERSEDED) {
                            break SessionEnd::Superseded;
                        }
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        break SessionEnd::Closed(format!("hub closed connection (code {code:?}, {reason})"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Closed(e.to_string()),
                    None => break SessionEnd::Closed("stream ended".into()),
                },
                changed = suspended.changed() => {
                    if changed.is_err() {
                        break SessionEnd::Shutdown;
                    }
                    if *suspended.borrow() {
                        break SessionEnd::Suspended;
                    }
                }
                _ = control.shutdown.cancelled() => break SessionEnd::Shutdown,
            }
        };

        // Nothing survives the socket: in-flight handlers see their tokens
        // cancelled and queued work is rejected.
        session.inflight.cancel();
        let reason = match &end {
            SessionEnd::Closed(_) => "connection closed",
            SessionEnd::Superseded => "session superseded",
            SessionEnd::Suspended => "connection torn down",
            SessionEnd::Shutdown => "host shutting down",
        };
        queue.cancel_all(reason);
        ping_task.abort();

        match end {
            SessionEnd::Suspended | SessionEnd::Shutdown => {
                let _ = outbound_tx
                    .send(Outbound::Close {
                        code: CLOSE_NORMAL,
                        reason: reason.to_string(),
                    })
                    .await;
                if tokio::time::timeout(Duration::from_secs(1), &mut writer_task)
                    .await
                    .is_err()
                {
                    writer_task.abort();
                }
            }
            _ => writer_task.abort(),
        }
        end
    }

    /// Write this host's record into the shared host file.
    fn publish(&self, file: &HostFile, listener: &HealthListener) {
        let record = HostRecord {
            host_path: self.host_path.clone(),
            host_label: self.host_label.clone(),
            advertised_endpoint: listener.local_addr().to_string(),
            pid: std::process::id(),
            last_seen: Utc::now(),
        };
        if let Err(e) = file.upsert(record) {
            tracing::warn!(error = %e, path = %file.path().display(), "failed to publish host record");
        }
    }

    /// Build the full connection URL with auth params.
    fn build_url(&self) -> String {
        let base = &self.hub_ws_url;
        let sep = if base.contains('?') { "&" } else { "?" };

        match &self.token {
            Some(token) => format!("{base}{sep}token={token}&host={}", self.identity_hash),
            None => format!("{base}{sep}host={}", self.identity_hash),
        }
    }
}

async fn await_registered(ws: &mut HubSocket) -> anyhow::Result<String> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::Registered { session_id }) => return Ok(session_id),
                Ok(WsMessage::Welcome {
                    server_timeout,
                    keep_alive_interval,
                }) => {
                    tracing::debug!(server_timeout, keep_alive_interval, "hub welcome");
                }
                Ok(other) => {
                    tracing::debug!(kind = other.kind(), "ignoring message before registration");
                }
                Err(e) => tracing::debug!(error = %e, "failed to parse message"),
            },
            Message::Close(frame) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                anyhow::bail!("hub closed connection during registration: {reason}");
            }
            _ => {}
        }
    }
    anyhow::bail!("connection closed before registered")
}

/// Just enough of a frame to answer it without keeping its payload.
#[derive(Deserialize)]
struct FrameHead {
    #[serde(rename = "type")]
    kind: String,
    id: Option<String>,
}

/// Per-session state shared with command tasks.
struct SessionCtx {
    session_id: String,
    queue: ExecutionQueue,
    outbound: mpsc::Sender<Outbound>,
    inflight: CancellationToken,
    cancels: Arc<Mutex<HashMap<String, CancellationToken>>>,
    max_request_bytes: usize,
    max_response_bytes: usize,
}

impl SessionCtx {
    fn handle_inbound(&self, text: &str) {
        if text.len() > self.max_request_bytes {
            tracing::warn!(
                bytes = text.len(),
                max = self.max_request_bytes,
                "inbound message exceeds max_request_bytes, dropping"
            );
            self.reject_oversized(text);
            return;
        }

        match serde_json::from_str::<WsMessage>(text) {
            Ok(WsMessage::Execute {
                id,
                name,
                params,
                timeout,
            }) => {
                tracing::debug!(command_id = %id, name = %name, timeout, "received execute");
                self.execute(id, name, params, timeout);
            }
            Ok(WsMessage::Cancel { id }) => {
                if let Some(token) = self.cancels.lock().get(&id) {
                    tracing::debug!(command_id = %id, "hub cancelled command");
                    token.cancel();
                }
            }
            Ok(WsMessage::Ping { .. }) => {
                let pong = WsMessage::Pong {
                    session_id: Some(self.session_id.clone()),
                };
                if self.outbound.try_send(Outbound::Frame(pong)).is_err() {
                    tracing::warn!("outbound queue full, dropping pong");
                }
            }
            Ok(WsMessage::Pong { .. }) => tracing::trace!("received pong"),
            Ok(other) => tracing::debug!(kind = other.kind(), "ignoring message"),
            Err(e) => tracing::debug!(error = %e, "failed to parse message"),
        }
    }

    /// An oversized `execute` still gets a result so the hub caller is not
    /// left waiting for its timeout.
    fn reject_oversized(&self, text: &str) {
        let Ok(head) = serde_json::from_str::<FrameHead>(text) else {
            return;
        };
        let (Some(id), "execute") = (head.id, head.kind.as_str()) else {
            return;
        };
        let error = CommandError::InvalidParams(format!(
            "request exceeds {} bytes",
            self.max_request_bytes
        ));
        let result = WsMessage::CommandResult {
            id,
            result: error.to_payload().to_value(),
        };
        if self.outbound.try_send(Outbound::Frame(result)).is_err() {
            tracing::warn!("outbound queue full, dropping oversized-request error");
        }
    }

    fn execute(&self, id: String, name: String, params: serde_json::Value, timeout: u64) {
        let token = self.inflight.child_token();
        self.cancels.lock().insert(id.clone(), token.clone());
        let ctx = CommandContext {
            command_id: id.clone(),
            name,
            session_id: Some(self.session_id.clone()),
            cancel: token.clone(),
        };
        let execution = self.queue.enqueue(ctx, params);

        let outbound = self.outbound.clone();
        let cancels = self.cancels.clone();
        let max_resp = self.max_response_bytes;
        tokio::spawn(async move {
            // A command still queued when its timeout elapses never starts.
            let deadline = (timeout > 0).then(|| {
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(timeout)).await;
                    token.cancel();
                })
            });

            let result = execution.await;
            if let Some(timer) = deadline {
                timer.abort();
            }
            cancels.lock().remove(&id);

            let value = match result {
                Ok(value) => cap_response(value, max_resp),
                Err(e) => e.to_payload().to_value(),
            };
            let _ = outbound
                .send(Outbound::Frame(WsMessage::CommandResult { id, result: value }))
                .await;
        });
    }
}

/// Replace an oversized result with a truncation marker.
fn cap_response(value: serde_json::Value, max: usize) -> serde_json::Value {
    let serialized = serde_json::to_string(&value).unwrap_or_default();
    if serialized.len() <= max {
        return value;
    }
    let mut cut = max.min(serialized.len());
    while !serialized.is_char_boundary(cut) {
        cut -= 1;
    }
    serde_json::json!({
        "_truncated": true,
        "_original_bytes": serialized.len(),
        "partial": &serialized[..cut],
    })
}

impl HostHandle {
    pub fn identity_hash(&self) -> &str {
        &self.identity_hash
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Hub-assigned session id while connected.
    pub fn session_id(&self) -> Option<String> {
        self.session.borrow().clone()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), HostSdkError> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| HostSdkError::Shutdown)
    }

    /// Ask for a connection now.  No-op (returns `false`) when already
    /// connecting or connected; otherwise leaves any teardown and skips
    /// the remaining backoff delay.
    pub fn connect(&self) -> bool {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => false,
            ConnectionState::TornDown => {
                // Leaving teardown already dials right away; a stored wake-up
                // would swallow the next backoff delay.
                self.control.suspended.send_if_modified(|s| std::mem::replace(s, false));
                true
            }
            ConnectionState::Disconnected => {
                self.control.suspended.send_if_modified(|s| std::mem::replace(s, false));
                self.control.connect_now.notify_one();
                true
            }
        }
    }

    /// Proactively close the connection ahead of a host lifecycle event.
    /// Queued and running commands are cancelled; no reconnect happens
    /// until [`resume`](Self::resume) or [`connect`](Self::connect).
    pub fn suspend(&self) {
        self.control.suspended.send_if_modified(|s| !std::mem::replace(s, true));
    }

    pub fn resume(&self) {
        self.control.suspended.send_if_modified(|s| std::mem::replace(s, false));
    }

    /// Stop the client, closing the connection with a normal close code.
    pub async fn shutdown(self) -> Result<(), HostSdkError> {
        self.control.shutdown.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(HostSdkError::Other(anyhow::anyhow!("host client task failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> HostClient {
        crate::builder::HostClientBuilder::new()
            .hub_ws_url("ws://localhost:6400/v1/hosts/ws")
            .token("secret")
            .project_path("/nonexistent/hostlink/test")
            .build()
            .unwrap()
    }

    #[test]
    fn build_url_with_token() {
        let client = test_client();
        assert_eq!(
            client.build_url(),
            format!(
                "ws://localhost:6400/v1/hosts/ws?token=secret&host={}",
                client.identity_hash()
            )
        );
    }

    #[test]
    fn build_url_without_token() {
        let mut client = test_client();
        client.token = None;
        assert_eq!(
            client.build_url(),
            format!("ws://localhost:6400/v1/hosts/ws?host={}", client.identity_hash())
        );
    }

    #[test]
    fn build_url_with_existing_query_params() {
        let mut client = test_client();
        client.hub_ws_url = "ws://localhost:6400/v1/hosts/ws?foo=bar".into();
        assert!(client
            .build_url()
            .starts_with("ws://localhost:6400/v1/hosts/ws?foo=bar&token=secret"));
    }

    fn session_ctx(max_request_bytes: usize) -> (SessionCtx, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let registry = Arc::new(CommandRegistry::with_defaults());
        let ctx = SessionCtx {
            session_id: "s-1".into(),
            queue: ExecutionQueue::new(registry, Duration::from_millis(5)),
            outbound: tx,
            inflight: CancellationToken::new(),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            max_request_bytes,
            max_response_bytes: 1024,
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn oversized_execute_gets_error_result() {
        let (ctx, mut rx) = session_ctx(64);
        let frame = serde_json::to_string(&WsMessage::Execute {
            id: "c-1".into(),
            name: "ping".into(),
            params: serde_json::json!({ "pad": "x".repeat(200) }),
            timeout: 30,
        })
        .unwrap();
        assert!(frame.len() > 64);

        ctx.handle_inbound(&frame);
        let reply = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match reply {
            Outbound::Frame(WsMessage::CommandResult { id, result }) => {
                assert_eq!(id, "c-1");
                assert_eq!(result["status"], "error");
                assert_eq!(result["code"], "invalid_params");
                assert_eq!(result["error"], "request exceeds 64 bytes");
            }
            _ => panic!("expected command_result"),
        }
        assert_eq!(ctx.queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn oversized_non_execute_is_dropped() {
        let (ctx, mut rx) = session_ctx(16);
        ctx.handle_inbound(r#"{"type":"pong","session_id":"a-long-session-id"}"#);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn small_results_pass_through() {
        let value = serde_json::json!({ "ok": true });
        assert_eq!(cap_response(value.clone(), 1024), value);
    }

    #[test]
    fn oversized_results_are_truncated() {
        let value = serde_json::json!({ "blob": "x".repeat(100) });
        let capped = cap_response(value, 32);
        assert_eq!(capped["_truncated"], true);
        assert_eq!(capped["partial"].as_str().unwrap().len(), 32);
    }
}
