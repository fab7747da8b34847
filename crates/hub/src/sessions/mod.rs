//! Session Hub: tracks one session per registered host connection and
//! correlates commands sent to those sessions with their results.
//!
//! Each session owns a sink into its socket's writer task.  The hub never
//! touches sockets directly; it pushes [`WsMessage`]s into sinks and is fed
//! inbound results by the WebSocket handler in [`ws`].

pub mod events;
pub mod rate_limit;
pub mod ws;

use std::collections::HashMap;
use std::pin::pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hl_domain::config::Config;
use hl_protocol::{split_result, ToolDescriptor, WsMessage, CLOSE_SUPERSEDED};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::time::Instant;

use crate::error::{DispatchError, RegistrationError};
use events::{HubEvent, EVENT_CAPACITY};
use rate_limit::RateLimiter;

/// Channel into a session's socket writer.
pub type SessionSink = mpsc::Sender<WsMessage>;

/// Close code used when the hub itself shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hub-side tunables.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub command_timeout: Duration,
    /// How long an untargeted command waits for a first session.  Zero
    /// fails fast.
    pub grace_period: Duration,
    pub rate_window: Duration,
    pub rate_max: u32,
    /// 0 = unlimited.
    pub max_pending_per_session: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(10),
            rate_window: Duration::from_secs(1),
            rate_max: 50,
            max_pending_per_session: 0,
        }
    }
}

impl HubSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            command_timeout: config.commands.timeout(),
            grace_period: config.commands.grace_period(),
            rate_window: config.rate_limit.window(),
            rate_max: config.rate_limit.max_commands,
            max_pending_per_session: config.commands.max_pending_per_session,
        }
    }
}

/// A `register` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub project_name: String,
    pub project_hash: String,
    pub host_version: String,
    pub client_name: Option<String>,
    pub platform: Option<String>,
}

impl Registration {
    pub fn from_message(msg: WsMessage) -> Option<Self> {
        match msg {
            WsMessage::Register {
                project_name,
                project_hash,
                host_version,
                client_name,
                platform,
            } => Some(Self {
                project_name,
                project_hash,
                host_version,
                client_name,
                platform,
            }),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.project_hash.trim().is_empty() {
            return Err(RegistrationError::MissingField("project_hash"));
        }
        if self.project_name.trim().is_empty() {
            return Err(RegistrationError::MissingField("project_name"));
        }
        if self.host_version.trim().is_empty() {
            return Err(RegistrationError::MissingField("host_version"));
        }
        Ok(())
    }
}

/// Why the hub is closing a session's socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub code: u16,
    pub reason: String,
}

/// Returned by [`SessionHub::register_session`].  `evicted` fires when the
/// hub wants the socket closed.
#[derive(Debug)]
pub struct SessionTicket {
    pub session_id: String,
    pub evicted: oneshot::Receiver<Eviction>,
}

/// Summary returned by list endpoints and in `MULTIPLE_INSTANCES` errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub identity_hash: String,
    pub project_name: String,
    pub host_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub capabilities: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// A resolved command.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub session_id: String,
    pub value: Value,
}

struct Session {
    id: String,
    identity_hash: String,
    project_name: String,
    host_version: String,
    client_name: Option<String>,
    platform: Option<String>,
    capabilities: HashMap<String, ToolDescriptor>,
    connected_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    sink: SessionSink,
    limiter: Mutex<RateLimiter>,
    evict: Option<oneshot::Sender<Eviction>>,
}

impl Session {
    fn summary(&self) -> SessionSummary {
        let mut capabilities: Vec<String> = self.capabilities.keys().cloned().collect();
        capabilities.sort();
        SessionSummary {
            session_id: self.id.clone(),
            identity_hash: self.identity_hash.clone(),
            project_name: self.project_name.clone(),
            host_version: self.host_version.clone(),
            client_name: self.client_name.clone(),
            platform: self.platform.clone(),
            capabilities,
            connected_at: self.connected_at,
            last_heartbeat_at: self.last_heartbeat_at,
        }
    }

    fn evict(&mut self, code: u16, reason: &str) {
        if let Some(tx) = self.evict.take() {
            let _ = tx.send(Eviction {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

type Outcome = Result<Value, DispatchError>;

struct PendingCommand {
    session_id: String,
    method: String,
    started_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionHub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionHub {
    settings: HubSettings,
    sessions: RwLock<HashMap<String, Session>>,
    /// correlation id → waiting caller.  An entry is removed exactly once,
    /// by whichever of result / timeout / disconnect gets here first.
    pending: Mutex<HashMap<String, PendingCommand>>,
    /// Woken whenever the session set changes.
    changed: Notify,
    events: broadcast::Sender<HubEvent>,
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new(HubSettings::default())
    }
}

impl SessionHub {
    pub fn new(settings: HubSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            sessions: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            changed: Notify::new(),
            events,
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Subscribe to the diagnostic event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: HubEvent) {
        let _ = self.events.send(event);
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Validate `registration` and create a session for it.  A live session
    /// with the same identity hash is closed as superseded and its pending
    /// commands fail before the new session becomes visible.
    pub fn register_session(
        &self,
        registration: Registration,
        sink: SessionSink,
    ) -> Result<SessionTicket, RegistrationError> {
        registration.validate()?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let (evict_tx, evict_rx) = oneshot::channel();
        let now = Utc::now();

        let superseded = {
            let mut sessions = self.sessions.write();
            let previous = sessions
                .values()
                .find(|s| s.identity_hash == registration.project_hash)
                .map(|s| s.id.clone());
            let mut old = previous.and_then(|id| sessions.remove(&id));
            if let Some(old) = old.as_mut() {
                old.evict(CLOSE_SUPERSEDED, "superseded");
            }
            sessions.insert(
                session_id.clone(),
                Session {
                    id: session_id.clone(),
                    identity_hash: registration.project_hash.clone(),
                    project_name: registration.project_name.clone(),
                    host_version: registration.host_version.clone(),
                    client_name: registration.client_name.clone(),
                    platform: registration.platform.clone(),
                    capabilities: HashMap::new(),
                    connected_at: now,
                    last_heartbeat_at: now,
                    sink,
                    limiter: Mutex::new(RateLimiter::new(
                        self.settings.rate_window,
                        self.settings.rate_max,
                    )),
                    evict: Some(evict_tx),
                },
            );
            old
        };

        if let Some(old) = superseded {
            let old_id = old.id.clone();
            let failed = self.fail_pending(&old_id, |method| DispatchError::Superseded {
                method: method.to_string(),
                session_id: old_id.clone(),
            });
            tracing::warn!(
                session_id = %old_id,
                replaced_by = %session_id,
                identity_hash = %registration.project_hash,
                failed_pending = failed,
                "session superseded by newer registration"
            );
            self.emit(HubEvent::Superseded {
                session_id: old_id,
                replaced_by: session_id.clone(),
                identity_hash: registration.project_hash.clone(),
                failed_pending: failed,
            });
        }

        tracing::info!(
            session_id = %session_id,
            identity_hash = %registration.project_hash,
            project = %registration.project_name,
            host_version = %registration.host_version,
            "host session registered"
        );
        self.emit(HubEvent::Registered {
            session_id: session_id.clone(),
            identity_hash: registration.project_hash,
            project_name: registration.project_name,
        });
        self.changed.notify_waiters();

        Ok(SessionTicket {
            session_id,
            evicted: evict_rx,
        })
    }

    /// Replace the session's declared capabilities.  Empty input is a no-op.
    /// Returns whether anything changed.
    pub fn declare_capabilities(&self, session_id: &str, tools: Vec<ToolDescriptor>) -> bool {
        if tools.is_empty() {
            tracing::debug!(session_id = %session_id, "empty capability declaration ignored");
            return false;
        }
        let count = {
            let mut sessions = self.sessions.write();
            let Some(session) = sessions.get_mut(session_id) else {
                return false;
            };
            session.capabilities = tools.into_iter().map(|t| (t.name.clone(), t)).collect();
            session.capabilities.len()
        };
        tracing::debug!(session_id = %session_id, count, "capabilities declared");
        self.emit(HubEvent::CapabilitiesDeclared {
            session_id: session_id.to_string(),
            count,
        });
        true
    }

    /// Record liveness for a session.
    pub fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.last_heartbeat_at = Utc::now();
        }
    }

    /// Push a message to a session without waiting.  Returns `false` when
    /// the session is gone or its writer is backed up.
    pub fn push(&self, session_id: &str, msg: WsMessage) -> bool {
        let sink = self.sessions.read().get(session_id).map(|s| s.sink.clone());
        match sink {
            Some(sink) => sink.try_send(msg).is_ok(),
            None => false,
        }
    }

    /// The socket for `session_id` closed.  Every pending command of that
    /// session fails now with `CONNECTION_ERROR`.  Returns how many failed.
    pub fn disconnect(&self, session_id: &str) -> usize {
        let removed = self.sessions.write().remove(session_id);
        let failed = self.fail_pending(session_id, |method| DispatchError::ConnectionError {
            method: method.to_string(),
            session_id: session_id.to_string(),
            reason: "host socket closed".into(),
        });
        if removed.is_some() {
            tracing::info!(session_id = %session_id, failed_pending = failed, "host session disconnected");
            self.emit(HubEvent::Disconnected {
                session_id: session_id.to_string(),
                failed_pending: failed,
            });
            self.changed.notify_waiters();
        }
        failed
    }

    /// Close every session and fail every pending command as cancelled.
    pub fn shutdown(&self) {
        let sessions: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for mut session in sessions {
            session.evict(CLOSE_GOING_AWAY, "hub shutting down");
            self.fail_pending(&session.id, |method| DispatchError::Cancelled {
                method: method.to_string(),
                session_id: session.id.clone(),
                reason: "hub shutting down".into(),
            });
        }
        self.changed.notify_waiters();
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// All live sessions, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut list: Vec<SessionSummary> =
            self.sessions.read().values().map(Session::summary).collect();
        list.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        list
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSummary> {
        self.sessions.read().get(session_id).map(Session::summary)
    }

    /// The live session registered under `identity_hash`, if any.
    pub fn session_for_identity(&self, identity_hash: &str) -> Option<String> {
        self.sessions
            .read()
            .values()
            .find(|s| s.identity_hash == identity_hash)
            .map(|s| s.id.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of in-flight commands.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Send a command with the configured timeout.
    pub async fn send_command(
        &self,
        method: &str,
        params: Value,
        target: Option<&str>,
    ) -> Result<Reply, DispatchError> {
        self.send_command_with_timeout(method, params, target, self.settings.command_timeout)
            .await
    }

    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        target: Option<&str>,
        timeout: Duration,
    ) -> Result<Reply, DispatchError> {
        let session_id = self.resolve_target(method, target).await?;
        let sink = self.admit(method, &session_id)?;

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        let started_at = Instant::now();
        let deadline = started_at + timeout;
        self.pending.lock().insert(
            correlation_id.clone(),
            PendingCommand {
                session_id: session_id.clone(),
                method: method.to_string(),
                started_at,
                tx,
            },
        );
        let mut guard = PendingGuard {
            pending: &self.pending,
            correlation_id: &correlation_id,
            sink: &sink,
            armed: true,
        };

        let execute = WsMessage::Execute {
            id: correlation_id.clone(),
            name: method.to_string(),
            params,
            timeout: timeout_secs(timeout),
        };
        // The timer covers the send: a host that stops reading must not
        // stall the caller past its deadline.
        let sent = match tokio::time::timeout_at(deadline, sink.send(execute)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!(
                    session_id = %session_id,
                    correlation_id = %correlation_id,
                    method = %method,
                    "session outbound queue full until deadline"
                );
                return self.expire(&mut guard, &mut rx, &session_id, method, timeout).await;
            }
        };
        if !sent {
            guard.armed = false;
            if self.pending.lock().remove(&correlation_id).is_some() {
                return Err(DispatchError::WriteError {
                    method: method.to_string(),
                    session_id,
                    reason: "session writer closed".into(),
                });
            }
            // The disconnect path already resolved this command.
            return match rx.await {
                Ok(outcome) => outcome.map(|value| Reply { session_id, value }),
                Err(_) => Err(dropped(method, &session_id)),
            };
        }

        tracing::debug!(
            session_id = %session_id,
            correlation_id = %correlation_id,
            method = %method,
            "command sent"
        );
        self.emit(HubEvent::CommandSent {
            session_id: session_id.clone(),
            correlation_id: correlation_id.clone(),
            method: method.to_string(),
        });

        let outcome = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(dropped(method, &session_id)),
            Err(_) => {
                return self.expire(&mut guard, &mut rx, &session_id, method, timeout).await;
            }
        };
        guard.armed = false;
        outcome.map(|value| Reply { session_id, value })
    }

    /// Deadline reached: remove the pending entry and fail with `TIMEOUT`,
    /// unless a result or disconnect resolved it first.
    async fn expire(
        &self,
        guard: &mut PendingGuard<'_>,
        rx: &mut oneshot::Receiver<Outcome>,
        session_id: &str,
        method: &str,
        timeout: Duration,
    ) -> Result<Reply, DispatchError> {
        guard.armed = false;
        let correlation_id = guard.correlation_id;
        let removed = self.pending.lock().remove(correlation_id);
        let outcome = match removed {
            Some(entry) => {
                let elapsed_ms = entry.started_at.elapsed().as_millis() as u64;
                tracing::warn!(
                    session_id = %session_id,
                    correlation_id = %correlation_id,
                    method = %method,
                    elapsed_ms,
                    "command timed out"
                );
                self.emit(HubEvent::CommandTimedOut {
                    session_id: session_id.to_string(),
                    correlation_id: correlation_id.to_string(),
                    method: method.to_string(),
                    elapsed_ms,
                });
                let _ = guard.sink.try_send(WsMessage::Cancel {
                    id: correlation_id.to_string(),
                });
                Err(DispatchError::Timeout {
                    method: method.to_string(),
                    session_id: session_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                    elapsed_ms,
                })
            }
            // The result won the race; its outcome is already sent.
            None => match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(dropped(method, session_id)),
            },
        };
        outcome.map(|value| Reply {
            session_id: session_id.to_string(),
            value,
        })
    }

    /// Resolve the session a command goes to.
    ///
    /// An explicit target must exist.  Otherwise exactly one session is
    /// used; with none the call waits up to the grace period for one to
    /// register, and with several it fails listing all of them.
    pub async fn resolve_target(
        &self,
        method: &str,
        target: Option<&str>,
    ) -> Result<String, DispatchError> {
        if let Some(target) = target {
            if self.sessions.read().contains_key(target) {
                return Ok(target.to_string());
            }
            return Err(DispatchError::NotConnected {
                method: method.to_string(),
                target: Some(target.to_string()),
            });
        }

        let deadline = Instant::now() + self.settings.grace_period;
        loop {
            // Register interest before checking so a registration between
            // the check and the wait is not missed.
            let mut notified = pin!(self.changed.notified());
            notified.as_mut().enable();

            if let Some(id) = self.single_session(method)? {
                return Ok(id);
            }
            if Instant::now() >= deadline {
                return Err(DispatchError::NotConnected {
                    method: method.to_string(),
                    target: None,
                });
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    fn single_session(&self, method: &str) -> Result<Option<String>, DispatchError> {
        let sessions = self.sessions.read();
        match sessions.len() {
            0 => Ok(None),
            1 => Ok(sessions.keys().next().cloned()),
            _ => {
                drop(sessions);
                Err(DispatchError::MultipleInstances {
                    method: method.to_string(),
                    candidates: self.list_sessions(),
                })
            }
        }
    }

    /// Pending cap and rate limit.  Returns the session's sink.
    fn admit(&self, method: &str, session_id: &str) -> Result<SessionSink, DispatchError> {
        let sessions = self.sessions.read();
        let Some(session) = sessions.get(session_id) else {
            return Err(DispatchError::NotConnected {
                method: method.to_string(),
                target: Some(session_id.to_string()),
            });
        };

        let max_pending = self.settings.max_pending_per_session;
        if max_pending > 0 {
            let in_flight = self
                .pending
                .lock()
                .values()
                .filter(|p| p.session_id == session_id)
                .count();
            if in_flight >= max_pending {
                return Err(DispatchError::RateLimited {
                    method: method.to_string(),
                    session_id: session_id.to_string(),
                    reason: format!("{in_flight} commands already pending (limit {max_pending})"),
                });
            }
        }

        let mut limiter = session.limiter.lock();
        if !limiter.try_acquire(Instant::now()) {
            tracing::warn!(session_id = %session_id, method = %method, "command rate limited");
            return Err(DispatchError::RateLimited {
                method: method.to_string(),
                session_id: session_id.to_string(),
                reason: format!(
                    "more than {} commands within {}ms",
                    limiter.max(),
                    limiter.window().as_millis()
                ),
            });
        }
        Ok(session.sink.clone())
    }

    /// Deliver a `command_result`.  Unknown or late ids are logged and
    /// dropped.  Returns whether a waiting caller was resolved.
    pub fn complete_command(&self, session_id: &str, correlation_id: &str, result: Value) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            match pending.get(correlation_id) {
                Some(p) if p.session_id != session_id => {
                    tracing::warn!(
                        session_id = %session_id,
                        correlation_id = %correlation_id,
                        owner = %p.session_id,
                        "command result from a session that does not own it, dropping"
                    );
                    return false;
                }
                Some(_) => pending.remove(correlation_id),
                None => None,
            }
        };
        let Some(entry) = entry else {
            tracing::debug!(
                session_id = %session_id,
                correlation_id = %correlation_id,
                "late or unknown command result dropped"
            );
            return false;
        };

        let elapsed_ms = entry.started_at.elapsed().as_millis() as u64;
        let outcome = split_result(result).map_err(|payload| DispatchError::CommandFailed {
            method: entry.method.clone(),
            session_id: session_id.to_string(),
            error: payload.error,
            code: payload.code,
        });
        tracing::debug!(
            session_id = %session_id,
            correlation_id = %correlation_id,
            method = %entry.method,
            ok = outcome.is_ok(),
            elapsed_ms,
            "command resolved"
        );
        self.emit(HubEvent::CommandResolved {
            session_id: session_id.to_string(),
            correlation_id: correlation_id.to_string(),
            method: entry.method,
            ok: outcome.is_ok(),
            elapsed_ms,
        });
        let _ = entry.tx.send(outcome);
        true
    }

    fn fail_pending(&self, session_id: &str, make: impl Fn(&str) -> DispatchError) -> usize {
        let failed: Vec<PendingCommand> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.session_id == session_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let count = failed.len();
        for entry in failed {
            let _ = entry.tx.send(Err(make(&entry.method)));
        }
        if count > 0 {
            tracing::warn!(
                session_id = %session_id,
                failed_requests = count,
                "failed in-flight commands for closed session"
            );
        }
        count
    }
}

/// Removes a pending entry when the caller stops waiting, and tells the
/// host it may skip the command.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, PendingCommand>>,
    correlation_id: &'a str,
    sink: &'a SessionSink,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.pending.lock().remove(self.correlation_id).is_some() {
            tracing::debug!(correlation_id = %self.correlation_id, "caller dropped pending command");
            let _ = self.sink.try_send(WsMessage::Cancel {
                id: self.correlation_id.to_string(),
            });
        }
    }
}

fn dropped(method: &str, session_id: &str) -> DispatchError {
    DispatchError::ConnectionError {
        method: method.to_string(),
        session_id: session_id.to_string(),
        reason: "pending command dropped".into(),
    }
}

/// Whole seconds for the `execute.timeout` field, rounded up.
fn timeout_secs(timeout: Duration) -> u64 {
    (timeout.as_millis().div_ceil(1000)) as u64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use serde_json::json;

    fn registration(hash: &str) -> Registration {
        Registration {
            project_name: format!("project-{hash}"),
            project_hash: hash.into(),
            host_version: "1.0.0".into(),
            client_name: None,
            platform: Some("linux".into()),
        }
    }

    fn hub_with(settings: HubSettings) -> Arc<SessionHub> {
        Arc::new(SessionHub::new(settings))
    }

    fn fast_settings() -> HubSettings {
        HubSettings {
            grace_period: Duration::ZERO,
            ..HubSettings::default()
        }
    }

    fn register(hub: &SessionHub, hash: &str) -> (SessionTicket, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let ticket = hub.register_session(registration(hash), tx).unwrap();
        (ticket, rx)
    }

    /// Answers every `execute` with `{method, params}`.
    fn answer_all(
        hub: Arc<SessionHub>,
        session_id: String,
        mut rx: mpsc::Receiver<WsMessage>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let WsMessage::Execute {
                    id, name, params, ..
                } = msg
                {
                    hub.complete_command(&session_id, &id, json!({ "method": name, "params": params }));
                }
            }
        })
    }

    async fn next_execute(rx: &mut mpsc::Receiver<WsMessage>) -> String {
        loop {
            match rx.recv().await {
                Some(WsMessage::Execute { id, .. }) => return id,
                Some(_) => continue,
                None => panic!("sink closed"),
            }
        }
    }

    // ── Registration ─────────────────────────────────────────────────

    #[test]
    fn registration_requires_identity_name_and_version() {
        let hub = SessionHub::default();
        let (tx, _rx) = mpsc::channel(1);
        let mut reg = registration("H1");
        reg.project_hash = "  ".into();
        assert_eq!(
            hub.register_session(reg, tx).unwrap_err(),
            RegistrationError::MissingField("project_hash")
        );

        let mut reg = registration("H1");
        reg.host_version.clear();
        assert_eq!(
            reg.validate().unwrap_err(),
            RegistrationError::MissingField("host_version")
        );
        assert_eq!(hub.session_count(), 0);
    }

    #[test]
    fn each_registration_gets_a_fresh_session_id() {
        let hub = SessionHub::default();
        let (a, _ra) = register(&hub, "H1");
        let (b, _rb) = register(&hub, "H2");
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(hub.session_count(), 2);
        assert_eq!(hub.session_for_identity("H2"), Some(b.session_id));
    }

    #[tokio::test]
    async fn same_identity_supersedes_older_session() {
        let hub = hub_with(fast_settings());
        let (first, mut first_rx) = register(&hub, "H1");

        // A command in flight on the first session.
        let pending = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.send_command("slow", json!({}), None).await })
        };
        next_execute(&mut first_rx).await;

        let (second, _second_rx) = register(&hub, "H1");

        let eviction = first.evicted.await.unwrap();
        assert_eq!(eviction.code, CLOSE_SUPERSEDED);
        assert_eq!(hub.session_count(), 1);
        assert_eq!(hub.session_for_identity("H1"), Some(second.session_id.clone()));

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "SUPERSEDED");

        // The old socket's cleanup must not remove the new session.
        hub.disconnect(&first.session_id);
        assert_eq!(hub.session_count(), 1);
    }

    #[test]
    fn capabilities_are_replaced_wholesale() {
        let hub = SessionHub::default();
        let (ticket, _rx) = register(&hub, "H1");
        let tool = |name: &str| ToolDescriptor {
            name: name.into(),
            description: String::new(),
            parameters: None,
        };

        assert!(hub.declare_capabilities(&ticket.session_id, vec![tool("a"), tool("b")]));
        assert!(hub.declare_capabilities(&ticket.session_id, vec![tool("c")]));
        assert_eq!(hub.session(&ticket.session_id).unwrap().capabilities, vec!["c"]);

        assert!(!hub.declare_capabilities(&ticket.session_id, vec![]));
        assert_eq!(hub.session(&ticket.session_id).unwrap().capabilities, vec!["c"]);
    }

    // ── Target resolution ────────────────────────────────────────────

    #[tokio::test]
    async fn single_session_is_used_implicitly() {
        let hub = hub_with(fast_settings());
        let (ticket, rx) = register(&hub, "H1");
        answer_all(hub.clone(), ticket.session_id.clone(), rx);

        let reply = hub.send_command("ping", json!({ "x": 1 }), None).await.unwrap();
        assert_eq!(reply.session_id, ticket.session_id);
        assert_eq!(reply.value["method"], "ping");
        assert_eq!(reply.value["params"]["x"], 1);
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_target_is_not_connected() {
        let hub = hub_with(fast_settings());
        let (_ticket, _rx) = register(&hub, "H1");
        let err = hub
            .send_command("ping", json!({}), Some("missing"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn several_sessions_without_target_lists_candidates() {
        let hub = hub_with(fast_settings());
        let (_a, _ra) = register(&hub, "H1");
        let (_b, _rb) = register(&hub, "H2");

        match hub.send_command("ping", json!({}), None).await.unwrap_err() {
            DispatchError::MultipleInstances { method, candidates } => {
                assert_eq!(method, "ping");
                let mut hashes: Vec<_> = candidates.iter().map(|c| c.identity_hash.as_str()).collect();
                hashes.sort();
                assert_eq!(hashes, vec!["H1", "H2"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_waits_for_first_session() {
        let hub = hub_with(HubSettings {
            grace_period: Duration::from_secs(10),
            ..HubSettings::default()
        });

        let call = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.send_command("ping", json!({}), None).await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        let (ticket, rx) = register(&hub, "H1");
        answer_all(hub.clone(), ticket.session_id.clone(), rx);

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.session_id, ticket.session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_expiry_is_not_connected() {
        let hub = hub_with(HubSettings {
            grace_period: Duration::from_secs(10),
            ..HubSettings::default()
        });
        let start = Instant::now();
        let err = hub.send_command("ping", json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_CONNECTED");
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn zero_grace_fails_fast() {
        let hub = hub_with(fast_settings());
        let err = hub.send_command("ping", json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_CONNECTED");
    }

    // ── Correlation ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn timeout_then_late_result_is_dropped() {
        let hub = hub_with(fast_settings());
        let (ticket, mut rx) = register(&hub, "H1");

        let call = {
            let hub = hub.clone();
            tokio::spawn(async move {
                hub.send_command_with_timeout("slow", json!({}), None, Duration::from_secs(2))
                    .await
            })
        };
        let id = next_execute(&mut rx).await;

        match call.await.unwrap().unwrap_err() {
            DispatchError::Timeout {
                method,
                timeout_ms,
                elapsed_ms,
                ..
            } => {
                assert_eq!(method, "slow");
                assert_eq!(timeout_ms, 2000);
                assert!(elapsed_ms >= 2000);
            }
            other => panic!("unexpected {other:?}"),
        }
        // The host is told it may skip the command.
        assert_eq!(rx.recv().await, Some(WsMessage::Cancel { id: id.clone() }));

        assert!(!hub.complete_command(&ticket.session_id, &id, json!({ "late": true })));
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn structured_error_result_is_command_failed() {
        let hub = hub_with(fast_settings());
        let (ticket, mut rx) = register(&hub, "H1");

        let call = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.send_command("explode", json!({}), None).await })
        };
        let id = next_execute(&mut rx).await;
        assert!(hub.complete_command(
            &ticket.session_id,
            &id,
            json!({ "status": "error", "error": "boom", "code": "command_failed" })
        ));

        match call.await.unwrap().unwrap_err() {
            DispatchError::CommandFailed { error, code, .. } => {
                assert_eq!(error, "boom");
                assert_eq!(code, "command_failed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn result_from_foreign_session_is_ignored() {
        let hub = hub_with(HubSettings {
            grace_period: Duration::ZERO,
            command_timeout: Duration::from_secs(5),
            ..HubSettings::default()
        });
        let (a, mut ra) = register(&hub, "H1");
        let (b, _rb) = register(&hub, "H2");

        let call = {
            let hub = hub.clone();
            let target = a.session_id.clone();
            tokio::spawn(async move { hub.send_command("ping", json!({}), Some(&target)).await })
        };
        let id = next_execute(&mut ra).await;
        assert!(!hub.complete_command(&b.session_id, &id, json!({})));
        assert!(hub.complete_command(&a.session_id, &id, json!({ "ok": true })));
        assert_eq!(call.await.unwrap().unwrap().value["ok"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn socket_close_fails_all_pending_immediately() {
        let hub = hub_with(fast_settings());
        let (ticket, mut rx) = register(&hub, "H1");

        let mut calls = Vec::new();
        for i in 0..3 {
            let hub = hub.clone();
            calls.push(tokio::spawn(async move {
                hub.send_command(&format!("cmd{i}"), json!({}), None).await
            }));
        }
        for _ in 0..3 {
            next_execute(&mut rx).await;
        }
        assert_eq!(hub.pending_count(), 3);

        let start = Instant::now();
        assert_eq!(hub.disconnect(&ticket.session_id), 3);
        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert_eq!(err.code(), "CONNECTION_ERROR");
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn dropped_caller_cancels_on_host() {
        let hub = hub_with(fast_settings());
        let (_ticket, mut rx) = register(&hub, "H1");

        let call = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.send_command("slow", json!({}), None).await })
        };
        let id = next_execute(&mut rx).await;
        call.abort();
        let _ = call.await;

        assert_eq!(rx.recv().await, Some(WsMessage::Cancel { id }));
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writer_still_times_out() {
        let hub = hub_with(HubSettings {
            grace_period: Duration::ZERO,
            command_timeout: Duration::from_secs(1),
            ..HubSettings::default()
        });
        // One slot and nobody reading: the second execute cannot be queued.
        let (tx, _rx) = mpsc::channel(1);
        let _ticket = hub.register_session(registration("H1"), tx).unwrap();

        let first = hub.send_command("a", json!({}), None).await.unwrap_err();
        assert_eq!(first.code(), "TIMEOUT");

        let start = Instant::now();
        let second = tokio::time::timeout(
            Duration::from_secs(120),
            hub.send_command("b", json!({}), None),
        )
        .await
        .expect("send_command must not outlive its deadline");
        assert_eq!(second.unwrap_err().code(), "TIMEOUT");
        assert!(start.elapsed() <= Duration::from_secs(2));
        assert_eq!(hub.pending_count(), 0);
    }

    // ── Limits ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn rate_limit_rejects_new_command_only() {
        let hub = hub_with(HubSettings {
            grace_period: Duration::ZERO,
            rate_window: Duration::from_secs(60),
            rate_max: 2,
            ..HubSettings::default()
        });
        let (ticket, mut rx) = register(&hub, "H1");

        let mut calls = Vec::new();
        for _ in 0..2 {
            let hub = hub.clone();
            calls.push(tokio::spawn(async move { hub.send_command("ok", json!({}), None).await }));
        }
        let ids = vec![next_execute(&mut rx).await, next_execute(&mut rx).await];

        let err = hub.send_command("third", json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");

        for id in ids {
            assert!(hub.complete_command(&ticket.session_id, &id, json!({ "done": true })));
        }
        for call in calls {
            assert!(call.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn pending_cap_rejects_with_rate_limited() {
        let hub = hub_with(HubSettings {
            grace_period: Duration::ZERO,
            max_pending_per_session: 1,
            ..HubSettings::default()
        });
        let (_ticket, mut rx) = register(&hub, "H1");

        let _first = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.send_command("slow", json!({}), None).await })
        };
        next_execute(&mut rx).await;

        match hub.send_command("second", json!({}), None).await.unwrap_err() {
            DispatchError::RateLimited { reason, .. } => assert!(reason.contains("pending")),
            other => panic!("unexpected {other:?}"),
        }
    }

    // ── Events ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn transitions_are_published() {
        let hub = hub_with(fast_settings());
        let mut events = hub.subscribe();

        let (ticket, _rx) = register(&hub, "H1");
        hub.disconnect(&ticket.session_id);

        match events.recv().await.unwrap() {
            HubEvent::Registered { session_id, identity_hash, .. } => {
                assert_eq!(session_id, ticket.session_id);
                assert_eq!(identity_hash, "H1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            events.recv().await.unwrap(),
            HubEvent::Disconnected {
                session_id: ticket.session_id,
                failed_pending: 0,
            }
        );
    }

    #[test]
    fn execute_timeout_rounds_up_to_seconds() {
        assert_eq!(timeout_secs(Duration::from_secs(30)), 30);
        assert_eq!(timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(timeout_secs(Duration::from_millis(1)), 1);
    }
}
