use std::sync::Arc;
use std::time::Instant;

use hl_domain::config::Config;
use tokio_util::sync::CancellationToken;

use crate::bridge::Bridge;
use crate::hosts::HostRegistry;
use crate::sessions::SessionHub;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub hub: Arc<SessionHub>,
    pub bridge: Arc<Bridge>,
    /// `None` when `[registry] enabled = false`.
    pub hosts: Option<Arc<HostRegistry>>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// Pre-shared token for host sockets and the HTTP API, read once at
    /// startup.  `None` = open access.
    pub token: Option<Arc<str>>,

    // ── Lifecycle ─────────────────────────────────────────────────────
    pub started_at: Instant,
    pub shutdown: CancellationToken,
}
