use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /v1/health — liveness plus a few counters.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let active_host = state
        .hosts
        .as_ref()
        .and_then(|h| h.active())
        .map(|e| e.record.host_path);

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "sessions": state.hub.session_count(),
        "pending_commands": state.hub.pending_count(),
        "registry_enabled": state.hosts.is_some(),
        "active_host": active_host,
    }))
}
