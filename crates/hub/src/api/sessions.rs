//! Session listing endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /v1/sessions — list live host sessions.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.hub.list_sessions();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}

/// GET /v1/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.hub.session(&id) {
        Some(session) => Json(serde_json::json!(session)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "error": "session not found" })),
        )
            .into_response(),
    }
}
