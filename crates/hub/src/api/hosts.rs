//! Host registry endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::state::AppState;

/// GET /v1/hosts — registry entries with live status and active selection.
pub async fn list_hosts(State(state): State<AppState>) -> impl IntoResponse {
    let Some(hosts) = state.hosts.as_ref() else {
        return Json(serde_json::json!({
            "enabled": false,
            "hosts": [],
            "active": null,
        }));
    };

    let snapshot = hosts.snapshot();
    let entries: Vec<Value> = snapshot
        .entries
        .iter()
        .map(|entry| {
            let mut value = serde_json::to_value(entry).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut value {
                map.insert("parked".into(), Value::Bool(entry.parked()));
                map.insert(
                    "sessionId".into(),
                    state
                        .hub
                        .session_for_identity(&entry.identity_hash)
                        .map(Value::String)
                        .unwrap_or(Value::Null),
                );
            }
            value
        })
        .collect();

    Json(serde_json::json!({
        "enabled": true,
        "path": hosts.path(),
        "hosts": entries,
        "active": snapshot.active,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub host_path: String,
}

/// POST /v1/hosts/retry — re-probe a host now, even if it was given up on.
pub async fn retry_host(
    State(state): State<AppState>,
    Json(req): Json<RetryRequest>,
) -> impl IntoResponse {
    let known = state
        .hosts
        .as_ref()
        .map(|h| h.retry(&req.host_path))
        .unwrap_or(false);

    if known {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "ok", "host_path": req.host_path })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "status": "error",
                "error": format!("unknown host `{}`", req.host_path),
            })),
        )
    }
}
