//! POST /v1/commands: run one command through the bridge.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::bridge::TargetHint;
use crate::error::BridgeError;
use crate::state::AppState;

/// Upper bound for caller-supplied timeouts.
const MAX_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    /// Route to this live session.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Route to the session of this registry host path.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

pub async fn run_command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Response {
    if req.method.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "code": "INVALID_REQUEST",
                "error": "method must not be empty",
            })),
        )
            .into_response();
    }

    if req.timeout_secs == Some(0) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "code": "INVALID_REQUEST",
                "error": "timeout_secs must be at least 1",
            })),
        )
            .into_response();
    }

    let target = match (req.session_id, req.host) {
        (Some(id), _) => Some(TargetHint::Session(id)),
        (None, Some(path)) => Some(TargetHint::Host(path)),
        (None, None) => None,
    };
    let timeout = req
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.hub.settings().command_timeout)
        .min(MAX_TIMEOUT);

    match state
        .bridge
        .call_with_timeout(&req.method, req.params, target, timeout)
        .await
    {
        Ok(reply) => Json(serde_json::json!({
            "status": "ok",
            "session_id": reply.session_id,
            "result": reply.result,
        }))
        .into_response(),
        Err(err) => (status_for(&err), Json(err.to_json())).into_response(),
    }
}

pub fn status_for(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::NotConnected { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BridgeError::MultipleInstances { .. } => StatusCode::CONFLICT,
        BridgeError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        BridgeError::CommandFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        BridgeError::ConnectionError { .. } => StatusCode::BAD_GATEWAY,
    }
}
