//! API authentication middleware.
//!
//! When a token is configured every protected request must carry
//! `Authorization: Bearer <token>`.  Without one, access is open.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::sessions::ws::token_eq;
use crate::state::AppState;

pub async fn require_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = match state.token.as_deref() {
        Some(t) => t,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v: &axum::http::HeaderValue| v.to_str().ok())
        .and_then(|v: &str| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !token_eq(provided, expected) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "status": "error",
                "error": "invalid or missing API token",
            })),
        )
            .into_response();
    }

    next.run(req).await
}
