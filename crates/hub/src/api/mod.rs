pub mod auth;
pub mod commands;
pub mod health;
pub mod hosts;
pub mod sessions;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the API router.
///
/// The host socket checks its token from the query string itself, so it
/// sits with the public routes.  Everything else is gated behind the
/// bearer-token middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/hosts/ws", get(crate::sessions::ws::host_ws));

    let protected = Router::new()
        .route("/v1/commands", post(commands::run_command))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/hosts", get(hosts::list_hosts))
        .route("/v1/hosts/retry", post(hosts::retry_host))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_token,
        ));

    public.merge(protected)
}

/// The complete service: routes, tracing and backpressure.
pub fn app(state: AppState) -> Router {
    router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .with_state(state)
}
