pub mod auth;
pub mod health;
pub mod responses;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health::health));

    let protected = Router::new()
        .route("/v1/responses", post(responses::create_response))
        .route("/v1/responses/:id", get(responses::get_response))
        .route("/v1/responses/:id/cancel", post(responses::cancel_response))
        .route("/v1/responses/:id/stream", get(responses::stream_response))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public.merge(protected).layer(tower_http::trace::TraceLayer::new_for_http())
}
