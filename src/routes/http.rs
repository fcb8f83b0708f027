// GET handlers: healthz

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use super::AppState;

/// GET /healthz — 204 when every component is healthy, otherwise 503. Never names the failing component.
pub(super) async fn healthz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.is_healthy() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy").into_response()
    }
}
