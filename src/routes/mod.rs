// HTTP routes

mod http;

use axum::{Router, routing::get};

use crate::health::HealthRegistry;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) health: HealthRegistry,
}

pub fn app(health: HealthRegistry) -> Router {
    let state = AppState { health };
    Router::new()
        .route("/healthz", get(http::healthz_handler)) // GET /healthz
        .with_state(state)
}
