pub mod config;
pub mod error;
pub mod handler;
pub mod session;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use handler::AppState;

/// Creates the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handler::health))
        .route("/v1/sessions", post(handler::open_session))
        .route("/v1/sessions/{session_id}", delete(handler::close_session))
        .route(
            "/v1/sessions/{session_id}/keepalive",
            put(handler::keepalive),
        )
        .route(
            "/v1/sequencers/{name}",
            get(handler::get_sequencer).delete(handler::destroy),
        )
        .route("/v1/sequencers/{name}/attach", post(handler::attach))
        .route("/v1/sequencers/{name}/detach", post(handler::detach))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
