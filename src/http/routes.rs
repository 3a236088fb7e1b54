use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Call control
        .route("/session", get(handlers::get_session_status))
        .route("/session/join", post(handlers::join_session))
        .route("/session/leave", post(handlers::leave_session))
        .route("/session/video/toggle", post(handlers::toggle_video))
        // Documentation
        .route("/session/documentation", post(handlers::request_documentation))
        .route("/session/transcript", get(handlers::get_transcript))
        .route("/session/notes", get(handlers::get_notes))
        // The view layer runs on another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
