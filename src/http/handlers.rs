use super::state::AppState;
use crate::error::SessionError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DocumentationRequestBody {
    /// e.g. "soap_note", "prescription", "summary"
    pub request_type: String,

    /// Free-form instructions for the documentation model
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentationRequestResponse {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleVideoResponse {
    /// `None` when the call has no camera track
    pub video_enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(e: SessionError) -> Response {
    let status = match &e {
        SessionError::InvalidState(_) => StatusCode::CONFLICT,
        SessionError::MediaAccess(_) => StatusCode::FORBIDDEN,
        SessionError::RoomJoin(_) => StatusCode::BAD_GATEWAY,
        SessionError::Socket(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::BillingSubmission(_) => StatusCode::BAD_GATEWAY,
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /session
/// Current session snapshot
pub async fn get_session_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.stats().await))
}

/// POST /session/join
pub async fn join_session(State(state): State<AppState>) -> Response {
    info!("Join requested for {}", state.session.config().channel_id);

    match state.session.join().await {
        Ok(()) => (StatusCode::OK, Json(state.session.stats().await)).into_response(),
        Err(e) => {
            error!("Failed to join: {}", e);
            error_response(e)
        }
    }
}

/// POST /session/leave
/// Idempotent; returns the final snapshot including the billing outcome
pub async fn leave_session(State(state): State<AppState>) -> Response {
    info!("Leave requested for {}", state.session.config().channel_id);

    match state.session.leave().await {
        Ok(()) => (StatusCode::OK, Json(state.session.stats().await)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /session/video/toggle
pub async fn toggle_video(State(state): State<AppState>) -> Response {
    match state.session.toggle_video().await {
        Ok(video_enabled) => {
            (StatusCode::OK, Json(ToggleVideoResponse { video_enabled })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /session/documentation
/// Ask the AI session for structured documentation
pub async fn request_documentation(
    State(state): State<AppState>,
    Json(req): Json<DocumentationRequestBody>,
) -> Response {
    match state
        .session
        .request_documentation(&req.request_type, &req.details)
        .await
    {
        Ok(request_id) => (
            StatusCode::ACCEPTED,
            Json(DocumentationRequestResponse { request_id }),
        )
            .into_response(),
        Err(e) => {
            error!("Documentation request failed: {}", e);
            error_response(e)
        }
    }
}

/// GET /session/transcript
/// Transcript accumulated so far
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.transcript().await))
}

/// GET /session/notes
/// Structured documentation received so far
pub async fn get_notes(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.session.notes().await))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
