//! HTTP API for the view layer
//!
//! This module provides a local REST API over the live call:
//! - GET /session - Session snapshot
//! - POST /session/join - Join the room
//! - POST /session/leave - End the call (idempotent)
//! - POST /session/video/toggle - Enable/disable the camera track
//! - POST /session/documentation - Request structured documentation
//! - GET /session/transcript - Accumulated transcript
//! - GET /session/notes - Structured documentation received
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
