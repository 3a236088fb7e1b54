//! Consultation session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - RTC room membership and local media tracks
//! - Remote participant tracking
//! - The session countdown (only while two participants are present)
//! - The documentation channel and the audio streamed to it
//! - Billing reconciliation when the call ends

mod config;
mod controller;
mod participants;
mod stats;

pub use config::{DocumentationSettings, SessionConfig};
pub use controller::SessionController;
pub use stats::{NotificationLevel, SessionEvent, SessionStats, SessionStatus};
