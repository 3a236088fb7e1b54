use thiserror::Error;

/// Errors surfaced by a consultation session
///
/// Every variant is caught where it occurs and turned into a user-visible
/// notification; none of them is retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Microphone or camera permission was denied
    #[error("Media access denied: {0}")]
    MediaAccess(String),

    /// The RTC SDK failed to join or publish
    #[error("Failed to join room: {0}")]
    RoomJoin(String),

    /// Documentation socket failure (not connected, closed, protocol error)
    #[error("Documentation socket error: {0}")]
    Socket(String),

    /// Billing record could not be submitted
    #[error("Billing submission failed: {0}")]
    BillingSubmission(String),

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl SessionError {
    /// Whether the error leaves the call unable to start
    pub fn blocks_call(&self) -> bool {
        matches!(self, SessionError::MediaAccess(_) | SessionError::RoomJoin(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
