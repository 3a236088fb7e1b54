use crate::session::SessionController;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one live call this process manages
    pub session: SessionController,
}

impl AppState {
    pub fn new(session: SessionController) -> Self {
        Self { session }
    }
}
