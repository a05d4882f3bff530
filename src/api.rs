//! HTTP API for the repair copilot

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::session::SessionManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(sessions: SessionManager) -> Self {
        Self {
            sessions: Arc::new(sessions),
        }
    }
}
