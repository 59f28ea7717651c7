//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{AuthState, IdentityResolver};
use crate::hub::Hub;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The chat hub every WebSocket connection joins.
    pub hub: Arc<Hub>,
    /// Session login and cookie handling.
    pub auth: AuthState,
    /// Identity lookup used by the auth middleware.
    pub resolver: Arc<dyn IdentityResolver>,
    /// Directory holding the browser client, served behind login.
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    /// Create state whose resolver is the session-backed [`AuthState`].
    pub fn new(hub: Arc<Hub>, auth: AuthState) -> Self {
        let resolver: Arc<dyn IdentityResolver> = Arc::new(auth.clone());
        Self {
            hub,
            auth,
            resolver,
            static_dir: None,
        }
    }

    /// Swap in a different identity resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }
}
