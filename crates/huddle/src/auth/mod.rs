//! Authentication module.
//!
//! Resolves which identity a request belongs to. Provides:
//! - Session-cookie login against configured accounts
//! - Dev bypass via the `X-Dev-User` header
//! - Middleware that admits only requests with a resolved identity

mod config;
mod error;
mod middleware;
mod store;

pub use config::{AuthConfig, ConfigValidationError, DEFAULT_COOKIE_NAME, UserAccount};
pub use error::AuthError;
pub use middleware::{
    AuthState, CurrentUser, DEV_USER_HEADER, Identity, IdentityResolver, auth_middleware,
    login_redirect, new_session_token,
};
pub use store::{
    MemorySessionStore, MemoryUserStore, SessionStore, UserProfile, UserStore,
};
