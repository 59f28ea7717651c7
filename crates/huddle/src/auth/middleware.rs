//! Identity resolution and authentication middleware.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use log::{debug, warn};

use crate::hub::is_valid_identity;

use super::store::{MemorySessionStore, MemoryUserStore, SessionStore, UserProfile, UserStore};
use super::{AuthConfig, AuthError};

/// Header that names a configured user directly (dev mode only).
pub const DEV_USER_HEADER: &str = "X-Dev-User";

/// The display identity a connection is admitted under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(display: impl Into<String>) -> Self {
        Self(display.into())
    }

    /// An identity that can label chat messages, or
    /// [`AuthError::InvalidIdentity`] if `display` is blank or would break
    /// the presence list.
    pub fn admissible(display: impl Into<String>) -> Result<Self, AuthError> {
        let display = display.into();
        if is_valid_identity(&display) {
            Ok(Self(display))
        } else {
            Err(AuthError::InvalidIdentity)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns an inbound request into a verified identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, parts: &Parts) -> Result<Identity, AuthError>;
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Generate an unguessable session token.
pub fn new_session_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Authentication state shared across handlers.
///
/// Built once at startup from [`AuthConfig`]; owns the session and user
/// stores the resolver consults.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
}

impl AuthState {
    /// Create auth state backed by in-memory stores.
    pub fn new(config: AuthConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryUserStore::new()),
        )
    }

    pub fn with_stores(
        config: AuthConfig,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            users,
        }
    }

    /// Check if dev mode is enabled.
    pub fn is_dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Get allowed CORS origins from config.
    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Check credentials and open a session. Returns the session token and
    /// the stored profile.
    pub fn login(&self, login: &str, password: &str) -> Result<(String, UserProfile), AuthError> {
        let account = self
            .config
            .find_user(login)
            .filter(|u| u.verify_password(password))
            .ok_or_else(|| {
                warn!("Failed login attempt for {}", login);
                AuthError::InvalidCredentials
            })?;

        let profile = UserProfile {
            id: account.id.clone(),
            name: account.name.clone(),
            email: account.email.clone(),
        };
        self.users.put(profile.clone());

        let token = new_session_token();
        self.sessions.set(&token, profile.id.clone());
        debug!("Opened session for user {}", profile.id);
        Ok((token, profile))
    }

    /// Forget a session. Returns whether it existed.
    pub fn logout(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.config.cookie_name, token
        )
    }

    /// `Set-Cookie` value that clears the session cookie.
    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.config.cookie_name
        )
    }

    /// Session token carried by a request, if any.
    pub fn session_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|cookies| token_from_cookie_header(cookies, &self.config.cookie_name))
            .filter(|token| !token.is_empty())
    }

    fn identity_for_session(&self, token: &str) -> Result<Identity, AuthError> {
        let user_id = self.sessions.get(token).ok_or(AuthError::InvalidSession)?;
        let profile = self.users.get(&user_id).ok_or(AuthError::UserNotFound)?;
        Identity::admissible(profile.email).inspect_err(|_| {
            warn!("User {} has no usable identity, refusing", user_id);
        })
    }

    fn identity_for_dev_user(&self, user_id: &str) -> Result<Identity, AuthError> {
        let account = self
            .config
            .users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or(AuthError::UserNotFound)?;
        Identity::admissible(account.email.clone()).inspect_err(|_| {
            warn!("Dev user {} has no usable identity, refusing", user_id);
        })
    }
}

#[async_trait]
impl IdentityResolver for AuthState {
    async fn resolve(&self, parts: &Parts) -> Result<Identity, AuthError> {
        if let Some(token) = self.session_token(&parts.headers) {
            return self.identity_for_session(token);
        }

        if self.config.dev_mode
            && let Some(user_id) = parts
                .headers
                .get(DEV_USER_HEADER)
                .and_then(|h| h.to_str().ok())
        {
            debug!("Using dev user: {}", user_id);
            return self.identity_for_dev_user(user_id);
        }

        Err(AuthError::MissingSession)
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub identity: Identity,
}

impl CurrentUser {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingSession)
    }
}

async fn resolve_into_extensions(
    resolver: &dyn IdentityResolver,
    req: Request,
) -> Result<Request, AuthError> {
    let (mut parts, body) = req.into_parts();
    let identity = resolver.resolve(&parts).await?;
    parts.extensions.insert(CurrentUser { identity });
    Ok(Request::from_parts(parts, body))
}

/// Authentication middleware for API and WebSocket routes.
///
/// Resolves the caller's identity and injects [`CurrentUser`]; requests
/// without one are rejected before reaching the handler.
pub async fn auth_middleware(
    State(resolver): State<Arc<dyn IdentityResolver>>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let req = resolve_into_extensions(resolver.as_ref(), req).await?;
    Ok(next.run(req).await)
}

/// Authentication middleware for browser pages: unauthenticated visitors
/// are sent to the login page instead of getting a JSON error.
pub async fn login_redirect(
    State(resolver): State<Arc<dyn IdentityResolver>>,
    req: Request,
    next: Next,
) -> Response {
    match resolve_into_extensions(resolver.as_ref(), req).await {
        Ok(req) => next.run(req).await,
        Err(e) => {
            debug!("Redirecting to login: {}", e);
            Redirect::to("/login").into_response()
        }
    }
}
