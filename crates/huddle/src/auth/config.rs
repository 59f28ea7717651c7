//! Authentication configuration.

use serde::{Deserialize, Serialize};

use crate::hub::is_valid_identity;

/// Default name of the session cookie.
pub const DEFAULT_COOKIE_NAME: &str = "huddle_session";

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable development mode (accept the `X-Dev-User` header).
    pub dev_mode: bool,

    /// Name of the cookie carrying the session token.
    pub cookie_name: String,

    /// Accounts allowed to log in.
    /// Passwords are stored as bcrypt hashes.
    pub users: Vec<UserAccount>,

    /// Allowed CORS origins. If empty in production, CORS is disabled.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            users: Vec::new(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
        }
    }
}

impl AuthConfig {
    /// Validate the configuration.
    /// Returns an error if the configuration is unusable for the current mode.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.cookie_name.is_empty()
            || !self
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigValidationError::InvalidCookieName(
                self.cookie_name.clone(),
            ));
        }

        if !self.dev_mode && self.users.is_empty() {
            return Err(ConfigValidationError::NoUsers);
        }

        for user in &self.users {
            if !is_valid_identity(&user.email) {
                return Err(ConfigValidationError::InvalidEmail(user.id.clone()));
            }
            if !user.password_hash.starts_with("$2") {
                return Err(ConfigValidationError::InvalidPasswordHash(user.id.clone()));
            }
        }

        Ok(())
    }

    /// Find an account by id or email.
    pub fn find_user(&self, login: &str) -> Option<&UserAccount> {
        self.users
            .iter()
            .find(|u| u.id == login || u.email == login)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// No account could ever log in.
    NoUsers,
    /// The cookie name contains characters that are not allowed.
    InvalidCookieName(String),
    /// A configured email cannot serve as a chat identity.
    InvalidEmail(String),
    /// A configured password is not a bcrypt hash.
    InvalidPasswordHash(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoUsers => {
                write!(
                    f,
                    "At least one user is required when dev_mode is false. Add [[auth.users]] entries to the config."
                )
            }
            Self::InvalidCookieName(name) => {
                write!(
                    f,
                    "Cookie name '{}' is invalid; use letters, digits, '_' or '-'.",
                    name
                )
            }
            Self::InvalidEmail(id) => {
                write!(
                    f,
                    "Email for user '{}' must be non-empty and must not contain ','.",
                    id
                )
            }
            Self::InvalidPasswordHash(id) => {
                write!(
                    f,
                    "Password for user '{}' is not a bcrypt hash (generate one with `huddle hash-password`).",
                    id
                )
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// A configured account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// User ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address. This is the identity shown in chat.
    pub email: String,
    /// Password hash (bcrypt).
    pub password_hash: String,
}

impl UserAccount {
    /// Verify a password against this user's hash.
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}
