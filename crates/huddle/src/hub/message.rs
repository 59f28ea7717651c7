//! Chat message wire type.
//!
//! Every frame on the socket is a JSON object of the form
//! `{"username": "...", "message": "..."}`. Clients may omit `username`;
//! the hub always fills it in before a message leaves the server.

use serde::{Deserialize, Serialize};

/// Sender label for hub-generated notices (welcome, errors).
pub const SERVER_LABEL: &str = "server";

/// Sender label for presence updates. The body is the comma-joined list of
/// identities currently connected.
pub const USERS_LABEL: &str = "users";

/// Separator between identities in a presence body.
pub const PRESENCE_SEPARATOR: &str = ",";

/// Whether `identity` can label a sender: non-blank, and free of the
/// presence separator.
pub fn is_valid_identity(identity: &str) -> bool {
    !identity.trim().is_empty() && !identity.contains(PRESENCE_SEPARATOR)
}

/// A chat message as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub message: String,
}

impl ChatMessage {
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            message: message.into(),
        }
    }

    /// A notice from the server itself.
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(SERVER_LABEL, message)
    }

    /// Private greeting sent to a newly admitted connection.
    pub fn welcome(identity: &str) -> Self {
        Self::system(format!("Hello {identity}"))
    }

    /// Presence update listing every identity in `identities`.
    pub fn presence<S: AsRef<str>>(identities: &[S]) -> Self {
        let body = identities
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(PRESENCE_SEPARATOR);
        Self::new(USERS_LABEL, body)
    }

    /// Overwrite the sender label with the identity of the connection that
    /// produced this message.
    pub fn stamp(mut self, identity: &str) -> Self {
        self.username = identity.to_string();
        self
    }

    pub fn has_sender(&self) -> bool {
        !self.username.is_empty()
    }

    /// Parse a client frame.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
