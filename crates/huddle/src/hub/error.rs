//! Hub errors.

use thiserror::Error;

use super::registry::ConnectionId;

/// Errors raised by the connection registry and broadcast path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// A handler tried to register the same connection twice.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// The identity cannot label chat messages (empty, or contains the
    /// presence separator).
    #[error("connection {0} has no usable identity")]
    InvalidIdentity(ConnectionId),

    /// The connection was closed before it could be registered.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// The connection's outbound buffer is full or its writer is gone.
    #[error("delivery to connection {0} failed")]
    DeliveryFailed(ConnectionId),

    /// The dispatcher is no longer consuming the inbound queue.
    #[error("inbound queue closed")]
    QueueClosed,
}

pub type HubResult<T> = Result<T, HubError>;
