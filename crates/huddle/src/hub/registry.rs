//! Connection registry.
//!
//! The registry is the single source of truth for who is currently present.
//! Every live connection appears exactly once, keyed by its [`ConnectionId`]
//! and tagged with the identity it was admitted under. All access goes
//! through one mutex; callers only ever receive owned copies, so nothing
//! observed outside a method call can change underneath the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{HubError, HubResult};
use super::message::ChatMessage;

/// Opaque identifier for one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connection's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Handle to one client's transport.
///
/// The socket itself stays with the connection handler task. Everyone else
/// writes through the outbound channel, which a single writer task drains,
/// so frames to one client are never interleaved.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: String,
    outbound: mpsc::Sender<ChatMessage>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection for `identity` with room for `buffer` pending
    /// outbound frames. Returns the receiving end for the writer task.
    pub fn new(identity: impl Into<String>, buffer: usize) -> (Arc<Self>, mpsc::Receiver<ChatMessage>) {
        let (outbound, rx) = mpsc::channel(buffer.max(1));
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            identity: identity.into(),
            outbound,
            closed: CancellationToken::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed.is_cancelled() || self.outbound.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a frame for this connection without waiting.
    ///
    /// Fails when the connection is closed, its writer has gone away, or the
    /// outbound buffer is full.
    pub fn try_deliver(&self, msg: ChatMessage) -> HubResult<()> {
        if self.closed.is_cancelled() {
            return Err(HubError::DeliveryFailed(self.id));
        }
        self.outbound
            .try_send(msg)
            .map_err(|_| HubError::DeliveryFailed(self.id))
    }

    /// Mark the transport closed. The owning handler notices and tears the
    /// socket down. Calling this more than once is harmless.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

/// Thread-safe set of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        // No operation leaves the map half-updated, so a poisoned lock still
        // guards a consistent map.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection. Registering the same connection twice is an
    /// invariant violation and is rejected.
    pub fn register(&self, conn: Arc<Connection>) -> HubResult<()> {
        let id = conn.id();
        if !conn.is_open() {
            return Err(HubError::ConnectionClosed(id));
        }

        let mut connections = self.lock();
        if connections.contains_key(&id) {
            warn!(
                "Rejected duplicate registration of connection {} ({})",
                id,
                conn.identity()
            );
            return Err(HubError::DuplicateConnection(id));
        }
        connections.insert(id, conn);
        debug!(
            "Registered connection {} ({} live)",
            id,
            connections.len()
        );
        Ok(())
    }

    /// Remove a connection if present. Returns the removed handle, or `None`
    /// when someone else already removed it.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.lock();
        let removed = connections.remove(&id);
        if removed.is_some() {
            debug!(
                "Unregistered connection {} ({} live)",
                id,
                connections.len()
            );
        }
        removed
    }

    /// Identities of every open connection at this instant.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock()
            .values()
            .filter(|conn| conn.is_open())
            .map(|conn| conn.identity().to_string())
            .collect()
    }

    /// Handles of every registered connection at this instant, including
    /// ones whose transport has closed but whose handler has not yet
    /// unregistered them.
    pub fn members(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    /// Visit every registered member. Iterates over a copy, so `f` may
    /// itself register or unregister connections.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        for conn in self.members() {
            f(&conn);
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
