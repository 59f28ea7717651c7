//! Connection hub for real-time message fan-out.
//!
//! ```text
//!  handler (alice) ─┐
//!  handler (bob)   ─┼─► inbound queue ─► dispatcher ─► registry members
//!  handler (carol) ─┘   (bounded, FIFO)   (one task)   (outbound channels)
//! ```
//!
//! Handlers own their sockets and push client messages, already stamped with
//! the sender's identity, onto the inbound queue. The dispatcher is the only
//! consumer and writes each message into every registered connection's
//! outbound channel.

mod dispatcher;
mod error;
mod message;
mod registry;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use dispatcher::{DispatchReport, Dispatcher, Outgoing};
pub use error::{HubError, HubResult};
pub use message::{ChatMessage, PRESENCE_SEPARATOR, SERVER_LABEL, USERS_LABEL, is_valid_identity};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, ConnectionState};

/// Default capacity of the inbound queue.
const INBOUND_QUEUE_CAPACITY: usize = 1024;

/// Default per-connection outbound buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

/// Hub tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Messages that may wait for dispatch before producers are made to wait.
    pub inbound_queue_capacity: usize,
    /// Frames that may wait for one client's socket before that client is
    /// considered too slow and dropped.
    pub connection_buffer: usize,
    /// Close connections that send nothing for this many seconds.
    /// Disabled when unset.
    pub idle_timeout_secs: Option<u64>,
    /// Send a WebSocket ping this often. Disabled when unset.
    pub ping_interval_secs: Option<u64>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbound_queue_capacity: INBOUND_QUEUE_CAPACITY,
            connection_buffer: CONNECTION_BUFFER_SIZE,
            idle_timeout_secs: None,
            ping_interval_secs: None,
        }
    }
}

impl HubConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// The hub of record: registry plus the producer side of the inbound queue.
pub struct Hub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    inbound: mpsc::Sender<Outgoing>,
}

impl Hub {
    /// Build a hub and the dispatcher that will drain its queue. The caller
    /// decides where the dispatcher runs.
    pub fn new(config: HubConfig) -> (Self, Dispatcher) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (inbound, rx) = mpsc::channel(config.inbound_queue_capacity.max(1));
        let dispatcher = Dispatcher::new(registry.clone(), rx);
        let hub = Self {
            config,
            registry,
            inbound,
        };
        (hub, dispatcher)
    }

    /// Build a hub and spawn its dispatcher on the current runtime.
    pub fn spawn(config: HubConfig) -> (Arc<Self>, JoinHandle<()>) {
        let (hub, dispatcher) = Self::new(config);
        let handle = tokio::spawn(dispatcher.run());
        info!(
            "Hub started (queue capacity {}, connection buffer {})",
            hub.config.inbound_queue_capacity, hub.config.connection_buffer
        );
        (Arc::new(hub), handle)
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Whether the dispatcher is still draining the inbound queue.
    pub fn is_accepting(&self) -> bool {
        !self.inbound.is_closed()
    }

    /// Create an unregistered connection for `identity`. The receiver feeds
    /// the connection's writer task.
    pub fn open_connection(
        &self,
        identity: &str,
    ) -> (Arc<Connection>, mpsc::Receiver<ChatMessage>) {
        Connection::new(identity, self.config.connection_buffer)
    }

    /// Bring a connection into the active set: greet it privately, register
    /// it, then broadcast the new presence list to everyone.
    ///
    /// The welcome is queued before registration so it is always the first
    /// frame the client sees. Connections without a usable identity are
    /// refused.
    pub async fn admit(&self, conn: &Arc<Connection>) -> HubResult<()> {
        if !is_valid_identity(conn.identity()) {
            return Err(HubError::InvalidIdentity(conn.id()));
        }
        conn.try_deliver(ChatMessage::welcome(conn.identity()))?;
        self.registry.register(conn.clone())?;
        info!("{} joined ({} connected)", conn.identity(), self.registry.len());
        self.announce_presence().await
    }

    /// Remove a connection and close its transport. Safe to call after the
    /// dispatcher already evicted it. Announces the updated presence list
    /// when this call did the removal.
    pub async fn depart(&self, conn: &Connection) {
        conn.close();
        if self.registry.unregister(conn.id()).is_some() {
            info!("{} left ({} connected)", conn.identity(), self.registry.len());
        }
        if self.announce_presence().await.is_err() {
            debug!("Presence update after {} left was not queued", conn.id());
        }
    }

    /// Queue a client message for broadcast, attributed to `conn`.
    pub async fn submit(&self, conn: &Connection, msg: ChatMessage) -> HubResult<()> {
        self.enqueue(msg.stamp(conn.identity())).await
    }

    /// Queue a message for broadcast. Waits while the queue is full.
    pub async fn enqueue(&self, msg: ChatMessage) -> HubResult<()> {
        self.send(Outgoing::Message(msg)).await
    }

    /// Queue a presence update. The list is taken from the registry when the
    /// dispatcher reaches it, not now.
    pub async fn announce_presence(&self) -> HubResult<()> {
        self.send(Outgoing::Presence).await
    }

    async fn send(&self, item: Outgoing) -> HubResult<()> {
        self.inbound
            .send(item)
            .await
            .map_err(|_| HubError::QueueClosed)
    }

    /// Close every registered connection. Their handlers observe the close
    /// and depart on their own.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        self.registry.for_each(|conn| {
            conn.close();
            closed += 1;
        });
        if closed > 0 {
            info!("Closing {} connection(s)", closed);
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<ChatMessage>) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn identities(presence: &ChatMessage) -> Vec<String> {
        let mut names: Vec<String> = presence.message.split(',').map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.inbound_queue_capacity, 1024);
        assert_eq!(config.connection_buffer, 64);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.ping_interval(), None);
    }

    #[test]
    fn test_zero_durations_disable_timers() {
        let config = HubConfig {
            idle_timeout_secs: Some(0),
            ping_interval_secs: Some(30),
            ..HubConfig::default()
        };
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_message_attributed_to_sender() {
        let (hub, dispatcher) = Hub::new(HubConfig::default());
        let (alice, mut alice_rx) = hub.open_connection("alice");
        let (bob, mut bob_rx) = hub.open_connection("bob");
        hub.admit(&alice).await.unwrap();
        hub.admit(&bob).await.unwrap();

        let handle = tokio::spawn(dispatcher.run());
        hub.submit(&alice, ChatMessage::new("", "hi")).await.unwrap();
        drop(hub);
        handle.await.unwrap();

        let expected = ChatMessage::new("alice", "hi");
        assert_eq!(drain(&mut alice_rx).last(), Some(&expected));
        assert_eq!(drain(&mut bob_rx).last(), Some(&expected));
    }

    #[tokio::test]
    async fn test_join_sends_welcome_then_presence() {
        let (hub, dispatcher) = Hub::new(HubConfig::default());
        let (alice, mut alice_rx) = hub.open_connection("alice");
        let (bob, mut bob_rx) = hub.open_connection("bob");
        let (carol, mut carol_rx) = hub.open_connection("carol");
        hub.admit(&alice).await.unwrap();
        hub.admit(&bob).await.unwrap();
        hub.admit(&carol).await.unwrap();

        let handle = tokio::spawn(dispatcher.run());
        drop(hub);
        handle.await.unwrap();

        let carol_frames = drain(&mut carol_rx);
        assert_eq!(carol_frames[0], ChatMessage::welcome("carol"));
        let last = carol_frames.last().unwrap();
        assert_eq!(last.username, USERS_LABEL);
        assert_eq!(identities(last), vec!["alice", "bob", "carol"]);

        for rx in [&mut alice_rx, &mut bob_rx] {
            let last = drain(rx).pop().unwrap();
            assert_eq!(last.username, USERS_LABEL);
            assert_eq!(identities(&last), vec!["alice", "bob", "carol"]);
        }
    }

    #[tokio::test]
    async fn test_departed_connection_gets_nothing_more() {
        let (hub, dispatcher) = Hub::new(HubConfig::default());
        let (alice, mut alice_rx) = hub.open_connection("alice");
        let (bob, mut bob_rx) = hub.open_connection("bob");
        hub.admit(&alice).await.unwrap();
        hub.admit(&bob).await.unwrap();

        hub.depart(&bob).await;
        hub.depart(&bob).await;
        assert_eq!(hub.registry().snapshot(), vec!["alice"]);

        hub.submit(&alice, ChatMessage::new("", "after")).await.unwrap();
        let handle = tokio::spawn(dispatcher.run());
        drop(hub);
        handle.await.unwrap();

        assert!(drain(&mut bob_rx).iter().all(|m| m.message != "after"));
        assert_eq!(drain(&mut alice_rx).last().unwrap().message, "after");
    }

    #[tokio::test]
    async fn test_close_all_closes_members() {
        let (hub, _dispatcher) = Hub::new(HubConfig::default());
        let (alice, _alice_rx) = hub.open_connection("alice");
        let (bob, _bob_rx) = hub.open_connection("bob");
        hub.admit(&alice).await.unwrap();
        hub.admit(&bob).await.unwrap();

        assert_eq!(hub.close_all(), 2);
        assert!(!alice.is_open());
        assert!(!bob.is_open());
        assert!(hub.registry().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_blank_identity_is_not_admitted() {
        let (hub, _dispatcher) = Hub::new(HubConfig::default());
        for identity in ["", "  ", "alice,bob"] {
            let (conn, mut rx) = hub.open_connection(identity);
            assert_eq!(
                hub.admit(&conn).await,
                Err(HubError::InvalidIdentity(conn.id()))
            );
            assert!(rx.try_recv().is_err());
        }
        assert!(hub.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_end_with_full_presence() {
        let (hub, dispatcher) = Hub::new(HubConfig::default());
        let hub = Arc::new(hub);
        let mut receivers = Vec::new();
        let mut joins = Vec::new();
        for i in 0..16 {
            let (conn, rx) = hub.open_connection(&format!("user{i}"));
            receivers.push(rx);
            let hub = hub.clone();
            joins.push(tokio::spawn(async move { hub.admit(&conn).await }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        let handle = tokio::spawn(dispatcher.run());
        drop(hub);
        handle.await.unwrap();

        let expected: Vec<String> = {
            let mut names: Vec<String> = (0..16).map(|i| format!("user{i}")).collect();
            names.sort();
            names
        };
        for rx in receivers.iter_mut() {
            let last = drain(rx).pop().unwrap();
            assert_eq!(last.username, USERS_LABEL);
            assert_eq!(identities(&last), expected);
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_dispatcher_gone() {
        let (hub, dispatcher) = Hub::new(HubConfig::default());
        assert!(hub.is_accepting());
        drop(dispatcher);
        assert!(!hub.is_accepting());
        assert_eq!(
            hub.enqueue(ChatMessage::system("x")).await,
            Err(HubError::QueueClosed)
        );
    }
}
