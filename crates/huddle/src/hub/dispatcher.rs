//! Broadcast dispatcher.
//!
//! A single task drains the inbound queue in order and fans each message out
//! to every connection currently in the registry. A failed delivery closes
//! and evicts that one connection; the rest of the round continues.
//!
//! Presence updates travel as [`Outgoing::Presence`] markers and are rendered
//! from the registry when they are dispatched, so the last update anyone
//! receives always matches the registry after the last join or leave.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::message::{ChatMessage, SERVER_LABEL};
use super::registry::{ConnectionId, ConnectionRegistry};

/// An item on the inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Broadcast this message.
    Message(ChatMessage),
    /// Broadcast the presence list as it stands at dispatch time.
    Presence,
}

impl From<ChatMessage> for Outgoing {
    fn from(msg: ChatMessage) -> Self {
        Self::Message(msg)
    }
}

/// Outcome of one broadcast round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections that failed and were removed.
    pub failed: Vec<ConnectionId>,
}

/// Consumer side of the inbound queue.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    inbound: mpsc::Receiver<Outgoing>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, inbound: mpsc::Receiver<Outgoing>) -> Self {
        Self { registry, inbound }
    }

    /// Consume the queue until every producer is gone.
    pub async fn run(mut self) {
        info!("Broadcast dispatcher started");
        while let Some(item) = self.inbound.recv().await {
            let msg = match item {
                Outgoing::Message(msg) => msg,
                Outgoing::Presence => ChatMessage::presence(&self.registry.snapshot()),
            };
            let report = self.dispatch(msg);
            debug!(
                "Dispatched message to {} connection(s), {} failed",
                report.delivered,
                report.failed.len()
            );
        }
        info!("Broadcast dispatcher stopped: inbound queue closed");
    }

    /// Deliver `msg` to every registered connection.
    pub fn dispatch(&self, mut msg: ChatMessage) -> DispatchReport {
        if !msg.has_sender() {
            msg.username = SERVER_LABEL.to_string();
        }

        let mut report = DispatchReport::default();
        self.registry.for_each(|conn| match conn.try_deliver(msg.clone()) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!("Dropping connection {} ({}): {}", conn.id(), conn.identity(), e);
                conn.close();
                self.registry.unregister(conn.id());
                report.failed.push(conn.id());
            }
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::message::USERS_LABEL;
    use crate::hub::registry::Connection;

    fn registry_with(names: &[&str]) -> (Arc<ConnectionRegistry>, Vec<(Arc<Connection>, mpsc::Receiver<ChatMessage>)>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let conns = names
            .iter()
            .map(|name| {
                let (conn, rx) = Connection::new(*name, 8);
                registry.register(conn.clone()).unwrap();
                (conn, rx)
            })
            .collect();
        (registry, conns)
    }

    fn dispatcher_for(registry: &Arc<ConnectionRegistry>) -> Dispatcher {
        let (_tx, rx) = mpsc::channel(1);
        Dispatcher::new(registry.clone(), rx)
    }

    #[test]
    fn test_dispatch_reaches_every_member_once() {
        let (registry, mut conns) = registry_with(&["alice", "bob", "carol"]);
        let dispatcher = dispatcher_for(&registry);

        let report = dispatcher.dispatch(ChatMessage::new("alice", "hi"));
        assert_eq!(report.delivered, 3);
        assert!(report.failed.is_empty());

        for (_, rx) in conns.iter_mut() {
            assert_eq!(rx.try_recv().unwrap(), ChatMessage::new("alice", "hi"));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_empty_label_filled_with_server() {
        let (registry, mut conns) = registry_with(&["alice"]);
        let dispatcher = dispatcher_for(&registry);

        dispatcher.dispatch(ChatMessage::new("", "notice"));
        let got = conns[0].1.try_recv().unwrap();
        assert_eq!(got.username, SERVER_LABEL);
    }

    #[test]
    fn test_failed_write_evicts_only_that_connection() {
        let (registry, mut conns) = registry_with(&["alice", "bob", "carol"]);
        let dispatcher = dispatcher_for(&registry);

        // Simulate bob's writer dying.
        let (bob, bob_rx) = conns.remove(1);
        drop(bob_rx);

        let report = dispatcher.dispatch(ChatMessage::new("alice", "first"));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![bob.id()]);
        assert!(!registry.contains(bob.id()));
        assert!(!bob.is_open());

        let report = dispatcher.dispatch(ChatMessage::new("alice", "second"));
        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());
        for (_, rx) in conns.iter_mut() {
            assert_eq!(rx.try_recv().unwrap().message, "first");
            assert_eq!(rx.try_recv().unwrap().message, "second");
        }
    }

    #[test]
    fn test_full_buffer_counts_as_write_failure() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (slow, _slow_rx) = Connection::new("slow", 1);
        let (fast, mut fast_rx) = Connection::new("fast", 8);
        registry.register(slow.clone()).unwrap();
        registry.register(fast.clone()).unwrap();
        let dispatcher = dispatcher_for(&registry);

        dispatcher.dispatch(ChatMessage::new("fast", "one"));
        let report = dispatcher.dispatch(ChatMessage::new("fast", "two"));

        assert_eq!(report.failed, vec![slow.id()]);
        assert!(!registry.contains(slow.id()));
        assert!(!slow.is_open());
        assert_eq!(registry.snapshot(), vec!["fast"]);
        assert_eq!(fast_rx.try_recv().unwrap().message, "one");
        assert_eq!(fast_rx.try_recv().unwrap().message, "two");
    }

    #[tokio::test]
    async fn test_run_preserves_queue_order() {
        let (registry, mut conns) = registry_with(&["alice"]);
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(Dispatcher::new(registry.clone(), rx).run());

        for i in 0..10 {
            tx.send(ChatMessage::new("alice", i.to_string()).into())
                .await
                .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let rx = &mut conns[0].1;
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap().message, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_presence_marker_reflects_registry_at_dispatch() {
        let (registry, mut conns) = registry_with(&["alice"]);
        let (tx, rx) = mpsc::channel(16);

        // Queued while only alice was registered; bob joins before dispatch.
        tx.send(Outgoing::Presence).await.unwrap();
        let (bob, mut bob_rx) = Connection::new("bob", 8);
        registry.register(bob).unwrap();
        drop(tx);
        Dispatcher::new(registry.clone(), rx).run().await;

        for got in [conns[0].1.try_recv().unwrap(), bob_rx.try_recv().unwrap()] {
            assert_eq!(got.username, USERS_LABEL);
            let mut names: Vec<&str> = got.message.split(',').collect();
            names.sort();
            assert_eq!(names, vec!["alice", "bob"]);
        }
    }
}
