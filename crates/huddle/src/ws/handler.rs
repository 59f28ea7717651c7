//! WebSocket handler for chat connections.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, interval_at, timeout};

use crate::api::{ApiError, AppState};
use crate::auth::{CurrentUser, Identity};
use crate::hub::{ChatMessage, Connection, Hub, HubError};

/// How long the writer gets to flush its close frame after the read side ends.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one connection, as it shows up in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Upgrade request received, identity not yet known.
    Connecting,
    /// Identity resolved; the socket is about to join the hub.
    Admitted,
    /// Registered and relaying messages.
    Active,
    /// Unregistered and transport released.
    Closed,
}

/// Why the read loop stopped.
#[derive(Debug)]
enum CloseReason {
    ClientClosed,
    Evicted,
    IdleTimeout,
    ReadError(axum::Error),
    HubStopped,
    NotAdmitted(HubError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed"),
            Self::Evicted => f.write_str("closed by hub"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::ReadError(e) => write!(f, "read error: {}", e),
            Self::HubStopped => f.write_str("hub stopped"),
            Self::NotAdmitted(e) => write!(f, "not admitted: {}", e),
        }
    }
}

/// WebSocket upgrade handler.
///
/// GET /ws
///
/// The auth middleware has already resolved the caller; requests without an
/// identity never reach this point.
pub async fn ws_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let identity = user.identity;
    debug!("[{:?}] upgrade request from {}", ConnectionPhase::Connecting, identity);

    if !state.hub.is_accepting() {
        return Err(ApiError::service_unavailable("chat hub is not running"));
    }

    info!("[{:?}] {}", ConnectionPhase::Admitted, identity);
    let hub = state.hub.clone();

    Ok(ws
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| handle_ws_connection(socket, hub, identity)))
}

/// Drive one connection from admission to cleanup.
async fn handle_ws_connection(socket: WebSocket, hub: Arc<Hub>, identity: Identity) {
    let (sender, mut receiver) = socket.split();
    let (conn, outbound) = hub.open_connection(identity.as_str());

    let mut writer = tokio::spawn(write_loop(
        sender,
        outbound,
        conn.clone(),
        hub.config().ping_interval(),
    ));

    let reason = match hub.admit(&conn).await {
        Ok(()) => {
            info!("[{:?}] {} as {}", ConnectionPhase::Active, identity, conn.id());
            read_loop(&mut receiver, &hub, &conn, hub.config().idle_timeout()).await
        }
        Err(e) => {
            warn!("Failed to admit {}: {}", identity, e);
            CloseReason::NotAdmitted(e)
        }
    };

    hub.depart(&conn).await;

    if timeout(WRITER_SHUTDOWN_GRACE, &mut writer).await.is_err() {
        debug!("Writer for {} did not finish, aborting", conn.id());
        writer.abort();
    }

    info!(
        "[{:?}] {} ({}): {}",
        ConnectionPhase::Closed,
        identity,
        conn.id(),
        reason
    );
}

/// Read client frames and push them onto the hub until the connection ends.
async fn read_loop(
    receiver: &mut SplitStream<WebSocket>,
    hub: &Hub,
    conn: &Connection,
    idle: Option<Duration>,
) -> CloseReason {
    loop {
        let frame = tokio::select! {
            _ = conn.closed() => return CloseReason::Evicted,
            frame = next_frame(receiver, idle) => frame,
        };

        let text = match frame {
            Err(_) => return CloseReason::IdleTimeout,
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return CloseReason::ClientClosed,
            Ok(Some(Err(e))) => return CloseReason::ReadError(e),
            Ok(Some(Ok(Message::Text(text)))) => text.as_str().to_owned(),
            Ok(Some(Ok(Message::Binary(bytes)))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Ignoring non-UTF-8 binary frame from {}", conn.id());
                    continue;
                }
            },
            // Pongs are answered by the transport.
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
        };

        match ChatMessage::from_json(&text) {
            Ok(msg) => {
                if let Err(e) = hub.submit(conn, msg).await {
                    warn!("Dropping message from {}: {}", conn.identity(), e);
                    return CloseReason::HubStopped;
                }
            }
            Err(e) => {
                warn!("Ignoring malformed frame from {}: {}", conn.identity(), e);
            }
        }
    }
}

async fn next_frame(
    receiver: &mut SplitStream<WebSocket>,
    idle: Option<Duration>,
) -> Result<Option<Result<Message, axum::Error>>, tokio::time::error::Elapsed> {
    match idle {
        Some(window) => timeout(window, receiver.next()).await,
        None => Ok(receiver.next().await),
    }
}

/// Sole owner of the socket sink: drains the connection's outbound channel
/// and sends keepalive pings. A failed write closes the connection so the
/// read side and the dispatcher both let go of it.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ChatMessage>,
    conn: Arc<Connection>,
    ping_every: Option<Duration>,
) {
    let mut ping = ping_every.map(|every| interval_at(Instant::now() + every, every));

    loop {
        tokio::select! {
            _ = conn.closed() => break,

            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json.into())).await {
                    debug!("Write to {} failed: {}", conn.id(), e);
                    conn.close();
                    return;
                }
            }

            _ = tick(&mut ping) => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    conn.close();
                    return;
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    let _ = sender.close().await;
}

async fn tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
