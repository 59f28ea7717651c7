//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures::{SinkExt, StreamExt};
use huddle::api::{self, AppState};
use huddle::auth::{AuthConfig, AuthState, DEV_USER_HEADER, UserAccount};
use huddle::hub::{ChatMessage, Hub, HubConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest, http::HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a test waits for a frame before giving up.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Plain-text password shared by every test account.
pub const PASSWORD: &str = "correct horse";

/// A test account admitted as `{id}@example.com`.
pub fn account(id: &str) -> UserAccount {
    UserAccount {
        id: id.to_string(),
        name: id.to_string(),
        email: email(id),
        password_hash: bcrypt::hash(PASSWORD, 4).unwrap(),
    }
}

/// Identity a test account is admitted under.
pub fn email(id: &str) -> String {
    format!("{id}@example.com")
}

/// Auth config with alice, bob and carol; dev mode accepts `X-Dev-User`.
pub fn test_auth_config(dev_mode: bool) -> AuthConfig {
    AuthConfig {
        dev_mode,
        users: ["alice", "bob", "carol"].into_iter().map(account).collect(),
        ..AuthConfig::default()
    }
}

/// Create a test application backed by a running hub.
pub async fn test_app() -> Router {
    test_app_with_hub().await.0
}

/// Same as [`test_app`], also handing back the hub for inspection.
pub async fn test_app_with_hub() -> (Router, Arc<Hub>) {
    let (hub, _dispatcher) = Hub::spawn(HubConfig::default());
    let auth = AuthState::new(test_auth_config(true));
    let state = AppState::new(hub.clone(), auth);
    (api::create_router(state), hub)
}

/// Test application that also serves the browser client from `dir`.
pub async fn test_app_with_static_dir(dir: &Path) -> Router {
    let (hub, _dispatcher) = Hub::spawn(HubConfig::default());
    let auth = AuthState::new(test_auth_config(false));
    let state = AppState::new(hub, auth).with_static_dir(Some(dir.to_path_buf()));
    api::create_router(state)
}

/// A server listening on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
}

/// Serve the full router on 127.0.0.1 with the given hub settings.
pub async fn spawn_server(hub_config: HubConfig) -> TestServer {
    spawn_server_with_auth(hub_config, test_auth_config(true)).await
}

/// Same as [`spawn_server`] with a custom account list.
pub async fn spawn_server_with_auth(hub_config: HubConfig, auth_config: AuthConfig) -> TestServer {
    let (hub, _dispatcher) = Hub::spawn(hub_config);
    let auth = AuthState::new(auth_config);
    let app = api::create_router(AppState::new(hub.clone(), auth));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, hub }
}

/// Open a chat connection as the dev user `user`.
pub async fn connect(addr: SocketAddr, user: &str) -> WsClient {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert(DEV_USER_HEADER, HeaderValue::from_str(user).unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    ws
}

/// Connect and consume the welcome frame.
pub async fn join(addr: SocketAddr, user: &str) -> WsClient {
    let mut ws = connect(addr, user).await;
    let welcome = next_message(&mut ws).await;
    assert_eq!(welcome, ChatMessage::welcome(&email(user)));
    ws
}

/// Next chat frame, skipping control frames.
pub async fn next_message(ws: &mut WsClient) -> ChatMessage {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("read error");
        match frame {
            Message::Text(text) => return ChatMessage::from_json(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Read frames until one matches `pred`.
pub async fn next_matching(
    ws: &mut WsClient,
    pred: impl Fn(&ChatMessage) -> bool,
) -> ChatMessage {
    loop {
        let msg = next_message(ws).await;
        if pred(&msg) {
            return msg;
        }
    }
}

/// Read frames until a presence update listing exactly `users`.
pub async fn wait_for_presence(ws: &mut WsClient, users: &[&str]) -> ChatMessage {
    let mut expected: Vec<String> = users.iter().map(|u| email(u)).collect();
    expected.sort();
    next_matching(ws, |msg| msg.username == "users" && sorted_names(msg) == expected).await
}

/// Identities listed in a presence message, sorted.
pub fn sorted_names(msg: &ChatMessage) -> Vec<String> {
    let mut names: Vec<String> = msg
        .message
        .split(',')
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

/// Send a raw JSON text frame.
pub async fn send_json(ws: &mut WsClient, body: serde_json::Value) {
    ws.send(Message::Text(body.to_string().into())).await.unwrap();
}
