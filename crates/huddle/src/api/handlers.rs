//! HTTP handlers for health, presence and session login.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::auth::{CurrentUser, UserProfile};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Connections currently registered with the hub.
    pub connections: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.hub.is_accepting() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: state.hub.registry().len(),
    })
}

/// Identities of everyone currently connected, sorted.
#[instrument(skip(state), fields(user = %user.identity()))]
pub async fn presence(State(state): State<AppState>, user: CurrentUser) -> Json<Vec<String>> {
    let mut identities = state.hub.registry().snapshot();
    identities.sort();
    Json(identities)
}

const LOGIN_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Huddle</title></head>
<body>
<h1>Huddle</h1>
<form id="login">
  <input name="username" placeholder="username or email" autocomplete="username">
  <input name="password" type="password" placeholder="password" autocomplete="current-password">
  <button type="submit">Log in</button>
</form>
<p id="error"></p>
<script>
document.getElementById("login").addEventListener("submit", async (event) => {
  event.preventDefault();
  const form = new FormData(event.target);
  const response = await fetch("/auth/login", {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify({ username: form.get("username"), password: form.get("password") }),
  });
  if (response.ok) {
    window.location = "/";
  } else {
    document.getElementById("error").textContent = "Login failed";
  }
});
</script>
</body>
</html>
"#;

/// Login form for browser clients.
pub async fn login_page() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// User id or email.
    pub username: String,
    pub password: String,
}

/// Login response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: UserProfile,
}

/// Check credentials and set the session cookie.
#[instrument(skip(state, request), fields(username = %request.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.username.trim().is_empty() {
        return Err(ApiError::bad_request("username is required"));
    }

    let (token, user) = state.auth.login(request.username.trim(), &request.password)?;
    info!(user_id = %user.id, "User logged in");

    Ok((
        [(header::SET_COOKIE, state.auth.session_cookie(&token))],
        Json(LoginResponse { user }),
    ))
}

/// Drop the caller's session, if any, and clear the cookie.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = state.auth.session_token(&headers)
        && state.auth.logout(token)
    {
        info!("Session closed");
    }
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, state.auth.clear_cookie())],
    )
}
