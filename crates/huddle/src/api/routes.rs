//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::{auth_middleware, login_redirect};
use crate::ws;

use super::handlers;
use super::state::AppState;

/// Origins accepted in dev mode on top of any configured ones.
const DEV_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://localhost:8080",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:8080",
];

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let resolver = state.resolver.clone();

    // Require an identity; unauthenticated callers get 401.
    let protected_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/presence", get(handlers::presence))
        .layer(middleware::from_fn_with_state(
            resolver.clone(),
            auth_middleware,
        ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/login", get(handlers::login_page))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout));

    let mut app = Router::new().merge(public_routes).merge(protected_routes);

    // Browser client; visitors without a session are sent to /login.
    if let Some(dir) = &state.static_dir {
        let pages: Router<AppState> = Router::new()
            .route_service("/", ServeFile::new(dir.join("index.html")))
            .nest_service("/static", ServeDir::new(dir))
            .layer(middleware::from_fn_with_state(resolver, login_redirect));
        app = app.merge(pages);
    }

    app.layer(cors).layer(trace_layer).with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let allowed_origins = state.auth.allowed_origins();
    let dev_mode = state.auth.is_dev_mode();

    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
        header::COOKIE,
    ];

    let mut origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if dev_mode {
        for origin in DEV_ORIGINS {
            let value = HeaderValue::from_static(origin);
            if !origins.contains(&value) {
                origins.push(value);
            }
        }
    }

    if origins.is_empty() {
        if !allowed_origins.is_empty() {
            tracing::error!("CORS: All configured origins are invalid!");
        }
        // Same-origin only.
        CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")))
    } else {
        tracing::info!("CORS: Allowing {} origin(s)", origins.len());
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true)
    }
}
