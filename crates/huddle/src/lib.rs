//! Huddle: a real-time chat relay.
//!
//! Authenticated clients connect over WebSocket, get a private greeting, and
//! from then on every message any of them sends is relayed to all of them,
//! attributed to its sender, together with presence updates as people come
//! and go.

pub mod api;
pub mod auth;
pub mod config;
pub mod hub;
pub mod ws;
