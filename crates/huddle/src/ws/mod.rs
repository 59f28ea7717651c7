//! WebSocket endpoint: one handler task per chat connection.

mod handler;

pub use handler::{ConnectionPhase, ws_handler};
