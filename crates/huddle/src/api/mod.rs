//! HTTP API: health, presence, session login and the WebSocket route.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{HealthResponse, LoginRequest, LoginResponse};
pub use routes::create_router;
pub use state::AppState;
