//! HTTP API module.
//!
//! REST endpoints for session lifecycle plus the terminal reverse proxy.

mod error;
mod handlers;
mod proxy;
pub(crate) mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
