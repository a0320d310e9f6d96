//! Test utilities and common setup.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use ttyhub::api::{create_router, AppState};
use ttyhub::ports::PortAllocator;
use ttyhub::session::{SessionService, SessionServiceConfig};
use ttyhub::shells::ShellRegistry;
use ttyhub::ws::EventHub;

/// Create a test application with all services initialized.
///
/// The backend binary deliberately does not exist, so tests can exercise
/// every endpoint except a successful spawn without ttyd installed.
pub fn test_app() -> Router {
    let config = SessionServiceConfig {
        ttyd_bin: "ttyd-missing-for-tests".to_string(),
        tmux_bin: "tmux-missing-for-tests".to_string(),
        ready_timeout: Duration::from_millis(300),
    };
    let sessions = Arc::new(SessionService::new(
        config,
        PortAllocator::new(49700, 49800),
        ShellRegistry::detect(),
        EventHub::new(),
    ));
    create_router(AppState::new(sessions), None)
}
