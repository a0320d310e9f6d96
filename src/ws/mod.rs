//! Lifecycle event fanout to connected UI clients.

mod handler;
mod hub;

pub use handler::ws_handler;
pub use hub::{EventHub, LifecycleEvent};
