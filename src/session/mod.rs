//! Session lifecycle management: the registry, its state machine, and the
//! supervision of the ttyd processes backing each session.

pub(crate) mod process;
mod service;

pub use service::{
    SessionError, SessionRecord, SessionService, SessionServiceConfig, SessionStatus,
};
