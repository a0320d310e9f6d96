//! ttyhub: session manager and reverse proxy for web terminals.
//!
//! Each session is a `ttyd` process on its own local port, attached to a
//! `tmux` session so the shell survives browser disconnects. The HTTP API
//! manages the session lifecycle, `/terminal/<name>` proxies browsers through
//! to the right backend, and `/ws` streams lifecycle events.

pub mod api;
pub mod config;
pub mod ports;
pub mod session;
pub mod shells;
pub mod ws;
