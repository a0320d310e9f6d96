//! The session registry and its state machine.
//!
//! All mutations of session state go through [`SessionService`]. A session is
//! only inserted into the table after its backend confirmed readiness, so
//! readers never observe a name whose port is not yet accepting connections.
//! Mutating operations on the same name are serialized through the registry
//! lock plus a pending-names set covering in-flight create/restart; the lock
//! itself is never held across a spawn or a readiness wait.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::ports::{NoPortsAvailable, PortAllocator};
use crate::shells::{ShellRegistry, ShellUnavailable};
use crate::ws::EventHub;

use super::process::{self, ProcessHandle, SpawnOptions, SpawnedProcess};

pub const EVENT_CREATED: &str = "session:created";
pub const EVENT_STOPPED: &str = "session:stopped";
pub const EVENT_EXITED: &str = "session:exited";
pub const EVENT_DELETED: &str = "session:deleted";

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session name must contain only letters, numbers, hyphens and underscores")]
    InvalidName,
    #[error("session \"{0}\" already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    ShellUnavailable(#[from] ShellUnavailable),
    #[error(transparent)]
    NoPortsAvailable(#[from] NoPortsAvailable),
    #[error("ttyd failed to start: {0}")]
    StartupFailed(String),
    #[error("failed to spawn ttyd: {0}")]
    Spawn(#[source] io::Error),
    #[error("session \"{0}\" not found")]
    NotFound(String),
    #[error("session \"{0}\" is not running")]
    NotRunning(String),
    #[error("session \"{0}\" is already running")]
    AlreadyRunning(String),
    #[error("another operation on session \"{0}\" is in progress")]
    Busy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Stopped,
}

/// Serializable view of a session, as returned by the API and carried in
/// lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub name: String,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub shell: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

/// One managed session. `port` and `process` are both present exactly while
/// the session is running.
struct Session {
    name: String,
    port: Option<u16>,
    shell: Option<String>,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    process: Option<ProcessHandle>,
}

impl Session {
    fn record(&self) -> SessionRecord {
        SessionRecord {
            name: self.name.clone(),
            port: self.port,
            pid: self.process.as_ref().map(|p| p.pid),
            shell: self.shell.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Mutable registry state, guarded by one lock.
#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Session>,
    /// Names with a create or restart in flight. Such names are reserved but
    /// not (yet) visible as running.
    pending: HashSet<String>,
    name_counter: u64,
}

impl Registry {
    /// Generate `<prefix>-<n>` from a strictly increasing counter, skipping
    /// names already taken. Terminates because collisions are finite.
    fn generate_name(&mut self, shell: Option<&str>) -> String {
        let prefix = shell.unwrap_or("session");
        loop {
            self.name_counter += 1;
            let name = format!("{}-{}", prefix, self.name_counter);
            if !self.sessions.contains_key(&name) && !self.pending.contains(&name) {
                return name;
            }
        }
    }
}

/// Configuration for the backing processes.
#[derive(Debug, Clone)]
pub struct SessionServiceConfig {
    pub ttyd_bin: String,
    pub tmux_bin: String,
    pub ready_timeout: Duration,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            ttyd_bin: "ttyd".to_string(),
            tmux_bin: "tmux".to_string(),
            ready_timeout: Duration::from_millis(5000),
        }
    }
}

/// Authoritative owner of all session state.
pub struct SessionService {
    config: SessionServiceConfig,
    ports: PortAllocator,
    shells: ShellRegistry,
    events: EventHub,
    registry: Mutex<Registry>,
}

impl SessionService {
    pub fn new(
        config: SessionServiceConfig,
        ports: PortAllocator,
        shells: ShellRegistry,
        events: EventHub,
    ) -> Self {
        Self {
            config,
            ports,
            shells,
            events,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn shells(&self) -> &ShellRegistry {
        &self.shells
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// All sessions, sorted by name for a stable listing.
    pub async fn list(&self) -> Vec<SessionRecord> {
        let registry = self.registry.lock().await;
        let mut records: Vec<_> = registry.sessions.values().map(Session::record).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Resolve a session name to its backend port, if the session is
    /// currently running. Consulted by the proxy on every request; the
    /// result must never be cached across requests.
    pub async fn backend_port(&self, name: &str) -> Option<u16> {
        let registry = self.registry.lock().await;
        registry
            .sessions
            .get(name)
            .filter(|s| s.status == SessionStatus::Running)
            .and_then(|s| s.port)
    }

    /// Create a session: lease a port, spawn ttyd, wait for readiness, then
    /// publish the record. The name is reserved up front but only becomes
    /// visible once the backend is reachable; any failure rolls everything
    /// back and the name never existed as far as readers are concerned.
    pub async fn create(
        self: &Arc<Self>,
        name: Option<String>,
        shell: Option<String>,
    ) -> Result<SessionRecord, SessionError> {
        let name = {
            let mut registry = self.registry.lock().await;
            let name = match name {
                Some(name) => {
                    if !is_valid_name(&name) {
                        return Err(SessionError::InvalidName);
                    }
                    if registry.sessions.contains_key(&name) || registry.pending.contains(&name) {
                        return Err(SessionError::AlreadyExists(name));
                    }
                    name
                }
                None => registry.generate_name(shell.as_deref()),
            };
            registry.pending.insert(name.clone());
            name
        };

        let started = self.start_backend(&name, shell.as_deref()).await;

        let mut registry = self.registry.lock().await;
        registry.pending.remove(&name);
        let (port, handle, exit_rx) = match started {
            Ok(started) => started,
            Err(err) => return Err(err),
        };

        let pid = handle.pid;
        let session = Session {
            name: name.clone(),
            port: Some(port),
            shell,
            status: SessionStatus::Running,
            created_at: Utc::now(),
            process: Some(handle),
        };
        let record = session.record();
        registry.sessions.insert(name.clone(), session);
        drop(registry);

        self.watch_exit(name.clone(), pid, exit_rx);
        info!(name = %name, port, pid, "session created");
        self.events.publish(EVENT_CREATED, &record);
        Ok(record)
    }

    /// Stop a running session: signal the process, clear port and handle,
    /// release the port. The actual process exit is observed asynchronously
    /// and ignored there because the status is already `stopped`.
    pub async fn stop(&self, name: &str) -> Result<SessionRecord, SessionError> {
        let (record, port) = {
            let mut registry = self.registry.lock().await;
            let session = registry
                .sessions
                .get_mut(name)
                .ok_or_else(|| SessionError::NotFound(name.to_string()))?;
            if session.status != SessionStatus::Running {
                return Err(SessionError::NotRunning(name.to_string()));
            }
            if let Some(process) = session.process.take() {
                process.terminate();
            }
            let port = session.port.take();
            session.status = SessionStatus::Stopped;
            (session.record(), port)
        };

        if let Some(port) = port {
            self.ports.release(port).await;
        }
        info!(name, "session stopped");
        self.events.publish(EVENT_STOPPED, &record);
        Ok(record)
    }

    /// Restart a stopped session with its original shell on a freshly
    /// allocated port. On failure the session stays stopped with cleared
    /// fields.
    pub async fn restart(self: &Arc<Self>, name: &str) -> Result<SessionRecord, SessionError> {
        let shell = {
            let mut registry = self.registry.lock().await;
            if registry.pending.contains(name) {
                return Err(SessionError::Busy(name.to_string()));
            }
            let session = registry
                .sessions
                .get(name)
                .ok_or_else(|| SessionError::NotFound(name.to_string()))?;
            if session.status == SessionStatus::Running {
                return Err(SessionError::AlreadyRunning(name.to_string()));
            }
            let shell = session.shell.clone();
            registry.pending.insert(name.to_string());
            shell
        };

        let started = self.start_backend(name, shell.as_deref()).await;

        let mut registry = self.registry.lock().await;
        registry.pending.remove(name);
        let (port, handle, exit_rx) = match started {
            Ok(started) => started,
            Err(err) => return Err(err),
        };

        // The entry cannot have been removed: remove() refuses names with a
        // pending operation.
        let Some(session) = registry.sessions.get_mut(name) else {
            drop(registry);
            handle.terminate();
            self.ports.release(port).await;
            return Err(SessionError::NotFound(name.to_string()));
        };
        let pid = handle.pid;
        session.port = Some(port);
        session.process = Some(handle);
        session.status = SessionStatus::Running;
        let record = session.record();
        drop(registry);

        self.watch_exit(name.to_string(), pid, exit_rx);
        info!(name, port, pid, "session restarted");
        self.events.publish(EVENT_CREATED, &record);
        Ok(record)
    }

    /// Remove a session entirely, terminating its process if running and
    /// tearing down the underlying tmux session. Teardown failures are
    /// swallowed; once initiated, removal always completes.
    pub async fn remove(&self, name: &str) -> Result<(), SessionError> {
        let port = {
            let mut registry = self.registry.lock().await;
            if registry.pending.contains(name) {
                return Err(SessionError::Busy(name.to_string()));
            }
            let session = registry
                .sessions
                .remove(name)
                .ok_or_else(|| SessionError::NotFound(name.to_string()))?;
            if let Some(process) = &session.process {
                process.terminate();
            }
            session.port
        };

        if let Some(port) = port {
            self.ports.release(port).await;
        }
        process::kill_multiplexer_session(&self.config.tmux_bin, name).await;
        info!(name, "session deleted");
        self.events.publish(EVENT_DELETED, json!({ "name": name }));
        Ok(())
    }

    /// Terminate all running backends. Used on server shutdown.
    pub async fn shutdown(&self) {
        let registry = self.registry.lock().await;
        for session in registry.sessions.values() {
            if let Some(process) = &session.process {
                info!(name = %session.name, pid = process.pid, "terminating session backend");
                process.terminate();
            }
        }
    }

    /// Allocate a port, spawn ttyd and wait until the port accepts
    /// connections. Rolls back the port lease on any failure. The caller is
    /// responsible for the pending-name reservation.
    async fn start_backend(
        &self,
        name: &str,
        shell: Option<&str>,
    ) -> Result<(u16, ProcessHandle, oneshot::Receiver<()>), SessionError> {
        let shell_path = self.shells.resolve(shell)?;
        let port = self.ports.allocate().await?;

        let opts = SpawnOptions {
            ttyd_bin: &self.config.ttyd_bin,
            tmux_bin: &self.config.tmux_bin,
            name,
            shell_path: shell_path.as_deref(),
            port,
        };
        let spawned = match process::spawn(&opts) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.ports.release(port).await;
                return Err(SessionError::Spawn(err));
            }
        };
        let SpawnedProcess {
            handle,
            stderr,
            mut exit_rx,
        } = spawned;

        let ready = tokio::select! {
            result = process::wait_for_port(port, self.config.ready_timeout) => result,
            _ = &mut exit_rx => Err(io::Error::other("process exited during startup")),
        };

        if let Err(err) = ready {
            handle.terminate();
            self.ports.release(port).await;
            let captured = stderr
                .lock()
                .map(|buf| buf.trim().to_string())
                .unwrap_or_default();
            let detail = if captured.is_empty() {
                err.to_string()
            } else {
                captured
            };
            return Err(SessionError::StartupFailed(detail));
        }

        Ok((port, handle, exit_rx))
    }

    /// Wire the per-process exit observer into the registry's external-exit
    /// transition.
    fn watch_exit(self: &Arc<Self>, name: String, pid: u32, exit_rx: oneshot::Receiver<()>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _ = exit_rx.await;
            service.handle_exit(&name, pid).await;
        });
    }

    /// External-exit transition: the backend died while the registry still
    /// considers the session running. A session already stopped (or since
    /// restarted under a different pid) is left untouched, so exactly one of
    /// `stopped`/`exited` fires per process.
    async fn handle_exit(&self, name: &str, pid: u32) {
        let (record, port) = {
            let mut registry = self.registry.lock().await;
            let Some(session) = registry.sessions.get_mut(name) else {
                return;
            };
            if session.status != SessionStatus::Running {
                return;
            }
            if session.process.as_ref().map(|p| p.pid) != Some(pid) {
                return;
            }
            session.process = None;
            let port = session.port.take();
            session.status = SessionStatus::Stopped;
            (session.record(), port)
        };

        if let Some(port) = port {
            self.ports.release(port).await;
        }
        warn!(name, pid, "session backend exited unexpectedly");
        self.events.publish(EVENT_EXITED, &record);
    }
}

#[cfg(test)]
impl SessionService {
    /// Register a running session backed by an arbitrary `sleep` process so
    /// lifecycle and proxy behavior can be exercised without a ttyd install.
    /// Returns the backing pid.
    pub(crate) async fn attach_running_process(
        self: &Arc<Self>,
        name: &str,
        port: u16,
        lifetime_secs: &str,
    ) -> u32 {
        use std::process::Stdio;

        let child = tokio::process::Command::new("sleep")
            .arg(lifetime_secs)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let (handle, exit_rx) = process::test_support::supervise_child(child, pid);

        self.ports.mark_leased(port).await;
        let mut registry = self.registry.lock().await;
        registry.sessions.insert(
            name.to_string(),
            Session {
                name: name.to_string(),
                port: Some(port),
                shell: None,
                status: SessionStatus::Running,
                created_at: Utc::now(),
                process: Some(handle),
            },
        );
        drop(registry);

        self.watch_exit(name.to_string(), pid, exit_rx);
        pid
    }
}

/// Names double as registry keys, routing path segments and tmux session
/// names, so the charset is deliberately narrow.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
