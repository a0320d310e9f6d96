//! Spawning and supervision of ttyd backend processes.
//!
//! Each session is served by one ttyd process attached to a tmux session of
//! the same name. ttyd gives no explicit "ready" signal, so readiness is
//! detected by polling its port. A watcher task owns every spawned child,
//! reaps it, and reports the exit exactly once regardless of whether the
//! process died on its own or was terminated.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Delay between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// ttyd `-t` option selecting the terminal theme. The JSON value contains a
/// `"#`, so the literal needs widened raw-string delimiters.
const TTYD_THEME: &str = r##"theme={"background":"#000000"}"##;

/// Parameters for one ttyd spawn.
#[derive(Debug)]
pub struct SpawnOptions<'a> {
    pub ttyd_bin: &'a str,
    pub tmux_bin: &'a str,
    pub name: &'a str,
    pub shell_path: Option<&'a str>,
    pub port: u16,
}

/// Handle to a supervised process.
///
/// Dropping the handle does not kill the process; the watcher task keeps
/// owning the child until it exits.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    /// Request graceful termination (SIGTERM) without waiting for the exit.
    /// The watcher task remains the sole authority on when the process is
    /// actually gone.
    pub fn terminate(&self) {
        let _ = self.kill_tx.try_send(());
    }
}

/// A freshly spawned backend process.
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    /// Captured stderr, filled in by a background reader.
    pub stderr: Arc<Mutex<String>>,
    /// Resolves once, when the process has exited for any reason.
    pub exit_rx: oneshot::Receiver<()>,
}

/// Spawn ttyd bound to `port`, attached to (creating if needed) the tmux
/// session named after the hub session.
pub fn spawn(opts: &SpawnOptions<'_>) -> io::Result<SpawnedProcess> {
    let mut cmd = Command::new(opts.ttyd_bin);
    cmd.arg("-W")
        .arg("-p")
        .arg(opts.port.to_string())
        .arg("-s")
        .arg("9")
        .arg("-t")
        .arg(TTYD_THEME)
        .arg(opts.tmux_bin)
        .arg("new")
        .arg("-A")
        .arg("-s")
        .arg(opts.name);
    if let Some(shell) = opts.shell_path {
        cmd.arg(shell);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| io::Error::other("ttyd exited before its pid could be read"))?;

    let stderr = Arc::new(Mutex::new(String::new()));
    if let Some(pipe) = child.stderr.take() {
        let buf = Arc::clone(&stderr);
        tokio::spawn(async move {
            let mut reader = BufReader::new(pipe);
            let mut line = String::new();
            while let Ok(n) = reader.read_line(&mut line).await {
                if n == 0 {
                    break;
                }
                if let Ok(mut buf) = buf.lock() {
                    buf.push_str(&line);
                }
                line.clear();
            }
        });
    }

    let (kill_tx, exit_rx) = supervise(child, pid);
    debug!(pid, port = opts.port, name = opts.name, "spawned ttyd");

    Ok(SpawnedProcess {
        handle: ProcessHandle { pid, kill_tx },
        stderr,
        exit_rx,
    })
}

/// Start the watcher task that owns the child until it exits.
///
/// Returns the termination channel and a receiver that fires exactly once on
/// exit, whether the process died spontaneously or after a terminate request.
fn supervise(mut child: Child, pid: u32) -> (mpsc::Sender<()>, oneshot::Receiver<()>) {
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => debug!(pid, %status, "backend process exited"),
                        Err(err) => warn!(pid, error = %err, "failed waiting for backend process"),
                    }
                    break;
                }
                Some(()) = kill_rx.recv() => {
                    debug!(pid, "sending SIGTERM to backend process");
                    unsafe {
                        libc::kill(pid as i32, libc::SIGTERM);
                    }
                    // Keep looping; child.wait() reports the actual exit.
                }
            }
        }
        let _ = exit_tx.send(());
    });

    (kill_tx, exit_rx)
}

/// Poll `127.0.0.1:port` until it accepts a connection.
///
/// ttyd starts asynchronously and offers no readiness hook, so a successful
/// connect is the only usable signal. Fails with the last connect error once
/// the deadline passes.
pub async fn wait_for_port(port: u16, deadline: Duration) -> io::Result<()> {
    let start = Instant::now();
    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                if start.elapsed() >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        }
    }
}

/// Tear down the tmux session backing a hub session.
///
/// The session may legitimately not exist (never attached, or already
/// killed), so failures are logged and swallowed.
pub async fn kill_multiplexer_session(tmux_bin: &str, name: &str) {
    let result = Command::new(tmux_bin)
        .args(["kill-session", "-t", name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(err) = result {
        debug!(name, error = %err, "tmux kill-session skipped");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Supervise an arbitrary child process, for registry tests that need a
    /// running session without a real ttyd install.
    pub(crate) fn supervise_child(child: Child, pid: u32) -> (ProcessHandle, oneshot::Receiver<()>) {
        let (kill_tx, exit_rx) = supervise(child, pid);
        (ProcessHandle { pid, kill_tx }, exit_rx)
    }
}
