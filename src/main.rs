use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use ttyhub::api::{create_router, AppState};
use ttyhub::config::AppConfig;
use ttyhub::ports::PortAllocator;
use ttyhub::session::{SessionService, SessionServiceConfig};
use ttyhub::shells::ShellRegistry;
use ttyhub::ws::EventHub;

#[derive(Debug, Parser)]
#[command(author, version, about = "Session manager and proxy for web terminals.")]
struct Cli {
    /// Override the config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Reduce output to only errors
    #[arg(short, long)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(cli: &Cli) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ttyhub={level},tower_http={level}")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(io::stderr().is_terminal()))
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    debug!(?config, "resolved configuration");

    let shells = ShellRegistry::detect();
    if shells.list().is_empty() {
        warn!("no known shells found on this host; session creation will fail");
    } else {
        info!(
            shells = %shells
                .list()
                .iter()
                .map(|s| s.id.as_str())
                .collect::<Vec<_>>()
                .join(","),
            "detected shells"
        );
    }

    let allocator = PortAllocator::new(
        config.backend.port_range_start,
        config.backend.port_range_end,
    );
    let sessions = Arc::new(SessionService::new(
        SessionServiceConfig {
            ttyd_bin: config.backend.ttyd_bin.clone(),
            tmux_bin: config.backend.tmux_bin.clone(),
            ready_timeout: Duration::from_millis(config.backend.ready_timeout_ms),
        },
        allocator,
        shells,
        EventHub::new(),
    ));

    let state = AppState::new(sessions.clone());
    let static_dir = config.ui.static_dir.is_dir().then_some(config.ui.static_dir.as_path());
    if static_dir.is_none() {
        debug!(dir = %config.ui.static_dir.display(), "static asset directory not found, serving API only");
    }
    let app = create_router(state, static_dir);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("listening on http://{addr}");

    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("shutdown signal received, stopping sessions");
        sessions.shutdown().await;
        info!("shutdown complete");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    Ok(())
}
