//! Application configuration.
//!
//! Values come from built-in defaults, an optional TOML file and
//! `TTYHUB_`-prefixed environment variables, later sources winning.
//! Nested keys use a double underscore in the environment, so
//! `TTYHUB_BACKEND__PORT_RANGE_START=8000` overrides
//! `backend.port_range_start`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// First port handed to a session backend.
    pub port_range_start: u16,
    /// Last port handed to a session backend (inclusive).
    pub port_range_end: u16,
    pub ttyd_bin: String,
    pub tmux_bin: String,
    /// How long a freshly spawned backend may take to accept connections.
    pub ready_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Directory of static frontend assets, served with an SPA fallback.
    /// Skipped when the directory does not exist.
    pub static_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            port_range_start: 7681,
            port_range_end: 7780,
            ttyd_bin: "ttyd".to_string(),
            tmux_bin: "tmux".to_string(),
            ready_timeout_ms: 5000,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("public"),
        }
    }
}

impl AppConfig {
    /// Load configuration, layering an optional file and the environment on
    /// top of the defaults.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(true),
            );
        } else {
            builder = builder.add_source(
                File::with_name("ttyhub")
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let built = builder
            .add_source(Environment::with_prefix("TTYHUB").separator("__"))
            .build()
            .context("loading configuration")?;

        let config: AppConfig = built
            .try_deserialize()
            .context("deserializing configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backend.port_range_start > self.backend.port_range_end {
            bail!(
                "backend.port_range_start ({}) exceeds backend.port_range_end ({})",
                self.backend.port_range_start,
                self.backend.port_range_end
            );
        }
        Ok(())
    }
}
