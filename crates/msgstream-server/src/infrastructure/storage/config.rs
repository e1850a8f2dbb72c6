//! TOML-based configuration for the server binary.
//!
//! The file location comes from the command line (`--config`, default
//! `msgstream.toml` in the working directory).  Example:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 4444
//! accept_backoff_ms = 100
//!
//! [session]
//! initial_buffer_size = 1024
//! max_payload_size = 4294967295
//!
//! [logging]
//! log_level = "info"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a missing file,
//! a missing section, or a missing key all fall back to the built-in value.
//! Older config files keep working when new keys are added.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::{ServerConfig, SessionConfig};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `server.bind_address` is not an IP address.
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ListenerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerSection {
    /// IP address to bind to.  `"0.0.0.0"` binds all IPv4 interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port to listen on.  `0` picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pause in milliseconds after an accept error such as running out of
    /// file descriptors.
    #[serde(default = "default_accept_backoff_ms")]
    pub accept_backoff_ms: u64,
}

/// Per-connection receive settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Receive buffer size in bytes before any growth.
    #[serde(default = "default_initial_buffer_size")]
    pub initial_buffer_size: usize,
    /// Largest payload in bytes a client may send.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4444
}
fn default_accept_backoff_ms() -> u64 {
    100
}
fn default_initial_buffer_size() -> usize {
    1024
}
fn default_max_payload_size() -> u64 {
    u64::from(u32::MAX)
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            accept_backoff_ms: default_accept_backoff_ms(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            initial_buffer_size: default_initial_buffer_size(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Builds the runtime server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `server.bind_address`
    /// does not parse as an IP address.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let bind_address: IpAddr = self
            .server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.server.bind_address.clone()))?;
        // Limits beyond the address space are the same as no limit.
        let max_payload_size =
            usize::try_from(self.session.max_payload_size).unwrap_or(usize::MAX);

        Ok(ServerConfig {
            bind_address,
            port: self.server.port,
            session: SessionConfig {
                initial_buffer_size: self.session.initial_buffer_size,
                max_payload_size,
            },
            accept_backoff: Duration::from_millis(self.server.accept_backoff_ms),
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
