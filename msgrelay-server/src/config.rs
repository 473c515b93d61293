//! Configuration system for the msgrelay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/msgrelay/config.toml`)
//! 4. Compiled defaults
//!
//! The store URL has no default: a server without one refuses to start.

use std::path::PathBuf;
use std::time::Duration;

/// Default listen address.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default bound on a single store operation, in milliseconds.
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Default log level filter.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No store URL was given on the command line, in the environment or in
    /// the config file.
    #[error("no store url configured (set --store-url, MSGRELAY_STORE_URL or server.store_url)")]
    MissingStoreUrl,

    /// The store timeout is zero, which would fail every store operation.
    #[error("store timeout must be greater than zero")]
    ZeroStoreTimeout,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    store_url: Option<String>,
    store_timeout_ms: Option<u64>,
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "msgrelay message relay server")]
pub struct RelayCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "MSGRELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/msgrelay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Message store URL (`memory:`, `sqlite::memory:` or `sqlite://<path>`).
    #[arg(long, env = "MSGRELAY_STORE_URL")]
    pub store_url: Option<String>,

    /// Bound on each store operation, in milliseconds.
    #[arg(long)]
    pub store_timeout_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error; default: info).
    #[arg(long, env = "MSGRELAY_LOG")]
    pub log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Message store URL.
    pub store_url: String,
    /// Bound on each store operation.
    pub store_timeout: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, if no store URL is configured anywhere, or if the store
    /// timeout is zero.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Result<Self, ConfigError> {
        let store_url = cli
            .store_url
            .clone()
            .or_else(|| file.server.store_url.clone())
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingStoreUrl)?;

        let store_timeout_ms = cli
            .store_timeout_ms
            .or(file.server.store_timeout_ms)
            .unwrap_or(DEFAULT_STORE_TIMEOUT_MS);
        if store_timeout_ms == 0 {
            return Err(ConfigError::ZeroStoreTimeout);
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            store_url,
            store_timeout: Duration::from_millis(store_timeout_ms),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.server.log_level.clone())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("msgrelay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
