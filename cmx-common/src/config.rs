//! Configuration file resolution, TOML loading and logging setup
//!
//! Config file resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/cmx/config.toml` on Linux)
//! 4. Built-in defaults (no file)
//!
//! A missing config file is never fatal: callers fall back to defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CMX_CONFIG";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error, or `cmx_analysis=debug`)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolves which config file (if any) should be read
pub struct ConfigPathResolver {
    env_var_name: String,
    file_name: String,
}

impl ConfigPathResolver {
    /// Create a resolver reading `CMX_CONFIG` and `<config_dir>/cmx/config.toml`
    pub fn new() -> Self {
        Self {
            env_var_name: CONFIG_ENV_VAR.to_string(),
            file_name: "config.toml".to_string(),
        }
    }

    /// Override the environment variable consulted (used by tests)
    pub fn with_env_var(mut self, env_var_name: impl Into<String>) -> Self {
        self.env_var_name = env_var_name.into();
        self
    }

    /// Resolve the config path.
    ///
    /// Returns `None` when no explicit path is given and no per-user config file exists.
    pub fn resolve(&self, cli_arg: Option<&Path>) -> Option<PathBuf> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return Some(path.to_path_buf());
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(&self.env_var_name) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        // Priority 3: Per-user config file
        let user_config = dirs::config_dir().map(|d| d.join("cmx").join(&self.file_name));
        match user_config {
            Some(path) if path.exists() => Some(path),
            _ => None,
        }
    }
}

impl Default for ConfigPathResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Default location for the analysis database when the config does not name one
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cmx").join("analysis.db"))
        .unwrap_or_else(|| PathBuf::from("./cmx_data/analysis.db"))
}

/// Load a TOML config file, falling back to `T::default()` when `path` is `None`
/// or the file does not exist.
///
/// A file that exists but fails to parse is an error.
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using built-in defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Write a config atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = target.with_extension("toml.tmp");
    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    if let Err(e) = std::fs::rename(&temp_path, target) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", logging.level, e)))?;

    let result = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Tracing init failed: {}", e)))
}
