//! Configuration loader
//!
//! Loads application configuration from a file and environment variables.
//!
//! ## Loading Strategy
//! 1. Read `.env` into the process environment (when present)
//! 2. Start from the given file, a discovered file, or built-in defaults
//! 3. Apply `OFFSYNC_*` environment overrides
//! 4. Validate the result
//!
//! ## Environment Variables
//! - `OFFSYNC_DATABASE_PATH`: Queue database file path
//! - `OFFSYNC_LOCAL_DATABASE_PATH`: Database holding the local entity tables
//! - `OFFSYNC_POOL_SIZE`: Connection pool size
//! - `OFFSYNC_REMOTE_URL`: Remote API base URL
//! - `OFFSYNC_API_TOKEN`: Bearer token for the remote API
//! - `OFFSYNC_REMOTE_TIMEOUT_SECS`: Per-request timeout
//! - `OFFSYNC_DISPATCH_INTERVAL_SECS`: Seconds between dispatch cycles
//! - `OFFSYNC_RECONCILE_INTERVAL_SECS`: Seconds between reconcile passes
//! - `OFFSYNC_LOG_LEVEL`: Default log filter when `RUST_LOG` is unset
//! - `OFFSYNC_LOG_JSON`: Emit JSON log lines (true/false)
//!
//! ## File Locations
//! The loader searches `offsync.{toml,json}` then `config.{toml,json}` in the
//! current directory, then next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use offsync_domain::{AppConfig, OffsyncError, Result};

const CONFIG_FILE_NAMES: [&str; 4] = ["offsync.toml", "offsync.json", "config.toml", "config.json"];

/// Load configuration with the full layering strategy
///
/// # Errors
/// Returns `OffsyncError::Config` if an explicit file is missing, a file or
/// variable cannot be parsed, or the merged configuration is invalid.
pub fn load(path: Option<PathBuf>) -> Result<AppConfig> {
    if let Ok(env_file) = dotenvy::dotenv() {
        tracing::debug!(path = %env_file.display(), "Loaded .env file");
    }

    let mut config = match path.or_else(discover_config_path) {
        Some(path) => load_from_file(Some(path))?,
        None => {
            tracing::debug!("No config file found, using defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from defaults and environment variables only
///
/// # Errors
/// Returns `OffsyncError::Config` if a variable has an invalid value.
pub fn load_from_env() -> Result<AppConfig> {
    let mut config = AppConfig::default();
    apply_env_overrides(&mut config)?;
    config.validate()?;
    tracing::info!("Configuration loaded from environment variables");
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, searches the standard locations. Supports JSON and
/// TOML formats (detected by file extension). Omitted fields keep their
/// defaults.
///
/// # Errors
/// Returns `OffsyncError::Config` if the file is missing or malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<AppConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(OffsyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => discover_config_path().ok_or_else(|| {
            OffsyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| OffsyncError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content, by file extension
fn parse_config(contents: &str, path: &Path) -> Result<AppConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| OffsyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| OffsyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(OffsyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations
pub fn discover_config_path() -> Option<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) =
        std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Overlay `OFFSYNC_*` variables onto `config`
fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Some(path) = env_string("OFFSYNC_DATABASE_PATH") {
        config.database.path = PathBuf::from(path);
    }
    if let Some(path) = env_string("OFFSYNC_LOCAL_DATABASE_PATH") {
        config.database.local_path = Some(PathBuf::from(path));
    }
    if let Some(size) = env_parse("OFFSYNC_POOL_SIZE")? {
        config.database.pool_size = size;
    }
    if let Some(url) = env_string("OFFSYNC_REMOTE_URL") {
        config.remote.base_url = url;
    }
    if let Some(token) = env_string("OFFSYNC_API_TOKEN") {
        config.remote.api_token = Some(token);
    }
    if let Some(secs) = env_parse("OFFSYNC_REMOTE_TIMEOUT_SECS")? {
        config.remote.timeout_secs = secs;
    }
    if let Some(secs) = env_parse("OFFSYNC_DISPATCH_INTERVAL_SECS")? {
        config.dispatch.interval_secs = secs;
    }
    if let Some(secs) = env_parse("OFFSYNC_RECONCILE_INTERVAL_SECS")? {
        config.reconcile.interval_secs = secs;
    }
    if let Some(level) = env_string("OFFSYNC_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("OFFSYNC_LOG_JSON", config.logging.json);
    Ok(())
}

/// Non-empty environment variable
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable, `None` when unset
///
/// # Errors
/// Returns `OffsyncError::Config` when the value does not parse.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| OffsyncError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
