// ABOUTME: Top-level parley configuration parsed from TOML with environment variable overrides.
// ABOUTME: Loaded once at startup and passed by value into the gateway and adapters.

use crate::paths;
use anyhow::{Context, Result};
use parley_agent::{BackendKind, BackendsConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG_PATH";
/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "parley.toml";
/// Updates buffered per gateway subscriber before the slowest one lags
pub const DEFAULT_UPDATE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path; the XDG data dir is used when unset
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Window in which a repeated create_session returns the fresh session
    #[serde(default = "default_session_debounce_ms")]
    pub session_debounce_ms: u64,
    /// Per-subscriber update buffer; a consumer further behind loses the oldest
    #[serde(default = "default_update_capacity")]
    pub update_capacity: usize,
}

fn default_session_debounce_ms() -> u64 {
    750
}

fn default_update_capacity() -> usize {
    DEFAULT_UPDATE_CAPACITY
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session_debounce_ms: default_session_debounce_ms(),
            update_capacity: default_update_capacity(),
        }
    }
}

impl Config {
    /// Find the config file, checking in order:
    /// 1. PARLEY_CONFIG_PATH (if set and present)
    /// 2. ./parley.toml
    /// 3. ~/.config/parley/config.toml
    pub fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "{} points at a missing file", CONFIG_PATH_ENV);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        let xdg = paths::config_file();
        if xdg.exists() {
            return Some(xdg);
        }

        None
    }

    /// Load from the first config file found, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration from file");
                Self::from_file(&path)?
            }
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    /// Apply `PARLEY_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("PARLEY_STORAGE_PATH") {
            self.storage.path = Some(val);
        }
        if let Some(val) = lookup("PARLEY_SYNC_ENABLED") {
            let enabled = parse_bool("PARLEY_SYNC_ENABLED", &val)?;
            self.backends
                .synchronous
                .get_or_insert_with(Default::default)
                .enabled = enabled;
        }
        if let Some(val) = lookup("PARLEY_BYTE_STREAM_ENABLED") {
            let enabled = parse_bool("PARLEY_BYTE_STREAM_ENABLED", &val)?;
            self.backends
                .byte_stream
                .get_or_insert_with(Default::default)
                .enabled = enabled;
        }
        // Applied last so it lands on the variant the flags above selected
        if let Some(val) = lookup("PARLEY_BACKEND_ENDPOINT") {
            if let Ok(kind) = self.backends.select() {
                if kind == BackendKind::TracedStreaming {
                    self.backends
                        .traced_streaming
                        .get_or_insert_with(Default::default);
                }
                if let Some(connection) = self.backends.connection_mut(kind) {
                    connection.endpoint = Some(val);
                }
            }
        }
        Ok(())
    }

    /// Resolved database path with `~` expanded
    pub fn storage_path(&self) -> PathBuf {
        match self.storage.path.as_deref() {
            Some(path) if !path.trim().is_empty() => PathBuf::from(paths::expand_tilde(path.trim())),
            _ => paths::store_file(),
        }
    }

    pub fn session_debounce(&self) -> Duration {
        Duration::from_millis(self.gateway.session_debounce_ms)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} must be a boolean, got: {}", key, value),
    }
}
