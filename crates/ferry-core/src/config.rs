//! Configuration system for Ferry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ferry/config.toml
//!   3. ~/.config/ferry/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bytes per megabyte as used by the bandwidth setting.
pub const BYTES_PER_MB: u64 = 1_000_000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Close a connection once the catalog reports this many chunks in flight.
    pub max_chunks_being_transferred: i64,
    /// Byte rate granted to best-effort fetches, in MB/s.
    pub available_bandwidth_mbps: u64,
    /// Quota refill period for the throttle worker.
    pub tick_interval_ms: u64,
    /// Idle ticks (no best-effort submissions) before the worker retires.
    pub idle_ticks_before_stop: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_chunks_being_transferred: i64::MAX,
            available_bandwidth_mbps: 200,
            tick_interval_ms: 500,
            idle_ticks_before_stop: 60,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl TransferConfig {
    pub fn bandwidth_bytes_per_sec(&self) -> u64 {
        self.available_bandwidth_mbps.saturating_mul(BYTES_PER_MB)
    }

    /// Bytes credited to the quota each tick, rounded up.
    pub fn refill_per_tick(&self) -> i64 {
        let scaled = (self.bandwidth_bytes_per_sec() as u128) * (self.tick_interval_ms as u128);
        let refill = scaled.div_ceil(1000);
        i64::try_from(refill).unwrap_or(i64::MAX)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Idle time after which the worker stops, in milliseconds.
    pub fn idle_timeout_ms(&self) -> u64 {
        self.tick_interval_ms
            .saturating_mul(self.idle_ticks_before_stop as u64)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".into()));
        }
        if self.available_bandwidth_mbps == 0 {
            return Err(ConfigError::Invalid(
                "available_bandwidth_mbps must be > 0".into(),
            ));
        }
        if self.max_chunks_being_transferred <= 0 {
            return Err(ConfigError::Invalid(
                "max_chunks_being_transferred must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ferry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FerryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path(), |key| std::env::var(key).ok())
    }

    /// Load from `path` (defaults if absent), then apply `FERRY_TRANSFER__*`
    /// overrides looked up through `env`.
    pub fn load_from(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml_str(&text)
                .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            FerryConfig::default()
        };
        config.apply_env_overrides(&env);
        config.transfer.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    /// Write the default config to `path` unless a file is already there.
    pub fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&FerryConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply FERRY_TRANSFER__* overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, env: &impl Fn(&str) -> Option<String>) {
        let t = &mut self.transfer;
        if let Some(v) = env_parse(env, "FERRY_TRANSFER__MAX_CHUNKS_BEING_TRANSFERRED") {
            t.max_chunks_being_transferred = v;
        }
        if let Some(v) = env_parse(env, "FERRY_TRANSFER__AVAILABLE_BANDWIDTH_MBPS") {
            t.available_bandwidth_mbps = v;
        }
        if let Some(v) = env_parse(env, "FERRY_TRANSFER__TICK_INTERVAL_MS") {
            t.tick_interval_ms = v;
        }
        if let Some(v) = env_parse(env, "FERRY_TRANSFER__IDLE_TICKS_BEFORE_STOP") {
            t.idle_ticks_before_stop = v;
        }
    }
}

fn env_parse<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env(key).and_then(|v| v.parse().ok())
}
