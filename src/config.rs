//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILCATCH_CONFIG` (environment variable)
//! 2. `~/.config/mailcatch/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailcatch\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name of the log file written into the cache directory.
pub const LOG_FILE_NAME: &str = "mailcatch.log";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Where messages are stored.
    pub storage: StorageConfig,
    /// Pagination defaults for message listing.
    pub listing: ListingConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Message storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one `.eml` file per captured message.
    pub message_dir: Option<PathBuf>,
}

/// Pagination defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Page size used when the caller asks for `limit = 0`.
    pub default_limit: usize,
    /// Upper bound applied to any requested page size.
    pub max_limit: usize,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Read buffer size in bytes (default: 131072 = 128 KB).
    pub read_buffer_size: usize,
    /// Maximum message size in bytes (default: 268435456 = 256 MB).
    pub max_message_size: u64,
    /// Number of list summaries kept in the LRU cache.
    pub summary_cache_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 128 * 1024,        // 128 KB
            max_message_size: 256 * 1024 * 1024, // 256 MB
            summary_cache_size: 512,
        }
    }
}

impl ListingConfig {
    /// Clamp a caller-supplied page size into `1..=max_limit`.
    ///
    /// `0` means "not given" and selects the default.
    pub fn clamp_limit(&self, limit: usize) -> usize {
        let max = self.max_limit.max(1);
        if limit == 0 {
            self.default_limit.clamp(1, max)
        } else {
            limit.min(max)
        }
    }
}

// ── Load ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILCATCH_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailcatch").join("config.toml"))
}

/// Return the directory messages are stored in.
pub fn message_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.storage.message_dir {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailcatch")
        .join("messages")
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailcatch")
}
