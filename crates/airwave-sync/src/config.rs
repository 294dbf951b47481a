//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     AIRWAVE_SYNC_MODE=public_only                                      │
//! │     AIRWAVE_DB_PATH=/tmp/airwave.db                                    │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/airwave/sync.toml (Linux)                                │
//! │     ~/Library/Application Support/io.airwave.airwave/sync.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Full, 4 lanes, 5 minute poll                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [database]
//! path = "/home/me/.local/share/airwave/airwave.db"
//!
//! [sync]
//! mode = "full"  # full | public_only | offline
//! max_concurrent_operations = 4
//! poll_interval_secs = 300
//! save_batch_size = 400
//!
//! [container]
//! identifier = "iCloud.io.airwave"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Mode
// =============================================================================

/// Which database scopes this process synchronizes.
///
/// ## Mode Selection
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  FULL (Default)      public query + private zones, subscriptions, push │
/// │  PUBLIC_ONLY         public query only (no signed-in account)          │
/// │  OFFLINE             nothing leaves the machine                        │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Public and private scopes.
    #[default]
    Full,

    /// Public scope only.
    PublicOnly,

    /// Sync disabled - local operations only.
    Offline,
}

impl SyncMode {
    /// Returns true if sync is enabled at all.
    pub fn is_sync_enabled(&self) -> bool {
        !matches!(self, SyncMode::Offline)
    }

    /// Returns true if the private scope is synchronized.
    pub fn syncs_private(&self) -> bool {
        matches!(self, SyncMode::Full)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::PublicOnly => write!(f, "public_only"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" | "all" => Ok(SyncMode::Full),
            "public_only" | "public" => Ok(SyncMode::PublicOnly),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: full, public_only, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Where the local store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path of the SQLite file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("io", "airwave", "airwave")
        .map(|dirs| dirs.data_dir().join("airwave.db"))
        .unwrap_or_else(|| PathBuf::from("airwave.db"))
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
        }
    }
}

// =============================================================================
// Container Settings
// =============================================================================

/// Remote container identity, passed through to gateway implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    #[serde(default = "default_container_identifier")]
    pub identifier: String,
}

fn default_container_identifier() -> String {
    "iCloud.io.airwave".to_string()
}

impl Default for ContainerSettings {
    fn default() -> Self {
        ContainerSettings {
            identifier: default_container_identifier(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Scopes to synchronize.
    #[serde(default)]
    pub mode: SyncMode,

    /// Parallel lanes of the operation graph executor.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_operations: usize,

    /// Interval between periodic resyncs (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Records per save/delete request.
    #[serde(default = "default_save_batch_size")]
    pub save_batch_size: usize,

    /// Page size hint for change feeds and queries.
    #[serde(default = "default_fetch_page_size")]
    pub fetch_page_size: usize,
}

fn default_max_concurrent() -> usize {
    4
}
fn default_poll_interval() -> u64 {
    300
}
fn default_save_batch_size() -> usize {
    400
}
fn default_fetch_page_size() -> usize {
    200
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            max_concurrent_operations: default_max_concurrent(),
            poll_interval_secs: default_poll_interval(),
            save_batch_size: default_save_batch_size(),
            fetch_page_size: default_fetch_page_size(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub container: ContainerSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.max_concurrent_operations == 0 {
            return Err(SyncError::InvalidConfig(
                "max_concurrent_operations must be greater than 0".into(),
            ));
        }

        if self.sync.save_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "save_batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("AIRWAVE_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Ok(path) = std::env::var("AIRWAVE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(lanes) = std::env::var("AIRWAVE_MAX_CONCURRENCY") {
            if let Ok(n) = lanes.parse::<usize>() {
                self.sync.max_concurrent_operations = n;
            }
        }

        if let Ok(secs) = std::env::var("AIRWAVE_POLL_INTERVAL_SECS") {
            if let Ok(n) = secs.parse::<u64>() {
                self.sync.poll_interval_secs = n;
            }
        }

        if let Ok(id) = std::env::var("AIRWAVE_CONTAINER_ID") {
            self.container.identifier = id;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "airwave", "airwave")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the sync mode.
    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    /// Returns true if sync is enabled.
    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    /// Returns the periodic resync interval.
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("full".parse::<SyncMode>().unwrap(), SyncMode::Full);
        assert_eq!("PUBLIC_ONLY".parse::<SyncMode>().unwrap(), SyncMode::PublicOnly);
        assert_eq!("offline".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert!("primary".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.mode(), SyncMode::Full);
        assert_eq!(config.sync.max_concurrent_operations, 4);
        assert_eq!(config.sync.save_batch_size, 400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();
        config.sync.max_concurrent_operations = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        config.sync.max_concurrent_operations = 2;
        config.sync.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_scopes() {
        assert!(SyncMode::Full.syncs_private());
        assert!(!SyncMode::PublicOnly.syncs_private());
        assert!(SyncMode::PublicOnly.is_sync_enabled());
        assert!(!SyncMode::Offline.is_sync_enabled());
    }

    #[test]
    fn test_toml_round_trip_with_partial_file() {
        let parsed: SyncConfig = toml::from_str(
            r#"
            [sync]
            mode = "public_only"
            poll_interval_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(parsed.mode(), SyncMode::PublicOnly);
        assert_eq!(parsed.sync.poll_interval_secs, 60);
        assert_eq!(parsed.sync.save_batch_size, 400);

        let toml_str = toml::to_string_pretty(&parsed).unwrap();
        assert!(toml_str.contains("[sync]"));
        assert!(toml_str.contains("[container]"));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("airwave-test-{}", uuid::Uuid::new_v4()))
            .join("sync.toml");

        let mut config = SyncConfig::default();
        config.sync.save_batch_size = 50;
        config.save(Some(path.clone())).unwrap();

        let loaded: SyncConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.sync.save_batch_size, 50);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
