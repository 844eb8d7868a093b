//! MirrorSync configuration system
//!
//! Sectioned TOML configuration for the sync engine and its host binary.
//!
//! # Architecture
//!
//! - **Trait-based**: each section implements `ConfigSection` (validate, merge)
//! - **Graceful degradation**: invalid files load with warnings; saving refuses them
//! - **Atomic writes**: config files are written to a temp file and renamed
//!
//! # Example
//!
//! ```rust,no_run
//! use mirrorsync_config::{Config, ConfigManager};
//!
//! let manager = ConfigManager::new().expect("Failed to initialize config");
//! let config = manager.load_or_default();
//! println!("Sync every {}s", config.sync.interval_secs);
//! ```

mod error;
mod manager;
mod persistence;
mod validation;

pub mod app_config;
pub mod sync_config;

pub use error::{ConfigError, ConfigResult, ValidationError};
pub use manager::ConfigManager;
pub use validation::{ConfigSection, Validator};

pub use app_config::{AppConfig, LogLevel};
pub use sync_config::{ConflictPolicy, MissingRemoteStrategy, SyncConfig};

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Config file format version
    pub version: u32,

    /// Host application settings
    pub app: AppConfig,

    /// Sync engine settings
    pub sync: SyncConfig,
}

impl Config {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates every section, returning all errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.app.validate() {
            errors.append(&mut e);
        }

        if let Err(mut e) = self.sync.validate() {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merges another config into this one, preferring values from `other`
    pub fn merge(&mut self, other: Config) {
        self.app.merge(other.app);
        self.sync.merge(other.sync);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            app: AppConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_version_is_set() {
        assert_eq!(Config::new().version, CONFIG_VERSION);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.sync.interval_secs = 90;
        other.sync.conflict_policy = ConflictPolicy::RemoteWins;

        base.merge(other);
        assert_eq!(base.sync.interval_secs, 90);
        assert_eq!(base.sync.conflict_policy, ConflictPolicy::RemoteWins);
    }

    #[test]
    fn test_errors_collected_across_sections() {
        let mut config = Config::default();
        config.sync.interval_secs = 0;
        config.app.state_path = std::path::PathBuf::new();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
