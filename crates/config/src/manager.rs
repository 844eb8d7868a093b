//! Configuration manager - main API for config operations

use crate::persistence::ConfigPersistence;
use crate::{
    Config, ConfigError, ConfigResult, ConflictPolicy, LogLevel, MissingRemoteStrategy,
};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::str::FromStr;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Main configuration manager
///
/// Resolves the config file location and wraps load/save/validate.
pub struct ConfigManager {
    persistence: ConfigPersistence,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Creates a config manager using the platform config directory
    ///
    /// - Linux: `~/.config/mirrorsync/`
    /// - macOS: `~/Library/Application Support/mirrorsync/`
    /// - Windows: `%APPDATA%\mirrorsync\`
    pub fn new() -> ConfigResult<Self> {
        let config_dir = Self::default_config_dir()?;
        Self::with_directory(config_dir)
    }

    /// Creates a config manager with a custom config directory
    pub fn with_directory(config_dir: PathBuf) -> ConfigResult<Self> {
        let persistence = ConfigPersistence::new(config_dir.join(CONFIG_FILE_NAME));

        Ok(Self {
            persistence,
            config_dir,
        })
    }

    fn default_config_dir() -> ConfigResult<PathBuf> {
        ProjectDirs::from("", "", "mirrorsync")
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::PathResolutionError {
                reason: "Could not determine user config directory".to_string(),
            })
    }

    /// Returns the config directory path
    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    /// Returns the full config file path
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Resolves `app.state_path` against the config directory
    pub fn state_path(&self, config: &Config) -> PathBuf {
        if config.app.state_path.is_absolute() {
            config.app.state_path.clone()
        } else {
            self.config_dir.join(&config.app.state_path)
        }
    }

    /// Loads the configuration from file (defaults if the file is missing)
    pub fn load(&self) -> ConfigResult<Config> {
        self.persistence.load()
    }

    /// Loads the configuration, falling back to defaults on any error
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config: {}, using defaults", e);
                Config::default()
            }
        }
    }

    /// Validates and atomically saves the configuration
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        self.persistence.save(config)
    }

    /// Loads, applies `update_fn`, and saves the result
    pub fn update<F>(&self, update_fn: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.load()?;
        update_fn(&mut config);
        self.save(&config)
    }

    /// Writes a default config file if none exists
    ///
    /// Returns Ok(true) if a new file was created.
    pub fn initialize(&self) -> ConfigResult<bool> {
        if self.config_path().exists() {
            log::info!(
                "Config file already exists at {}",
                self.config_path().display()
            );
            return Ok(false);
        }

        self.persistence.save(&Config::default())?;
        log::info!("Generated default config at {}", self.config_path().display());
        Ok(true)
    }

    /// Overwrites the config file with defaults
    pub fn reset(&self) -> ConfigResult<()> {
        self.save(&Config::default())
    }

    /// Validates the current config file, returning every problem found
    pub fn validate(&self) -> ConfigResult<Vec<String>> {
        let config = self.load()?;

        match config.validate() {
            Ok(()) => Ok(Vec::new()),
            Err(errors) => Ok(errors.iter().map(|e| e.to_string()).collect()),
        }
    }

    /// Loads the config and applies `MIRRORSYNC_SECTION_FIELD` overrides
    ///
    /// Recognised variables: `MIRRORSYNC_SYNC_INTERVAL_SECS`,
    /// `MIRRORSYNC_SYNC_CONFLICT_POLICY`, `MIRRORSYNC_SYNC_MISSING_REMOTE`,
    /// `MIRRORSYNC_APP_STATE_PATH`, `MIRRORSYNC_APP_LOG_LEVEL`.
    pub fn load_with_env_overrides(&self) -> ConfigResult<Config> {
        let mut config = self.load()?;

        if let Some(secs) = env_override("MIRRORSYNC_SYNC_INTERVAL_SECS", |v| v.parse().ok())? {
            config.sync.interval_secs = secs;
        }

        if let Some(policy) =
            env_override("MIRRORSYNC_SYNC_CONFLICT_POLICY", |v| ConflictPolicy::from_str(v).ok())?
        {
            config.sync.conflict_policy = policy;
        }

        if let Some(strategy) = env_override("MIRRORSYNC_SYNC_MISSING_REMOTE", |v| {
            MissingRemoteStrategy::from_str(v).ok()
        })? {
            config.sync.missing_remote = strategy;
        }

        if let Some(level) = env_override("MIRRORSYNC_APP_LOG_LEVEL", LogLevel::parse)? {
            config.app.log_level = level;
        }

        if let Ok(path) = std::env::var("MIRRORSYNC_APP_STATE_PATH") {
            config.app.state_path = PathBuf::from(path);
        }

        if let Err(errors) = config.validate() {
            log::warn!(
                "Config validation warnings after env overrides: {:?}",
                errors
            );
        }

        Ok(config)
    }
}

/// Reads and parses one override; unset is `None`, unparseable is an error
fn env_override<T>(var: &str, parse: impl Fn(&str) -> Option<T>) -> ConfigResult<Option<T>> {
    match std::env::var(var) {
        Ok(value) => parse(&value)
            .map(Some)
            .ok_or_else(|| ConfigError::EnvOverrideError {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
