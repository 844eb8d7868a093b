//! Sync engine configuration section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Longest interval accepted anywhere in this section (one day)
const MAX_INTERVAL_SECS: u64 = 86_400;

/// How a pull treats a remote record whose local copy has a pending update
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Local pending edits stay authoritative; remote values are ignored
    LocalWins,
    /// Remote values overwrite local ones and the pending edit is dropped
    RemoteWins,
    /// Merge non-overlapping fields, track overlapping ones as conflicts
    #[default]
    TryShallowMerge,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::LocalWins => write!(f, "local-wins"),
            ConflictPolicy::RemoteWins => write!(f, "remote-wins"),
            ConflictPolicy::TryShallowMerge => write!(f, "try-shallow-merge"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local-wins" => Ok(Self::LocalWins),
            "remote-wins" => Ok(Self::RemoteWins),
            "try-shallow-merge" => Ok(Self::TryShallowMerge),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

/// What to do when an update finds the server-side record gone
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MissingRemoteStrategy {
    /// Keep the local record and accept the divergence
    #[default]
    Ignore,
    /// Drop the local record to match the server
    DeleteLocalRecord,
    /// Re-create the record on the server under a fresh identity
    InsertRemoteRecord,
}

impl std::fmt::Display for MissingRemoteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingRemoteStrategy::Ignore => write!(f, "ignore"),
            MissingRemoteStrategy::DeleteLocalRecord => write!(f, "delete-local-record"),
            MissingRemoteStrategy::InsertRemoteRecord => write!(f, "insert-remote-record"),
        }
    }
}

impl FromStr for MissingRemoteStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ignore" => Ok(Self::Ignore),
            "delete-local-record" => Ok(Self::DeleteLocalRecord),
            "insert-remote-record" => Ok(Self::InsertRemoteRecord),
            other => Err(format!("unknown missing-remote strategy '{}'", other)),
        }
    }
}

/// Sync engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between scheduled sync cycles
    pub interval_secs: u64,

    /// Policy applied when a pulled record has a pending local update
    pub conflict_policy: ConflictPolicy,

    /// Strategy applied when an update reports the remote record missing
    pub missing_remote: MissingRemoteStrategy,

    /// Pause the scheduler while the host is in the background
    pub pause_in_background: bool,

    /// Start the scheduler as soon as the engine is hydrated
    pub enabled_on_start: bool,

    /// Per-collection minimum seconds between pulls
    ///
    /// A collection listed here is skipped by a cycle's pull phase until its
    /// interval has elapsed since its last successful pull.
    pub pull_intervals: BTreeMap<String, u64>,
}

impl SyncConfig {
    /// Returns the scheduler interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns the pull interval override for a collection, if any
    pub fn pull_interval(&self, collection: &str) -> Option<Duration> {
        self.pull_intervals
            .get(collection)
            .map(|secs| Duration::from_secs(*secs))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            conflict_policy: ConflictPolicy::default(),
            missing_remote: MissingRemoteStrategy::default(),
            pause_in_background: true,
            enabled_on_start: true,
            pull_intervals: BTreeMap::new(),
        }
    }
}

impl ConfigSection for SyncConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut results = vec![Validator::in_range(
            self.interval_secs,
            1,
            MAX_INTERVAL_SECS,
            "sync.interval_secs",
        )];

        for (collection, secs) in &self.pull_intervals {
            results.push(Validator::not_empty(collection, "sync.pull_intervals"));
            results.push(Validator::in_range(
                *secs,
                self.interval_secs.max(1),
                MAX_INTERVAL_SECS,
                &format!("sync.pull_intervals.{}", collection),
            ));
        }

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        self.interval_secs = other.interval_secs;
        self.conflict_policy = other.conflict_policy;
        self.missing_remote = other.missing_remote;
        self.pull_intervals.extend(other.pull_intervals);
        self.pause_in_background = other.pause_in_background;
        self.enabled_on_start = other.enabled_on_start;
    }

    fn section_name(&self) -> &'static str {
        "sync"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.conflict_policy, ConflictPolicy::TryShallowMerge);
        assert_eq!(config.missing_remote, MissingRemoteStrategy::Ignore);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = SyncConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pull_interval_shorter_than_global_rejected() {
        let mut config = SyncConfig::default();
        config.pull_intervals.insert("todos".to_string(), 5);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors[0].field, "sync.pull_intervals.todos");
    }

    #[test]
    fn test_pull_interval_lookup() {
        let mut config = SyncConfig::default();
        config.pull_intervals.insert("archive".to_string(), 600);
        assert!(config.validate().is_ok());
        assert_eq!(config.pull_interval("archive"), Some(Duration::from_secs(600)));
        assert_eq!(config.pull_interval("todos"), None);
    }

    #[test]
    fn test_policy_names_roundtrip() {
        for policy in [
            ConflictPolicy::LocalWins,
            ConflictPolicy::RemoteWins,
            ConflictPolicy::TryShallowMerge,
        ] {
            assert_eq!(policy.to_string().parse::<ConflictPolicy>(), Ok(policy));
        }
        assert!("newest-wins".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn test_strategy_names_roundtrip() {
        for strategy in [
            MissingRemoteStrategy::Ignore,
            MissingRemoteStrategy::DeleteLocalRecord,
            MissingRemoteStrategy::InsertRemoteRecord,
        ] {
            assert_eq!(
                strategy.to_string().parse::<MissingRemoteStrategy>(),
                Ok(strategy)
            );
        }
    }

    #[test]
    fn test_toml_uses_kebab_case_names() {
        let config = SyncConfig {
            conflict_policy: ConflictPolicy::RemoteWins,
            missing_remote: MissingRemoteStrategy::InsertRemoteRecord,
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("conflict_policy = \"remote-wins\""));
        assert!(text.contains("missing_remote = \"insert-remote-record\""));
    }

    #[test]
    fn test_merge_extends_pull_intervals() {
        let mut base = SyncConfig::default();
        base.pull_intervals.insert("a".to_string(), 60);
        let mut other = SyncConfig::default();
        other.pull_intervals.insert("b".to_string(), 120);

        base.merge(other);
        assert_eq!(base.pull_intervals.len(), 2);
    }
}
