//! Configuration types for the cadence primitives.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum run-history entries kept in memory and persisted.
    pub history_limit: usize,
    /// Where to persist task runtime state and run history. `None` disables
    /// persistence.
    pub state_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            history_limit: crate::scheduler::runner::DEFAULT_HISTORY_LIMIT,
            state_path: None,
        }
    }
}

impl CadenceConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::CadenceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot
    /// be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/cadence/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("cadence").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("cadence")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/cadence-config/config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CadenceConfig::default();
        assert!(config.scheduler.history_limit > 0);
        assert!(config.scheduler.state_path.is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = CadenceConfig::default();
        config.scheduler.history_limit = 25;
        config.scheduler.state_path = Some(PathBuf::from("/var/lib/cadence/state.json"));
        config.save_to_file(&path).unwrap();

        let loaded = CadenceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.scheduler.history_limit, 25);
        assert_eq!(
            loaded.scheduler.state_path.as_deref(),
            Some(std::path::Path::new("/var/lib/cadence/state.json"))
        );
    }

    #[test]
    fn partial_toml_uses_defaults_for_missing_fields() {
        let config: CadenceConfig = toml::from_str("[scheduler]\nhistory_limit = 10\n").unwrap();
        assert_eq!(config.scheduler.history_limit, 10);
        assert!(config.scheduler.state_path.is_none());
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: CadenceConfig = toml::from_str("").unwrap();
        assert_eq!(
            config.scheduler.history_limit,
            CadenceConfig::default().scheduler.history_limit
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CadenceConfig::from_file(&dir.path().join("absent.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = CadenceConfig::default_config_path();
        assert!(path.ends_with("config.toml") || path.to_string_lossy().contains("config.toml"));
    }
}
