use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::TsuzukiError;

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub services: ServicesConfig,
}

/// Deadlines for reconciliation work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound for one full scheduled pass across all trackers.
    pub pass_timeout_secs: u64,
    /// Upper bound for a single user-triggered push.
    pub push_timeout_secs: u64,
}

impl SyncConfig {
    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub anilist: AniListConfig,
    pub mal: MalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AniListConfig {
    pub enabled: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalConfig {
    pub enabled: bool,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl AppConfig {
    /// Load config: user file (if exists) merged over built-in defaults.
    pub fn load() -> Result<Self, TsuzukiError> {
        let user_path = Self::config_path();
        if user_path.exists() {
            let user_str = std::fs::read_to_string(&user_path)?;
            Self::from_toml_over_defaults(&user_str)
        } else {
            Self::from_toml_over_defaults("")
        }
    }

    /// Parse `user` as a partial config and merge it over the built-in defaults.
    pub fn from_toml_over_defaults(user: &str) -> Result<Self, TsuzukiError> {
        let mut merged: toml::Table =
            toml::from_str(DEFAULT_CONFIG).map_err(|e| TsuzukiError::Config(e.to_string()))?;
        let overlay: toml::Table =
            toml::from_str(user).map_err(|e| TsuzukiError::Config(e.to_string()))?;
        merge_tables(&mut merged, overlay);
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| TsuzukiError::Config(e.to_string()))
    }

    /// Save current config to the user config file.
    pub fn save(&self) -> Result<(), TsuzukiError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TsuzukiError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Path to user config file (XDG on Linux, AppData on Windows).
    pub fn config_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Directory holding the database and log files.
    pub fn data_dir() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Path to the database file.
    pub fn db_path() -> PathBuf {
        Self::data_dir().join("tsuzuki.db")
    }

    /// Ensure the data directory exists and return the DB path.
    pub fn ensure_db_path() -> Result<PathBuf, TsuzukiError> {
        let path = Self::db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "tsuzuki")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_t)), toml::Value::Table(over_t)) => {
                merge_tables(base_t, over_t);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = AppConfig::default();
        assert_eq!(config.sync.pass_timeout_secs, 300);
        assert_eq!(config.sync.push_timeout(), Duration::from_secs(30));
        assert!(config.services.anilist.enabled);
        assert!(config.services.mal.client_id.is_none());
    }

    #[test]
    fn test_partial_user_config_keeps_defaults() {
        let config = AppConfig::from_toml_over_defaults(
            r#"
            [services.mal]
            client_id = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.services.mal.client_id.as_deref(), Some("abc"));
        assert!(config.services.mal.enabled);
        assert_eq!(config.sync.pass_timeout_secs, 300);
    }

    #[test]
    fn test_invalid_user_config_is_an_error() {
        let err = AppConfig::from_toml_over_defaults("[sync]\npass_timeout_secs = \"soon\"")
            .unwrap_err();
        assert!(matches!(err, TsuzukiError::Config(_)));
    }

    #[test]
    fn test_roundtrip() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.sync.push_timeout_secs,
            config.sync.push_timeout_secs
        );
    }
}
