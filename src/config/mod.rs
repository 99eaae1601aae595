//! # Configuration
//!
//! TOML configuration for the mudd service, with defaults for every section
//! and a small set of environment overrides.
//!
//! ```toml
//! [bot]
//! name = "MUDD"
//! console_channel = "console"
//!
//! [sync]
//! frequency = "15min"   # "5min", "15min", "30min", "1hour" or "off"
//!
//! [world]
//! dir = "data/worlds"
//!
//! [storage]
//! data_dir = "./data"
//! # db_path = "./data/mudd.db"
//!
//! [platform]
//! snapshot = "./data/platform.json"
//!
//! [logging]
//! level = "info"
//! file = "mudd.log"
//! ```
//!
//! Precedence: CLI args > environment > config file > defaults. The
//! environment variables are `MUDD_CONSOLE_CHANNEL`, `MUDD_WORLD_DIR` and
//! `MUDD_DATA_DIR`.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::service::{ServiceOptions, SyncFrequency};

pub const ENV_CONSOLE_CHANNEL: &str = "MUDD_CONSOLE_CHANNEL";
pub const ENV_WORLD_DIR: &str = "MUDD_WORLD_DIR";
pub const ENV_DATA_DIR: &str = "MUDD_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub name: String,
    /// Text channel that receives orphan-channel reports.
    #[serde(default = "default_console_channel")]
    pub console_channel: String,
}

fn default_console_channel() -> String {
    "console".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "MUDD".to_string(),
            console_channel: default_console_channel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub frequency: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frequency: "15min".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parsed frequency; unknown values fall back to every 15 minutes.
    pub fn frequency(&self) -> SyncFrequency {
        self.frequency.parse().unwrap_or_else(|e| {
            warn!("{}, defaulting to 15min", e);
            SyncFrequency::default()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Directory holding the `*.rec` world files.
    pub dir: String,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            dir: "./data/worlds".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Override for the sled database path; defaults to `<data_dir>/mudd.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            db_path: None,
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("mudd.db"),
        }
    }
}

/// The offline adapter's guild snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub snapshot: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            snapshot: "./data/platform.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("mudd.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file, then apply environment overrides.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    /// Apply overrides looked up through `lookup`; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(channel) = get(ENV_CONSOLE_CHANNEL) {
            self.bot.console_channel = channel;
        }
        if let Some(dir) = get(ENV_WORLD_DIR) {
            self.world.dir = dir;
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            self.storage.data_dir = dir;
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            world_dir: PathBuf::from(&self.world.dir),
            console_channel: self.bot.console_channel.clone(),
            frequency: self.sync.frequency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bot.console_channel, "console");
        assert_eq!(config.sync.frequency(), SyncFrequency::Every15Minutes);
        assert_eq!(config.storage.db_path(), PathBuf::from("./data").join("mudd.db"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            "[sync]\nfrequency = \"off\"\n\n[storage]\ndata_dir = \"/srv/mudd\"\ndb_path = \"/srv/db\"\n",
        )
        .unwrap();
        assert_eq!(config.sync.frequency(), SyncFrequency::Disabled);
        assert_eq!(config.storage.db_path(), PathBuf::from("/srv/db"));
        assert_eq!(config.world.dir, "./data/worlds");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_frequency_defaults() {
        let sync = SyncConfig {
            frequency: "fortnightly".to_string(),
        };
        assert_eq!(sync.frequency(), SyncFrequency::Every15Minutes);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_CONSOLE_CHANNEL, "bot-log"),
            (ENV_WORLD_DIR, "/etc/mudd/worlds"),
            (ENV_DATA_DIR, "  "),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.bot.console_channel, "bot-log");
        assert_eq!(config.world.dir, "/etc/mudd/worlds");
        assert_eq!(config.storage.data_dir, "./data");

        let options = config.service_options();
        assert_eq!(options.console_channel, "bot-log");
        assert_eq!(options.world_dir, PathBuf::from("/etc/mudd/worlds"));
    }

    #[tokio::test]
    async fn test_round_trip_through_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        let path = path.to_str().expect("utf-8 path");
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.bot.name, "MUDD");
        assert_eq!(loaded.platform.snapshot, "./data/platform.json");
    }
}
