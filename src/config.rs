use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub input: InputConfig,
}

impl Config {
    /// Load configuration from file or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;
        Ok(())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".config/deckcore/config.toml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device brightness (0-100)
    pub brightness: u8,
    /// Seconds between keepalive packets while connected
    pub keepalive_secs: u64,
    /// Seconds between reconnect attempts after a connection error
    pub reconnect_secs: u64,
    /// Retry forever after errors instead of giving up
    pub auto_reconnect: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            brightness: 80,
            keepalive_secs: 10,
            reconnect_secs: 2,
            auto_reconnect: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Hold duration that counts as a long press, in milliseconds
    pub long_press_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            long_press_ms: 2000,
        }
    }
}
