use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::geolocation::CachePolicy;

/// Errors that can occur while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Configuration for the sshwatch daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Tailed file configuration
    pub watch: WatchConfig,
    /// Replay suppression configuration
    pub freshness: FreshnessConfig,
    /// Geolocation configuration
    pub geo: GeoConfig,
    /// Webhook configuration
    pub alert: AlertConfig,
}

/// Tailed file configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Path to the auth log
    pub file_path: PathBuf,
    /// Skip the existing contents of the file on the first open
    pub start_at_end: bool,
    /// Watch the containing directory recursively
    pub recursive: bool,
}

/// Replay suppression configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Events older than this many seconds are not alerted on
    pub window_seconds: i64,
}

/// Which geolocation provider to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeoProvider {
    IpApi,
    #[serde(rename = "maxmind")]
    MaxMind,
}

/// Cache policy as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CachePolicyConfig {
    Permanent,
    ExpireUnknown { after_secs: u64 },
}

impl From<CachePolicyConfig> for CachePolicy {
    fn from(config: CachePolicyConfig) -> Self {
        match config {
            CachePolicyConfig::Permanent => CachePolicy::Permanent,
            CachePolicyConfig::ExpireUnknown { after_secs } => {
                CachePolicy::ExpireUnknownAfter(Duration::from_secs(after_secs))
            }
        }
    }
}

/// Geolocation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub provider: GeoProvider,
    /// Base URL of the ip-api.com compatible service
    pub endpoint: String,
    /// Language of returned names
    pub lang: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// GeoLite2-City database (if provider is "maxmind")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    pub cache_policy: CachePolicyConfig,
}

/// Webhook configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Base URL of the robot webhook
    pub webhook_url: String,
    /// Robot key, usually given on the command line instead
    pub token: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            file_path: PathBuf::from("/var/log/auth.log"),
            start_at_end: false,
            recursive: false,
        }
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        FreshnessConfig { window_seconds: 60 }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        GeoConfig {
            provider: GeoProvider::IpApi,
            endpoint: "http://ip-api.com".to_string(),
            lang: "zh-cn".to_string(),
            timeout_secs: 5,
            database_path: None,
            cache_policy: CachePolicyConfig::Permanent,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            webhook_url: "https://qyapi.weixin.qq.com".to_string(),
            token: String::new(),
            timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but make no sense
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.freshness.window_seconds < 0 {
            return Err(ConfigError::Invalid {
                field: "freshness.window_seconds",
                reason: format!("{} is negative", self.freshness.window_seconds),
            });
        }
        Ok(())
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
