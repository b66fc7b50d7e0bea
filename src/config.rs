//! Configuration for the BleepStore S3 server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Region reported for every bucket and used in credential scopes
    #[serde(default = "default_region")]
    pub region: String,

    /// Root directory for object and part bytes
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Path of the SQLite metadata database
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,

    /// Maximum object (and per-part) size in bytes
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Accepted difference between request and server clocks, in seconds
    #[serde(default = "default_clock_skew_tolerance")]
    pub clock_skew_tolerance_secs: i64,

    /// Single-tenant owner identity and signing credential
    #[serde(default)]
    pub owner: OwnerConfig,

    /// Observability toggles
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// The configured single-tenant owner. Every bucket and object is attributed
/// to this identity; its credential is seeded into the metadata store at
/// startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerConfig {
    #[serde(default = "default_access_key_id")]
    pub access_key_id: String,

    #[serde(default = "default_secret_access_key")]
    pub secret_access_key: String,

    #[serde(default = "default_access_key_id")]
    pub display_name: String,
}

/// Observability toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Serve `/metrics` and record per-request metrics
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Deep `/health` and `/readyz` probes (metadata + storage checks)
    #[serde(default = "default_true")]
    pub health_check: bool,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9011".parse().expect("valid default listen addr")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./bleepstore.db")
}

fn default_max_object_size() -> u64 {
    5 * 1024 * 1024 * 1024 // 5 GiB
}

fn default_clock_skew_tolerance() -> i64 {
    15 * 60
}

fn default_access_key_id() -> String {
    "bleepstore".to_string()
}

fn default_secret_access_key() -> String {
    "bleepstore-secret".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            access_key_id: default_access_key_id(),
            secret_access_key: default_secret_access_key(),
            display_name: default_access_key_id(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            region: default_region(),
            data_dir: default_data_dir(),
            metadata_path: default_metadata_path(),
            max_object_size: default_max_object_size(),
            clock_skew_tolerance_secs: default_clock_skew_tolerance(),
            owner: OwnerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Config {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from defaults plus environment variables.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `BLEEPSTORE_*` environment overrides in place.
    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("BLEEPSTORE_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                self.listen_addr = parsed;
            }
        }
        if let Ok(region) = std::env::var("BLEEPSTORE_REGION") {
            self.region = region;
        }
        if let Ok(dir) = std::env::var("BLEEPSTORE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("BLEEPSTORE_METADATA_PATH") {
            self.metadata_path = PathBuf::from(path);
        }
        if let Ok(size) = std::env::var("BLEEPSTORE_MAX_OBJECT_SIZE") {
            if let Ok(parsed) = size.parse() {
                self.max_object_size = parsed;
            }
        }
        if let Ok(skew) = std::env::var("BLEEPSTORE_CLOCK_SKEW_TOLERANCE_SECS") {
            if let Ok(parsed) = skew.parse() {
                self.clock_skew_tolerance_secs = parsed;
            }
        }
        if let Ok(key) = std::env::var("BLEEPSTORE_ACCESS_KEY_ID") {
            self.owner.display_name = key.clone();
            self.owner.access_key_id = key;
        }
        if let Ok(secret) = std::env::var("BLEEPSTORE_SECRET_ACCESS_KEY") {
            self.owner.secret_access_key = secret;
        }
        if let Ok(v) = std::env::var("BLEEPSTORE_METRICS") {
            self.observability.metrics = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("BLEEPSTORE_HEALTH_CHECK") {
            self.observability.health_check = v == "true" || v == "1";
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 9011);
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.max_object_size, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.clock_skew_tolerance_secs, 900);
        assert_eq!(config.owner.access_key_id, "bleepstore");
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:9100"
            region = "eu-west-2"

            [owner]
            access_key_id = "admin"
            secret_access_key = "hunter2"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.region, "eu-west-2");
        assert_eq!(config.owner.access_key_id, "admin");
        // Unspecified fields keep their defaults.
        assert_eq!(config.metadata_path, PathBuf::from("./bleepstore.db"));
        assert!(config.observability.health_check);
    }

    #[test]
    fn test_parse_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.owner.secret_access_key, "bleepstore-secret");
    }
}
