//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via UARPC_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uarpc_wire::EncodingLimits;

/// Server configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Encoding and framing limits.
    pub limits: LimitsConfig,
    /// Trust store configuration.
    pub trust: TrustConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("UARPC_CONFIG") {
            config = Self::from_file(&path)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.limits.apply_env_overrides();
        self.trust.apply_env_overrides();
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", uarpc_wire::DEFAULT_PORT)
                .parse()
                .expect("default bind address"),
            max_connections: 1000,
            idle_timeout_secs: 300,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("UARPC_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
        if let Ok(max) = std::env::var("UARPC_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
        if let Ok(timeout) = std::env::var("UARPC_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Encoding and framing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Maximum array element count.
    pub max_array_length: usize,
    /// Maximum string length in bytes.
    pub max_string_length: usize,
    /// Maximum byte string length in bytes.
    pub max_byte_string_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let defaults = EncodingLimits::default();
        Self {
            max_message_size: defaults.max_message_size,
            max_array_length: defaults.max_array_length,
            max_string_length: defaults.max_string_length,
            max_byte_string_length: defaults.max_byte_string_length,
        }
    }
}

impl LimitsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("UARPC_MAX_MESSAGE_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_message_size = n;
            }
        }
        if let Ok(len) = std::env::var("UARPC_MAX_ARRAY_LENGTH") {
            if let Ok(n) = len.parse() {
                self.max_array_length = n;
            }
        }
    }

    /// Converts to codec limits.
    pub fn to_encoding_limits(&self) -> EncodingLimits {
        EncodingLimits::default()
            .with_max_message_size(self.max_message_size)
            .with_max_array_length(self.max_array_length)
            .with_max_string_length(self.max_string_length)
            .with_max_byte_string_length(self.max_byte_string_length)
    }
}

/// Trust store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Directory holding the trusted/rejected certificate stores.
    pub store_dir: PathBuf,
    /// Accept certificates not yet in the store, persisting them.
    ///
    /// Meant for commissioning; leave off in production.
    pub accept_unknown: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./pki"),
            accept_unknown: false,
        }
    }
}

impl TrustConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("UARPC_TRUST_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
        if let Ok(accept) = std::env::var("UARPC_TRUST_ACCEPT_UNKNOWN") {
            self.accept_unknown = accept == "1" || accept.to_lowercase() == "true";
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
