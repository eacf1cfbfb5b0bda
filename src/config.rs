//! Service configuration
//!
//! Configuration is read from a YAML file and may be overridden from the
//! environment with `AUTH_`-prefixed variables, using `__` to reach nested
//! keys (`AUTH_REDIS__PORT=7000`, `AUTH_VAULT__TOKEN=...`).
//!
//! ```yaml
//! log_level: info
//! server:
//!   port: 8080
//!   shutdown_timeout_ms: 10000
//! vault:
//!   address: https://vault.internal:8200
//!   token: s.token
//!   ca_path: ./certs/ca.pem
//! redis:
//!   type: single
//!   host: redis.internal
//!   port: 6379
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "AUTH_";

const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

/// Whole-service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// One of `debug`, `info`, `warn`, `error`
    pub log_level: String,
    /// Log line format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Server settings
    pub server: ServerConfig,
    /// Vault settings
    pub vault: VaultConfig,
    /// Redis settings
    pub redis: RedisConfig,
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listening port
    pub port: u16,
    /// Time allowed for graceful shutdown
    pub shutdown_timeout_ms: u64,
}

impl ServerConfig {
    /// Shutdown deadline as a duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Vault settings
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// Vault address
    pub address: String,
    /// Vault token
    pub token: SecretString,
    /// Skip server certificate verification (development only)
    #[serde(default)]
    pub insecure_skip_tls: bool,
    /// CA certificate path
    #[serde(default)]
    pub ca_path: String,
    /// Client certificate path
    #[serde(default)]
    pub client_cert_path: String,
    /// Client key path
    #[serde(default)]
    pub client_key_path: String,
    /// Request timeout
    #[serde(default = "default_vault_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_vault_timeout_ms() -> u64 {
    crate::DEFAULT_TIMEOUT_MS
}

impl VaultConfig {
    /// Whether any TLS path is configured
    pub fn has_tls_paths(&self) -> bool {
        !self.ca_path.is_empty() || !self.client_cert_path.is_empty() || !self.client_key_path.is_empty()
    }
}

/// Redis deployment type
///
/// Values other than `single` and `cluster` are kept verbatim so that they
/// can be reported; validation rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RedisType {
    /// One node addressed by host and port
    Single,
    /// A cluster addressed by a list of seed nodes
    Cluster,
    /// Anything else
    Unknown(String),
}

impl RedisType {
    /// String form as it appears in configuration
    pub fn as_str(&self) -> &str {
        match self {
            RedisType::Single => "single",
            RedisType::Cluster => "cluster",
            RedisType::Unknown(other) => other,
        }
    }
}

impl From<String> for RedisType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "single" => RedisType::Single,
            "cluster" => RedisType::Cluster,
            _ => RedisType::Unknown(value),
        }
    }
}

impl From<&str> for RedisType {
    fn from(value: &str) -> Self {
        RedisType::from(value.to_string())
    }
}

impl From<RedisType> for String {
    fn from(value: RedisType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RedisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Redis settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RedisConfig {
    /// Deployment type
    #[serde(rename = "type")]
    pub kind: RedisType,
    /// Host (single only)
    #[serde(default)]
    pub host: String,
    /// Port (single only)
    #[serde(default)]
    pub port: u16,
    /// Seed nodes as `host:port` (cluster only)
    #[serde(default)]
    pub addrs: Vec<String>,
}

impl RedisConfig {
    /// Single-node settings
    pub fn single(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: RedisType::Single,
            host: host.into(),
            port,
            addrs: Vec::new(),
        }
    }

    /// Cluster settings
    pub fn cluster<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: RedisType::Cluster,
            host: String::new(),
            port: 0,
            addrs: addrs.into_iter().map(Into::into).collect(),
        }
    }

    /// Settings carrying only a type, with every address field empty
    pub fn of_type(kind: impl Into<RedisType>) -> Self {
        Self {
            kind: kind.into(),
            host: String::new(),
            port: 0,
            addrs: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self.kind {
            RedisType::Single => {
                if self.host.is_empty() || self.port == 0 {
                    return Err(Error::config("host and port are required for single redis"));
                }
                if !self.addrs.is_empty() {
                    return Err(Error::config("addrs are not allowed for single redis"));
                }
                if self.port < 1024 {
                    return Err(Error::config("redis port must be between 1024 and 65535"));
                }
            }
            RedisType::Cluster => {
                if self.addrs.is_empty() {
                    return Err(Error::config("addrs are required for cluster redis"));
                }
                if !self.host.is_empty() || self.port != 0 {
                    return Err(Error::config("host and port are not allowed for cluster redis"));
                }
                if let Some(bad) = self.addrs.iter().find(|addr| !is_host_port(addr)) {
                    return Err(Error::config(format!(
                        "redis addr {:?} is not host:port",
                        bad
                    )));
                }
            }
            RedisType::Unknown(ref other) => {
                return Err(Error::config(format!(
                    "redis type must be one of single, cluster (got {:?})",
                    other
                )));
            }
        }
        Ok(())
    }
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

impl Config {
    /// Load from a YAML file plus environment overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Config = Figment::new()
            .merge(Yaml::file_exact(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| Error::config(format!("error loading {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check every field the loader cannot express in types
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(Error::config(format!(
                "log_level must be one of {} (got {:?})",
                LOG_LEVELS.join(", "),
                self.log_level
            )));
        }

        if self.server.port < 1024 {
            return Err(Error::config("server port must be between 1024 and 65535"));
        }
        if self.server.shutdown_timeout_ms == 0 {
            return Err(Error::config("server shutdown_timeout_ms must be greater than 0"));
        }

        self.validate_vault()?;
        self.redis.validate()
    }

    fn validate_vault(&self) -> Result<()> {
        let address = url::Url::parse(&self.vault.address)
            .map_err(|e| Error::config(format!("vault address is not a valid URL: {}", e)))?;
        if !matches!(address.scheme(), "http" | "https") {
            return Err(Error::config("vault address must use http or https"));
        }
        if self.vault.token.expose_secret().is_empty() {
            return Err(Error::config("vault token is required"));
        }
        Ok(())
    }
}
