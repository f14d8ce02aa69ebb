//! Location configuration.
//!
//! Loaded from a JSON file or built in code. Only `location` is required;
//! everything else has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LocationError, Result};
use crate::keys;

/// Default broker port.
pub const DEFAULT_BROKER_PORT: u16 = 2020;

fn default_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Configuration for connecting a [`Location`](crate::Location).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationConfig {
    /// Fqdn of the location, also the name of its key pair.
    pub location: String,
    /// Explicit broker ip, when the fqdn should not be resolved.
    #[serde(default)]
    pub location_ip: Option<String>,
    /// Full broker URL, overriding host and port.
    #[serde(default)]
    pub broker_url: Option<String>,
    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Key directory; `~/.skiff` when unset.
    #[serde(default)]
    pub key_prefix: Option<PathBuf>,
    /// Seconds between heartbeats.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds to wait for the resource offer.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// Default seconds to wait for a blocking command.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Seconds allowed for connecting and the handshake.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl LocationConfig {
    /// Configuration for `location` with every default.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            location_ip: None,
            broker_url: None,
            port: DEFAULT_BROKER_PORT,
            key_prefix: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Configuration for the location named in the default key directory.
    pub fn discover() -> Result<Self> {
        let prefix = keys::default_prefix();
        let location = keys::default_location(&prefix)?;
        Ok(Self::new(location))
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            LocationError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| LocationError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(LocationError::Config("location cannot be empty".into()));
        }
        if self.location.contains('/') {
            return Err(LocationError::Config(
                "location must be a host name, not a path".into(),
            ));
        }
        if let Some(url) = &self.broker_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| LocationError::Config(format!("invalid broker_url: {e}")))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(LocationError::Config(format!(
                    "broker_url must use ws or wss, got {}",
                    parsed.scheme()
                )));
            }
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(LocationError::Config(
                "heartbeat_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Builder: explicit broker ip.
    #[must_use]
    pub fn with_location_ip(mut self, ip: impl Into<String>) -> Self {
        self.location_ip = Some(ip.into());
        self
    }

    /// Builder: explicit broker URL.
    #[must_use]
    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = Some(url.into());
        self
    }

    /// Builder: key directory.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Builder: resource offer timeout.
    #[must_use]
    pub const fn with_ready_timeout(mut self, secs: u64) -> Self {
        self.ready_timeout_secs = secs;
        self
    }

    /// The URL the connection dials.
    #[must_use]
    pub fn url(&self) -> String {
        if let Some(url) = &self.broker_url {
            return url.clone();
        }
        let host = self.location_ip.as_deref().unwrap_or(&self.location);
        format!("wss://{host}:{}/", self.port)
    }

    /// The key directory in effect.
    #[must_use]
    pub fn key_prefix(&self) -> PathBuf {
        self.key_prefix.clone().unwrap_or_else(keys::default_prefix)
    }

    /// Heartbeat interval.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Resource offer timeout.
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Default blocking command timeout.
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Connect and handshake timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config = LocationConfig::from_json(r#"{"location": "tiny.example.com"}"#).unwrap();
        assert_eq!(config.port, DEFAULT_BROKER_PORT);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.url(), "wss://tiny.example.com:2020/");
    }

    #[test]
    fn test_location_ip_overrides_host() {
        let config = LocationConfig::new("tiny.example.com").with_location_ip("10.0.0.7");
        assert_eq!(config.url(), "wss://10.0.0.7:2020/");
    }

    #[test]
    fn test_broker_url_overrides_everything() {
        let config = LocationConfig::new("tiny.example.com")
            .with_location_ip("10.0.0.7")
            .with_broker_url("ws://127.0.0.1:9999/");
        assert_eq!(config.url(), "ws://127.0.0.1:9999/");
    }

    #[test]
    fn test_validate_rejects_empty_location() {
        let err = LocationConfig::from_json(r#"{"location": "  "}"#).unwrap_err();
        assert!(err.to_string().contains("location cannot be empty"));
    }

    #[test]
    fn test_validate_rejects_http_broker_url() {
        let err = LocationConfig::from_json(
            r#"{"location": "x", "broker_url": "http://x/"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ws or wss"));
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat() {
        let err = LocationConfig::from_json(r#"{"location": "x", "heartbeat_interval_secs": 0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("heartbeat"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("location.json");
        let config = LocationConfig::new("tiny.example.com").with_key_prefix(dir.path());
        config.save(&path).unwrap();
        assert_eq!(LocationConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_from_file_missing() {
        let err = LocationConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
