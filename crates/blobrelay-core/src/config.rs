//! Relay configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MEGABYTE;

/// Process configuration, loaded once at startup from a TOML file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HTTP listen address (host:port)
    pub listen_address: String,
    /// Trust the X-Real-IP header for rate-limiting identity.
    /// Only enable behind a reverse proxy that strips the header from
    /// untrusted traffic.
    pub trusted_proxy: bool,
    /// Directory attachments are stored in
    pub storage_dir: PathBuf,
    /// Total byte budget for stored attachments
    pub storage_limit: u64,
    /// Upload limits and lifetimes
    #[serde(default)]
    pub limits: UploadLimits,
    /// Per-source rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// TURN relay; omit to run the attachment service alone
    pub turn: Option<TurnConfig>,
    /// Username/secret pairs for the TURN credential handshake
    #[serde(default)]
    pub accounts: HashMap<String, String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            trusted_proxy: false,
            storage_dir: PathBuf::from("/tmp/blobrelay-attachments"),
            storage_limit: 300 * MEGABYTE,
            limits: UploadLimits::default(),
            rate_limit: RateLimitConfig::default(),
            turn: Some(TurnConfig::default()),
            accounts: HashMap::from([("user".to_string(), "password".to_string())]),
        }
    }
}

impl RelayConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RelayConfig = toml::from_str(&raw)?;
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        Ok(config)
    }

    /// Write a starter configuration for the operator to edit.
    pub fn write_starter(path: &Path) -> anyhow::Result<()> {
        let rendered = toml::to_string_pretty(&Self::default())?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_address.is_empty() {
            return Err("listen_address must not be empty".to_string());
        }
        if self.storage_limit == 0 {
            return Err("storage_limit must be > 0".to_string());
        }
        if self.limits.max_upload_bytes == 0 {
            return Err("limits.max_upload_bytes must be > 0".to_string());
        }
        if self.limits.max_upload_bytes > self.storage_limit {
            return Err("limits.max_upload_bytes must not exceed storage_limit".to_string());
        }
        if let Some(ref turn) = self.turn {
            if turn.realm.is_empty() {
                return Err("turn.realm must not be empty".to_string());
            }
            if turn.listen_address.is_empty() {
                return Err("turn.listen_address must not be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Per-upload limits and attachment lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadLimits {
    /// Largest accepted declared length in bytes
    pub max_upload_bytes: u64,
    /// Attachment lifetime in seconds
    pub attachment_ttl_secs: u64,
    /// Minimum age in seconds before an attachment may be evicted
    pub eviction_floor_secs: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 12 * MEGABYTE,
            attachment_ttl_secs: 600,
            eviction_floor_secs: 180,
        }
    }
}

impl UploadLimits {
    /// Attachment lifetime as a Duration
    pub fn attachment_ttl(&self) -> Duration {
        Duration::from_secs(self.attachment_ttl_secs)
    }

    /// Eviction floor as a Duration
    pub fn eviction_floor(&self) -> Duration {
        Duration::from_secs(self.eviction_floor_secs)
    }
}

/// Per-source rate limiting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Cumulative admitted bytes per source before denial
    pub max_bytes: u64,
    /// Idle seconds before a source's record is dropped
    pub window_secs: u64,
    /// Seconds added to the window per admitted upload
    pub extension_secs: u64,
    /// Sweep interval for lapsed records
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * MEGABYTE,
            window_secs: 600,
            extension_secs: 180,
            sweep_interval_secs: 30,
        }
    }
}

impl RateLimitConfig {
    /// Base tracking window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Window extension as a Duration
    pub fn extension(&self) -> Duration {
        Duration::from_secs(self.extension_secs)
    }

    /// Sweep interval as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// TURN relay configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnConfig {
    /// UDP listen address (host:port)
    pub listen_address: String,
    /// Public IP address allocations are relayed from
    pub public_address: String,
    /// Authentication realm
    pub realm: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:3478".to_string(),
            public_address: "127.0.0.1".to_string(),
            realm: "blobrelay".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let raw = r#"
            listen_address = "127.0.0.1:9090"
            trusted_proxy = true
            storage_dir = "/var/lib/blobrelay"
            storage_limit = 104857600

            [accounts]
            alice = "hunter2"
        "#;

        let config: RelayConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.trusted_proxy);
        assert!(config.turn.is_none());
        assert_eq!(config.limits.max_upload_bytes, 12 * MEGABYTE);
        assert_eq!(config.rate_limit.max_bytes, 64 * MEGABYTE);
        assert_eq!(config.accounts.get("alice").map(String::as_str), Some("hunter2"));
    }

    #[test]
    fn test_zero_storage_limit_rejected() {
        let config = RelayConfig {
            storage_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_cap_above_quota_rejected() {
        let config = RelayConfig {
            storage_limit: MEGABYTE,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_turn_realm_rejected() {
        let config = RelayConfig {
            turn: Some(TurnConfig {
                realm: String::new(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_starter_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        RelayConfig::write_starter(&path).unwrap();
        let loaded = RelayConfig::load(&path).unwrap();

        assert_eq!(loaded.listen_address, RelayConfig::default().listen_address);
        assert_eq!(loaded.storage_limit, 300 * MEGABYTE);
    }
}
