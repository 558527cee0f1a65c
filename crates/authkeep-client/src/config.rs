//! Configuration for authkeep deployments.
//!
//! Loaded from an optional TOML file and `AUTHKEEP__`-prefixed environment
//! variables, e.g. `AUTHKEEP__STORE__PATH=/var/lib/authkeep/tokens.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use authkeep_core::{DEFAULT_EXPIRY_BUFFER_SECS, OAuthError, Result};
use authkeep_store::{DEFAULT_REAP_LOCK_TIMEOUT, DEFAULT_RETENTION, StoreOptions};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::connector::DEFAULT_REQUEST_TIMEOUT;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "authkeep.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout of one token endpoint exchange.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding the namespace. In-memory when unset.
    pub path: Option<PathBuf>,
    /// Identifier of the cipher to select. Cleartext storage when unset.
    pub cipher: Option<String>,
    /// Hex or base64 encoded key of the selected cipher.
    pub key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    #[serde(with = "humantime_serde")]
    pub reap_lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            cipher: None,
            key: None,
            retention: DEFAULT_RETENTION,
            reap_lock_timeout: DEFAULT_REAP_LOCK_TIMEOUT,
        }
    }
}

impl StoreConfig {
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            retention: self.retention,
            reap_lock_timeout: self.reap_lock_timeout,
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("path", &self.path)
            .field("cipher", &self.cipher)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("retention", &self.retention)
            .field("reap_lock_timeout", &self.reap_lock_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Freshness buffer given to new registrations.
    pub expiry_buffer_secs: i64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_secs: DEFAULT_EXPIRY_BUFFER_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl KeeperConfig {
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.http.request_timeout.is_zero() {
            return Err(OAuthError::configuration("http.request_timeout must be > 0"));
        }
        if self.client.expiry_buffer_secs < 0 {
            return Err(OAuthError::configuration("client.expiry_buffer_secs must be >= 0"));
        }
        if self.store.retention.is_zero() {
            return Err(OAuthError::configuration("store.retention must be > 0"));
        }
        if self.store.cipher.is_some() && self.store.key.is_none() {
            return Err(OAuthError::configuration(
                "store.key is required when store.cipher is set",
            ));
        }
        let level = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&level.as_str()) {
            return Err(OAuthError::configuration(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

/// Loads configuration from `path` (or [`DEFAULT_CONFIG_FILE`] when `None`)
/// and the environment. A missing file is not an error.
///
/// # Errors
///
/// Returns a configuration error if the sources cannot be parsed or the
/// result does not validate.
pub fn load_config(path: Option<&Path>) -> Result<KeeperConfig> {
    let mut builder = Config::builder();
    let path = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);
    if path.exists() {
        builder = builder.add_source(File::from(path));
    }
    // Environment variable overrides, e.g., AUTHKEEP__HTTP__REQUEST_TIMEOUT=30s
    builder = builder.add_source(
        Environment::with_prefix("AUTHKEEP")
            .try_parsing(true)
            .separator("__"),
    );

    let cfg = builder
        .build()
        .map_err(|e| OAuthError::configuration(format!("config build error: {e}")))?;
    let merged: KeeperConfig = cfg
        .try_deserialize()
        .map_err(|e| OAuthError::configuration(format!("config deserialize error: {e}")))?;
    merged.validate()?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = KeeperConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.http.request_timeout, Duration::from_secs(10));
        assert_eq!(cfg.store.retention, Duration::from_secs(183 * 86_400));
        assert_eq!(cfg.store.reap_lock_timeout, Duration::from_secs(15));
        assert_eq!(cfg.client.expiry_buffer_secs, 10);
    }

    #[test]
    fn test_cipher_without_key_is_rejected() {
        let mut cfg = KeeperConfig::default();
        cfg.store.cipher = Some("SymmetricKeyCipher".into());
        assert!(cfg.validate().unwrap_err().is_configuration_error());
    }

    #[test]
    fn test_debug_redacts_key() {
        let mut cfg = StoreConfig::default();
        cfg.key = Some("super-secret-key".into());
        assert!(!format!("{cfg:?}").contains("super-secret-key"));
    }
}
