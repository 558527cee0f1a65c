//! RFC 8628 device authorization response.

use serde::{Deserialize, Serialize};

use crate::time::{Timestamp, now_utc};

/// Default polling interval when the provider omits one (RFC 8628 3.2).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

/// A pending device authorization the user still has to approve.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodeGrant {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Lifetime of the device code in seconds.
    pub expires_in: i64,
    /// Minimum seconds between polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
    pub created_on: Timestamp,
}

impl DeviceCodeGrant {
    pub fn new(
        device_code: impl Into<String>,
        user_code: impl Into<String>,
        verification_uri: impl Into<String>,
        expires_in: i64,
    ) -> Self {
        Self {
            device_code: device_code.into(),
            user_code: user_code.into(),
            verification_uri: verification_uri.into(),
            verification_uri_complete: None,
            expires_in,
            interval: DEFAULT_POLL_INTERVAL_SECS,
            created_on: now_utc(),
        }
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.created_on.checked_add_seconds(self.expires_in)
    }

    pub fn is_expired_at(&self, now: &Timestamp) -> bool {
        self.expires_at().is_some_and(|deadline| *now >= deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(&now_utc())
    }
}

impl std::fmt::Debug for DeviceCodeGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodeGrant")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .field("created_on", &self.created_on)
            .finish()
    }
}
