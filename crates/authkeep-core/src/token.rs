//! Access token model and freshness policy.
//!
//! A token is considered expired once `now >= created_on + expires_in - buffer`.
//! The buffer absorbs clock skew and request latency so that a token is never
//! handed out in the last few seconds of its life.

use serde::{Deserialize, Serialize};

use crate::time::{Timestamp, now_utc};

/// An access/refresh token pair as issued by a token endpoint.
///
/// `expires_in` is relative to `created_on`, which the connector stamps with
/// the local time at which the response arrived.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The access token presented to resource servers.
    pub access_token: String,

    /// Token type, usually "Bearer".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Lifetime in seconds. Zero when the provider did not say.
    #[serde(default)]
    pub expires_in: i64,

    /// Refresh token, if the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Granted scope (space-separated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// State echoed by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// When the token was received.
    pub created_on: Timestamp,
}

impl AccessToken {
    /// Creates a token created now with no lifetime information.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: None,
            expires_in: 0,
            refresh_token: None,
            scope: None,
            state: None,
            created_on: now_utc(),
        }
    }

    #[must_use]
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }

    #[must_use]
    pub fn with_expires_in(mut self, expires_in: i64) -> Self {
        self.expires_in = expires_in;
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn with_created_on(mut self, created_on: Timestamp) -> Self {
        self.created_on = created_on;
        self
    }

    /// Returns the refresh token when it is present and not blank.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    /// Instant from which the token counts as expired, or `None` when that
    /// instant is beyond the representable range.
    pub fn expires_at(&self, buffer_secs: i64) -> Option<Timestamp> {
        self.created_on
            .checked_add_seconds(self.expires_in.saturating_sub(buffer_secs))
    }

    /// Checks freshness against an explicit clock.
    pub fn is_expired_at(&self, now: &Timestamp, buffer_secs: i64) -> bool {
        match self.expires_at(buffer_secs) {
            Some(deadline) => *now >= deadline,
            None => self.expires_in.saturating_sub(buffer_secs) < 0,
        }
    }

    /// Checks freshness against the current time.
    pub fn is_expired(&self, buffer_secs: i64) -> bool {
        self.is_expired_at(&now_utc(), buffer_secs)
    }

    /// Returns `true` when equal to `other` ignoring `created_on`.
    pub fn same_grant(&self, other: &AccessToken) -> bool {
        self.access_token == other.access_token
            && self.token_type == other.token_type
            && self.expires_in == other.expires_in
            && self.refresh_token == other.refresh_token
            && self.scope == other.scope
            && self.state == other.state
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .field("created_on", &self.created_on)
            .finish()
    }
}
