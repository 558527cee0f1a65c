//! Persisted parameters of one OAuth2 client registration.

use serde::{Deserialize, Serialize};

/// Seconds subtracted from a token's declared lifetime.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 10;

fn default_expiry_buffer() -> i64 {
    DEFAULT_EXPIRY_BUFFER_SECS
}

/// Everything needed to talk to one provider on behalf of one handle.
///
/// A registration is written once when the handle is created and only
/// changes when the caller registers the handle again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Opaque identifier of this registration.
    pub handle: String,

    /// Token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,

    /// Authorization endpoint. Also used as the device authorization
    /// endpoint by the device-code flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Default scope for grants that accept one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// Send client credentials in an HTTP Basic header instead of the body.
    #[serde(default)]
    pub supports_basic_auth: bool,

    /// Freshness buffer in seconds.
    #[serde(default = "default_expiry_buffer")]
    pub expiry_buffer_secs: i64,
}

impl Registration {
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            token_url: None,
            authorization_url: None,
            client_id: None,
            client_secret: None,
            scope: None,
            redirect_uri: None,
            supports_basic_auth: false,
            expiry_buffer_secs: DEFAULT_EXPIRY_BUFFER_SECS,
        }
    }

    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_authorization_url(mut self, url: impl Into<String>) -> Self {
        self.authorization_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    #[must_use]
    pub fn with_basic_auth(mut self, enabled: bool) -> Self {
        self.supports_basic_auth = enabled;
        self
    }

    #[must_use]
    pub fn with_expiry_buffer(mut self, seconds: i64) -> Self {
        self.expiry_buffer_secs = seconds;
        self
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("handle", &self.handle)
            .field("token_url", &self.token_url)
            .field("authorization_url", &self.authorization_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .field("redirect_uri", &self.redirect_uri)
            .field("supports_basic_auth", &self.supports_basic_auth)
            .field("expiry_buffer_secs", &self.expiry_buffer_secs)
            .finish()
    }
}
