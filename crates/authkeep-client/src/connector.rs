//! OAuth2 protocol connector.
//!
//! Builds and sends the token endpoint requests of every supported grant
//! type and turns the responses into [`AccessToken`]s or typed errors.
//!
//! # Supported Grant Types
//!
//! - `authorization_code` (RFC 6749 4.1)
//! - `password` (RFC 6749 4.3)
//! - `client_credentials` (RFC 6749 4.4)
//! - `refresh_token` (RFC 6749 6)
//! - `urn:ietf:params:oauth:grant-type:device_code` (RFC 8628)
//!
//! Grant types differ only in the form fields they send. Authentication,
//! headers and response parsing are shared.

use std::sync::Arc;
use std::time::Duration;

use authkeep_core::{AccessToken, DeviceCodeGrant, OAuthError, ProtocolError, Result, now_utc};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer};

use crate::transport::{HttpRequest, HttpTransport};

/// Default timeout of a single token endpoint exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Grant type of RFC 8628 token polling.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// How the client identifies itself to the token endpoint.
#[derive(Clone, Default)]
pub struct ClientAuth {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Use an HTTP Basic header when a secret is present.
    pub basic_auth: bool,
    /// Additional fields appended to every request body.
    pub extra_fields: Vec<(String, String)>,
}

impl std::fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuth")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("basic_auth", &self.basic_auth)
            .field(
                "extra_fields",
                &self.extra_fields.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Ordered form fields; absent optional values are skipped.
#[derive(Debug, Default)]
struct FormFields(Vec<(String, String)>);

impl FormFields {
    fn grant(grant_type: &str) -> Self {
        let mut fields = Self::default();
        fields.push("grant_type", grant_type);
        fields
    }

    fn push(&mut self, name: &str, value: &str) -> &mut Self {
        self.0.push((name.to_string(), value.to_string()));
        self
    }

    fn push_opt(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.push(name, value);
        }
        self
    }

    fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }
}

/// Executes OAuth2 exchanges against token and device endpoints.
#[derive(Clone)]
pub struct OAuthConnector {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl OAuthConnector {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    // =========================================================================
    // Authorization URL
    // =========================================================================

    /// Builds the URL the user agent is sent to for the authorization code
    /// grant.
    pub fn authorization_url(
        base_url: &str,
        client_id: &str,
        redirect_uri: Option<&str>,
        scope: Option<&str>,
        state: &str,
    ) -> String {
        let mut url = String::from(base_url);
        if !base_url.contains('?') {
            url.push('?');
        } else if !base_url.ends_with('?') && !base_url.ends_with('&') {
            url.push('&');
        }

        url.push_str("response_type=code");
        url.push_str("&client_id=");
        url.push_str(&encode(client_id));
        url.push_str("&state=");
        url.push_str(&encode(state));
        if let Some(redirect_uri) = redirect_uri {
            url.push_str("&redirect_uri=");
            url.push_str(&encode(redirect_uri));
        }
        if let Some(scope) = scope {
            url.push_str("&scope=");
            url.push_str(&encode(scope));
        }
        url
    }

    // =========================================================================
    // Grants
    // =========================================================================

    /// Exchanges an authorization code.
    ///
    /// # Errors
    ///
    /// See [`OAuthConnector`] for the error mapping.
    pub async fn grant_authorization_code(
        &self,
        token_url: &str,
        auth: &ClientAuth,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<AccessToken> {
        let mut fields = FormFields::grant("authorization_code");
        fields.push("code", code).push_opt("redirect_uri", redirect_uri);
        self.token_exchange(token_url, auth, fields).await
    }

    /// Resource owner password credentials grant.
    ///
    /// # Errors
    ///
    /// See [`OAuthConnector`] for the error mapping.
    pub async fn grant_password(
        &self,
        token_url: &str,
        auth: &ClientAuth,
        username: &str,
        password: &str,
        scope: Option<&str>,
    ) -> Result<AccessToken> {
        let mut fields = FormFields::grant("password");
        fields
            .push("username", username)
            .push("password", password)
            .push_opt("scope", scope);
        self.token_exchange(token_url, auth, fields).await
    }

    /// Client credentials grant.
    ///
    /// # Errors
    ///
    /// See [`OAuthConnector`] for the error mapping.
    pub async fn grant_client_credentials(
        &self,
        token_url: &str,
        auth: &ClientAuth,
        scope: Option<&str>,
    ) -> Result<AccessToken> {
        let mut fields = FormFields::grant("client_credentials");
        fields.push_opt("scope", scope);
        self.token_exchange(token_url, auth, fields).await
    }

    /// Refresh token grant.
    ///
    /// # Errors
    ///
    /// See [`OAuthConnector`] for the error mapping.
    pub async fn grant_refresh_token(
        &self,
        token_url: &str,
        auth: &ClientAuth,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<AccessToken> {
        let mut fields = FormFields::grant("refresh_token");
        fields
            .push("refresh_token", refresh_token)
            .push_opt("scope", scope);
        self.token_exchange(token_url, auth, fields).await
    }

    /// One device-code poll of the token endpoint.
    ///
    /// A pending authorization surfaces as a protocol error with code
    /// `authorization_pending` or `slow_down`.
    ///
    /// # Errors
    ///
    /// See [`OAuthConnector`] for the error mapping.
    pub async fn grant_device_code(
        &self,
        token_url: &str,
        auth: &ClientAuth,
        device_code: &str,
    ) -> Result<AccessToken> {
        let mut fields = FormFields::grant(DEVICE_CODE_GRANT_TYPE);
        fields.push("device_code", device_code);
        self.token_exchange(token_url, auth, fields).await
    }

    /// Starts a device authorization (RFC 8628 3.1).
    ///
    /// The client id is always sent in the body, as the device endpoint
    /// requires it even for confidential clients.
    ///
    /// # Errors
    ///
    /// See [`OAuthConnector`] for the error mapping.
    pub async fn request_device_code(
        &self,
        device_url: &str,
        auth: &ClientAuth,
        scope: Option<&str>,
    ) -> Result<DeviceCodeGrant> {
        let mut fields = FormFields::default();
        if auth.basic_auth {
            fields.push_opt("client_id", auth.client_id.as_deref());
        }
        fields.push_opt("scope", scope);

        let body = self.exchange(device_url, auth, fields).await?;
        let parsed: DeviceAuthorizationBody = serde_json::from_str(&body)
            .map_err(|e| OAuthError::format(format!("Invalid device authorization response: {e}")))?;

        let mut grant = DeviceCodeGrant::new(
            parsed.device_code,
            parsed.user_code,
            parsed.verification_uri,
            parsed.expires_in,
        );
        grant.verification_uri_complete = parsed.verification_uri_complete;
        if let Some(interval) = parsed.interval {
            grant.interval = interval;
        }
        grant.created_on = now_utc();
        Ok(grant)
    }

    // =========================================================================
    // Shared plumbing
    // =========================================================================

    async fn token_exchange(
        &self,
        token_url: &str,
        auth: &ClientAuth,
        fields: FormFields,
    ) -> Result<AccessToken> {
        let body = self.exchange(token_url, auth, fields).await?;
        Self::parse_token_response(&body)
    }

    /// Parses a token endpoint success body into a token created now.
    ///
    /// # Errors
    ///
    /// Returns a format error if the body is not a token response.
    pub fn parse_token_response(body: &str) -> Result<AccessToken> {
        let parsed: TokenResponseBody = serde_json::from_str(body)
            .map_err(|e| OAuthError::format(format!("Invalid token response: {e}")))?;
        Ok(parsed.into_token())
    }

    /// Sends the request and returns the body of a 200 response.
    async fn exchange(&self, url: &str, auth: &ClientAuth, mut fields: FormFields) -> Result<String> {
        let mut basic = None;
        match (&auth.client_secret, auth.basic_auth) {
            (Some(secret), true) => {
                let id = auth.client_id.as_deref().unwrap_or_default();
                basic = Some(STANDARD.encode(format!("{id}:{secret}")));
            }
            _ => {
                if !fields.0.iter().any(|(name, _)| name == "client_id") {
                    fields.push_opt("client_id", auth.client_id.as_deref());
                }
                fields.push_opt("client_secret", auth.client_secret.as_deref());
            }
        }
        for (name, value) in &auth.extra_fields {
            fields.push(name, value);
        }

        let mut request = HttpRequest::post_form(url, fields.encode(), self.timeout)
            .with_header("Accept", "application/json")
            .with_header("Accept-Charset", "UTF-8");
        if let Some(credential) = basic {
            request = request.with_header("Authorization", format!("Basic {credential}"));
        }

        let grant_type = fields
            .0
            .first()
            .filter(|(name, _)| name == "grant_type")
            .map(|(_, value)| value.as_str())
            .unwrap_or("device_authorization");
        tracing::debug!(url, grant_type, "Sending OAuth request");

        let response = self.transport.issue(request).await?;
        match response.status {
            200 => {
                if response.body.trim().is_empty() {
                    return Err(OAuthError::format("Empty response body"));
                }
                tracing::debug!(url, grant_type, "OAuth request succeeded");
                Ok(response.body)
            }
            400 => match serde_json::from_str::<ProtocolError>(&response.body) {
                Ok(error) => {
                    tracing::debug!(url, grant_type, error = %error.error, "OAuth error response");
                    Err(OAuthError::Protocol(error))
                }
                Err(e) => {
                    tracing::warn!(url, grant_type, error = %e, "Unparsable OAuth error response");
                    Err(OAuthError::service(format!(
                        "Bad http response, http code 400: {}",
                        body_excerpt(&response.body)
                    )))
                }
            },
            status => {
                tracing::warn!(url, grant_type, status, "Unexpected token endpoint status");
                Err(OAuthError::UnexpectedStatus { status })
            }
        }
    }
}

impl std::fmt::Debug for OAuthConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConnector")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Leading part of a response body, for error messages.
fn body_excerpt(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    let body = body.trim();
    match body.char_indices().nth(MAX_CHARS) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

// =============================================================================
// Wire types
// =============================================================================

/// Token endpoint success body (RFC 6749 5.1).
#[derive(Debug, Deserialize)]
struct TokenResponseBody {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl TokenResponseBody {
    fn into_token(self) -> AccessToken {
        AccessToken {
            access_token: self.access_token,
            token_type: self.token_type,
            expires_in: self.expires_in.unwrap_or_default(),
            refresh_token: self.refresh_token,
            scope: self.scope,
            state: self.state,
            created_on: now_utc(),
        }
    }
}

/// Device authorization success body (RFC 8628 3.2).
#[derive(Debug, Deserialize)]
struct DeviceAuthorizationBody {
    device_code: String,
    user_code: String,
    #[serde(alias = "verification_url")]
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    #[serde(deserialize_with = "required_lenient_seconds")]
    expires_in: i64,
    #[serde(default)]
    interval: Option<u64>,
}

/// Some providers send numbers as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(i64),
    Text(String),
}

impl Seconds {
    fn into_i64<E: serde::de::Error>(self) -> std::result::Result<i64, E> {
        match self {
            Seconds::Number(n) => Ok(n),
            Seconds::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("expected seconds, got '{s}'"))),
        }
    }
}

fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Seconds>::deserialize(deserializer)?
        .map(Seconds::into_i64)
        .transpose()
}

fn required_lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Seconds::deserialize(deserializer)?.into_i64()
}
