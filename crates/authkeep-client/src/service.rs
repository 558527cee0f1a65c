//! Per-handle OAuth client service.
//!
//! A service is either open or closed. Once closed (directly or through
//! [`OAuthClientService::remove`]) every operation fails with
//! [`OAuthError::Closed`].
//!
//! # Refresh policy
//!
//! [`access_token`](OAuthClientService::access_token) returns the cached
//! token while it is fresh. An expired token with a refresh token is
//! refreshed; an expired token without one is returned as-is and the caller
//! has to authorize again.
//!
//! Refreshes are serialized per handle. The freshness check, the network
//! refresh and the persist all happen under the same lock, so concurrent
//! callers that all find an expired token cause exactly one refresh and all
//! receive its result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use authkeep_core::{AccessToken, DeviceCodeGrant, OAuthError, ProtocolError, Registration, Result};
use authkeep_store::TokenStore;
use tokio::sync::{Mutex, RwLock};
use url::Url;
use uuid::Uuid;

use crate::connector::{ClientAuth, OAuthConnector};
use crate::device::{DeviceCodeConnector, DeviceFlowParams, PollOutcome, Rfc8628Connector};
use crate::listener::{AccessTokenListener, ListenerSet};

/// State and redirect URI of the last authorization request.
#[derive(Debug, Default)]
struct AuthorizationContext {
    state: Option<String>,
    redirect_uri: Option<String>,
}

/// OAuth client for one registered handle.
pub struct OAuthClientService {
    handle: String,
    registration: RwLock<Registration>,
    store: Arc<TokenStore>,
    connector: OAuthConnector,
    listeners: Arc<ListenerSet>,
    extra_fields: RwLock<Vec<(String, String)>>,
    authorization: Mutex<AuthorizationContext>,
    refresh_lock: Mutex<()>,
    device: Mutex<Option<Arc<dyn DeviceCodeConnector>>>,
    closed: AtomicBool,
}

impl OAuthClientService {
    /// Builds a service for an already persisted registration.
    pub fn new(registration: Registration, store: Arc<TokenStore>, connector: OAuthConnector) -> Self {
        Self {
            handle: registration.handle.clone(),
            registration: RwLock::new(registration),
            store,
            connector,
            listeners: Arc::new(ListenerSet::new()),
            extra_fields: RwLock::new(Vec::new()),
            authorization: Mutex::new(AuthorizationContext::default()),
            refresh_lock: Mutex::new(()),
            device: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the registration, including in-memory overrides.
    pub async fn registration(&self) -> Registration {
        self.registration.read().await.clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(OAuthError::Closed);
        }
        Ok(())
    }

    async fn client_auth(&self, registration: &Registration) -> ClientAuth {
        ClientAuth {
            client_id: registration.client_id.clone(),
            client_secret: registration.client_secret.clone(),
            basic_auth: registration.supports_basic_auth,
            extra_fields: self.extra_fields.read().await.clone(),
        }
    }

    // =========================================================================
    // Authorization code flow
    // =========================================================================

    /// Builds the authorization URL and remembers `state` and the redirect
    /// URI for [`extract_auth_code`](Self::extract_auth_code).
    ///
    /// A random state is generated when none is given. Redirect URI and
    /// scope default to the registration's.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the authorization URL or client id
    /// is not registered.
    pub async fn authorization_url(
        &self,
        redirect_uri: Option<&str>,
        scope: Option<&str>,
        state: Option<&str>,
    ) -> Result<String> {
        self.ensure_open()?;
        let registration = self.registration.read().await.clone();

        let base_url = registration
            .authorization_url
            .as_deref()
            .ok_or_else(|| OAuthError::configuration("Missing authorization url"))?;
        let client_id = registration
            .client_id
            .as_deref()
            .ok_or_else(|| OAuthError::configuration("Missing client ID"))?;

        let state = state
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let redirect_uri = redirect_uri
            .map(str::to_string)
            .or_else(|| registration.redirect_uri.clone());
        let scope = scope
            .map(str::to_string)
            .or_else(|| registration.scope.clone());

        {
            let mut context = self.authorization.lock().await;
            context.state = Some(state.clone());
            context.redirect_uri = redirect_uri.clone();
        }

        Ok(OAuthConnector::authorization_url(
            base_url,
            client_id,
            redirect_uri.as_deref(),
            scope.as_deref(),
            &state,
        ))
    }

    /// Extracts the authorization code from the redirect the provider sent
    /// the user agent to.
    ///
    /// The `state` parameter must match the stored state. A redirect without
    /// state is only accepted when no state was stored either.
    ///
    /// # Errors
    ///
    /// - [`OAuthError::StateMismatch`] when the states differ
    /// - [`OAuthError::Protocol`] when the redirect carries an `error`
    /// - a service error when the URL is malformed or has no code
    pub async fn extract_auth_code(&self, redirect_url: &str) -> Result<String> {
        self.ensure_open()?;
        let url = Url::parse(redirect_url)
            .map_err(|e| OAuthError::service(format!("Invalid redirect URL: {e}")))?;

        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut description = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        let expected = self.authorization.lock().await.state.clone();
        let matches = match (&state, &expected) {
            (Some(received), Some(expected)) => received == expected,
            (None, None) => true,
            _ => false,
        };
        if !matches {
            tracing::warn!(handle = %self.handle, "Authorization redirect state mismatch");
            return Err(OAuthError::StateMismatch {
                expected,
                received: state,
            });
        }

        if let Some(error) = error {
            let mut protocol = ProtocolError::new(error);
            protocol.description = description;
            protocol.state = state;
            return Err(OAuthError::Protocol(protocol));
        }

        code.ok_or_else(|| OAuthError::service("Redirect URL does not contain an authorization code"))
    }

    // =========================================================================
    // Explicit grants
    // =========================================================================

    /// Exchanges an authorization code and caches the token.
    ///
    /// When `redirect_uri` is given it must equal the one passed to
    /// [`authorization_url`](Self::authorization_url).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the token URL or client id is
    /// missing, a service error on redirect mismatch, or the connector's
    /// error.
    pub async fn access_token_by_authorization_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<AccessToken> {
        self.ensure_open()?;
        let registration = self.registration.read().await.clone();
        let token_url = require_token_url(&registration)?;
        if registration.client_id.is_none() {
            return Err(OAuthError::configuration("Missing client ID"));
        }

        let stored_redirect = self.authorization.lock().await.redirect_uri.clone();
        if let (Some(given), Some(stored)) = (redirect_uri, stored_redirect.as_deref())
            && given != stored
        {
            return Err(OAuthError::service(
                "redirect_uri does not match the one used for the authorization request",
            ));
        }
        let redirect_uri = redirect_uri
            .map(str::to_string)
            .or(stored_redirect)
            .or_else(|| registration.redirect_uri.clone());

        let auth = self.client_auth(&registration).await;
        let token = self
            .connector
            .grant_authorization_code(token_url, &auth, code, redirect_uri.as_deref())
            .await?;
        self.store.save_access_token(&self.handle, &token).await?;
        Ok(token)
    }

    /// Resource owner password grant. `scope` defaults to the registration's.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the token URL is missing, or the
    /// connector's error.
    pub async fn access_token_by_password(
        &self,
        username: &str,
        password: &str,
        scope: Option<&str>,
    ) -> Result<AccessToken> {
        self.ensure_open()?;
        let registration = self.registration.read().await.clone();
        let token_url = require_token_url(&registration)?;
        let scope = scope.or(registration.scope.as_deref());

        let auth = self.client_auth(&registration).await;
        let token = self
            .connector
            .grant_password(token_url, &auth, username, password, scope)
            .await?;
        self.store.save_access_token(&self.handle, &token).await?;
        Ok(token)
    }

    /// Client credentials grant. `scope` defaults to the registration's.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the token URL or client id is
    /// missing, or the connector's error.
    pub async fn access_token_by_client_credentials(&self, scope: Option<&str>) -> Result<AccessToken> {
        self.ensure_open()?;
        let registration = self.registration.read().await.clone();
        let token_url = require_token_url(&registration)?;
        if registration.client_id.is_none() {
            return Err(OAuthError::configuration("Missing client ID"));
        }
        let scope = scope.or(registration.scope.as_deref());

        let auth = self.client_auth(&registration).await;
        let token = self
            .connector
            .grant_client_credentials(token_url, &auth, scope)
            .await?;
        self.store.save_access_token(&self.handle, &token).await?;
        Ok(token)
    }

    /// Caches a token obtained outside this service.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is closed or the store fails.
    pub async fn import_access_token(&self, token: &AccessToken) -> Result<()> {
        self.ensure_open()?;
        self.store.save_access_token(&self.handle, token).await?;
        Ok(())
    }

    // =========================================================================
    // Cached token and refresh
    // =========================================================================

    /// Returns the cached token, refreshing it first when it is expired and
    /// refreshable. `None` means no token was ever obtained.
    ///
    /// # Errors
    ///
    /// Returns a storage security error if the cached token cannot be
    /// decrypted, or the refresh's error.
    pub async fn access_token(&self) -> Result<Option<AccessToken>> {
        self.ensure_open()?;
        let Some(token) = self.store.load_access_token(&self.handle).await? else {
            return Ok(None);
        };

        let buffer = self.registration.read().await.expiry_buffer_secs;
        if token.is_expired(buffer) && token.usable_refresh_token().is_some() {
            return self.refresh(false).await.map(Some);
        }
        Ok(Some(token))
    }

    /// Refreshes the token regardless of its freshness.
    ///
    /// # Errors
    ///
    /// Returns a service error if no token or no refresh token is cached, a
    /// configuration error if the token URL is missing, or the connector's
    /// error.
    pub async fn refresh_token(&self) -> Result<AccessToken> {
        self.refresh(true).await
    }

    async fn refresh(&self, force: bool) -> Result<AccessToken> {
        let (token, refreshed) = {
            let _guard = self.refresh_lock.lock().await;
            self.ensure_open()?;
            let registration = self.registration.read().await.clone();

            let current = self
                .store
                .load_access_token(&self.handle)
                .await?
                .ok_or_else(|| {
                    OAuthError::service("Cannot refresh token because last access token is not available")
                })?;
            let refresh_token = current.usable_refresh_token().ok_or_else(|| {
                OAuthError::service("Cannot refresh token because last access token did not have a refresh token")
            })?;
            let token_url = require_token_url(&registration)?;

            if !force && !current.is_expired(registration.expiry_buffer_secs) {
                (current, false)
            } else {
                let auth = self.client_auth(&registration).await;
                let mut fresh = self
                    .connector
                    .grant_refresh_token(token_url, &auth, refresh_token, registration.scope.as_deref())
                    .await?;
                if fresh.usable_refresh_token().is_none() {
                    fresh.refresh_token = current.refresh_token.clone();
                }
                self.store.save_access_token(&self.handle, &fresh).await?;
                tracing::debug!(handle = %self.handle, force, "Access token refreshed");
                (fresh, true)
            }
        };

        if refreshed {
            self.listeners.notify(&token);
        }
        Ok(token)
    }

    // =========================================================================
    // Listeners and tuning
    // =========================================================================

    pub fn add_listener(&self, listener: Arc<dyn AccessTokenListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn AccessTokenListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Adds a form field sent with every token request of this handle.
    pub async fn add_extra_auth_field(&self, name: impl Into<String>, value: impl Into<String>) {
        self.extra_fields
            .write()
            .await
            .push((name.into(), value.into()));
    }

    /// Overrides the freshness buffer until the service is rebuilt.
    pub async fn set_expiry_buffer(&self, seconds: i64) {
        self.registration.write().await.expiry_buffer_secs = seconds;
    }

    // =========================================================================
    // Device code flow
    // =========================================================================

    /// Starts (or resumes) a device authorization.
    ///
    /// Any previous device flow of this handle is closed first. Returns
    /// `None` when a fresh access token is already cached.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the token URL, authorization URL,
    /// client id or scope is missing, or the device request's error.
    pub async fn device_code_grant(&self) -> Result<Option<DeviceCodeGrant>> {
        self.ensure_open()?;
        let mut slot = self.device.lock().await;
        if let Some(previous) = slot.take() {
            previous.close().await;
        }

        let registration = self.registration.read().await.clone();
        let token_url = require_token_url(&registration)?.to_string();
        let device_url = registration
            .authorization_url
            .clone()
            .ok_or_else(|| OAuthError::configuration("Missing authorization url"))?;
        if registration.client_id.is_none() {
            return Err(OAuthError::configuration("Missing client ID"));
        }
        let scope = registration
            .scope
            .clone()
            .ok_or_else(|| OAuthError::configuration("Missing scope"))?;

        match self.access_token().await {
            Ok(Some(token)) if !token.is_expired(registration.expiry_buffer_secs) => {
                return Ok(None);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(handle = %self.handle, error = %e, "Cached token unusable, starting device flow");
            }
        }

        let params = DeviceFlowParams {
            handle: self.handle.clone(),
            token_url,
            device_url,
            scope,
            auth: self.client_auth(&registration).await,
        };
        let connector: Arc<dyn DeviceCodeConnector> = Arc::new(Rfc8628Connector::new(
            params,
            Arc::clone(&self.store),
            self.connector.clone(),
            Arc::clone(&self.listeners),
        ));
        *slot = Some(Arc::clone(&connector));
        connector.device_code_grant().await.map(Some)
    }

    /// Waits until the device flow started by
    /// [`device_code_grant`](Self::device_code_grant) ends.
    ///
    /// Returns `None` when no device flow is running.
    pub async fn wait_for_device_authorization(&self) -> Option<PollOutcome> {
        let connector = self.device.lock().await.clone()?;
        connector.wait().await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Closes the service and stops any device flow.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(device) = self.device.lock().await.take() {
            device.close().await;
        }
        tracing::debug!(handle = %self.handle, "Client service closed");
    }

    /// Deletes every persisted record of the handle, then closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the service is already closed or the store fails.
    pub async fn remove(&self) -> Result<()> {
        self.ensure_open()?;
        self.store.remove_by_handle(&self.handle).await?;
        self.close().await;
        Ok(())
    }
}

impl std::fmt::Debug for OAuthClientService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientService")
            .field("handle", &self.handle)
            .field("closed", &self.is_closed())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

fn require_token_url(registration: &Registration) -> Result<&str> {
    registration
        .token_url
        .as_deref()
        .ok_or_else(|| OAuthError::configuration("Missing token url"))
}
