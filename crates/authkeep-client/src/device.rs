//! Device authorization grant (RFC 8628).
//!
//! The client service only sees the [`DeviceCodeConnector`] contract: hand
//! out a device grant to show to the user, and stop. Everything between,
//! polling the token endpoint until the user approves, lives in
//! [`Rfc8628Connector`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use authkeep_core::{DeviceCodeGrant, OAuthError, Result};
use authkeep_store::{RecordKind, TokenStore};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connector::{ClientAuth, OAuthConnector};
use crate::listener::ListenerSet;

/// Seconds added to the polling interval on `slow_down` (RFC 8628 3.5).
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// A device-code exchange driven on behalf of one handle.
#[async_trait]
pub trait DeviceCodeConnector: Send + Sync {
    /// Returns the grant the user has to approve, starting the background
    /// exchange if it is not running yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the device authorization request fails or the
    /// grant cannot be persisted.
    async fn device_code_grant(&self) -> Result<DeviceCodeGrant>;

    /// Waits until the background exchange ends. `None` when it was never
    /// started or its task failed.
    async fn wait(&self) -> Option<PollOutcome>;

    /// Stops polling and forgets the pending grant.
    async fn close(&self);
}

/// Endpoints and credentials of a device flow.
#[derive(Debug, Clone)]
pub struct DeviceFlowParams {
    pub handle: String,
    pub token_url: String,
    pub device_url: String,
    pub scope: String,
    pub auth: ClientAuth,
}

/// How a polling task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The user approved; the token was stored and listeners notified.
    Authorized,
    /// The device code expired before approval.
    Expired,
    /// The provider rejected the grant with this error code.
    Denied(String),
    /// The flow was closed.
    Cancelled,
}

struct DeviceFlow {
    params: DeviceFlowParams,
    store: Arc<TokenStore>,
    connector: OAuthConnector,
    listeners: Arc<ListenerSet>,
}

/// A running (or finished) polling task.
struct Polling {
    task: Option<JoinHandle<PollOutcome>>,
    outcome: watch::Receiver<Option<PollOutcome>>,
}

/// [`DeviceCodeConnector`] polling the token endpoint from a spawned task.
pub struct Rfc8628Connector {
    flow: Arc<DeviceFlow>,
    cancel: CancellationToken,
    polling: Mutex<Option<Polling>>,
}

impl Rfc8628Connector {
    pub fn new(
        params: DeviceFlowParams,
        store: Arc<TokenStore>,
        connector: OAuthConnector,
        listeners: Arc<ListenerSet>,
    ) -> Self {
        Self {
            flow: Arc::new(DeviceFlow {
                params,
                store,
                connector,
                listeners,
            }),
            cancel: CancellationToken::new(),
            polling: Mutex::new(None),
        }
    }

    async fn start_polling(&self, grant: DeviceCodeGrant) {
        let mut polling = self.polling.lock().await;
        if polling.is_some() {
            return;
        }
        let flow = Arc::clone(&self.flow);
        let cancel = self.cancel.clone();
        let (sender, outcome) = watch::channel(None);
        let task = tokio::spawn(async move {
            let outcome = poll(flow, grant, cancel).await;
            sender.send_replace(Some(outcome.clone()));
            outcome
        });
        *polling = Some(Polling {
            task: Some(task),
            outcome,
        });
    }
}

#[async_trait]
impl DeviceCodeConnector for Rfc8628Connector {
    async fn device_code_grant(&self) -> Result<DeviceCodeGrant> {
        let flow = &self.flow;
        let handle = flow.params.handle.as_str();

        if let Some(grant) = flow.store.load_device_grant(handle).await? {
            if !grant.is_expired() {
                tracing::debug!(handle, "Resuming stored device code grant");
                self.start_polling(grant.clone()).await;
                return Ok(grant);
            }
            flow.store
                .discard(handle, RecordKind::DeviceCodeGrant)
                .await?;
        }

        let grant = flow
            .connector
            .request_device_code(
                &flow.params.device_url,
                &flow.params.auth,
                Some(&flow.params.scope),
            )
            .await?;
        flow.store.save_device_grant(handle, &grant).await?;
        tracing::info!(
            handle,
            user_code = %grant.user_code,
            verification_uri = %grant.verification_uri,
            "Device authorization started"
        );

        self.start_polling(grant.clone()).await;
        Ok(grant)
    }

    async fn wait(&self) -> Option<PollOutcome> {
        let mut outcome = self.polling.lock().await.as_ref()?.outcome.clone();
        // The sender only goes away without a value when the task panicked.
        let finished = outcome.wait_for(Option::is_some).await.ok()?;
        finished.clone()
    }

    async fn close(&self) {
        self.cancel.cancel();
        let task = self
            .polling
            .lock()
            .await
            .as_mut()
            .and_then(|polling| polling.task.take());
        let Some(task) = task else {
            return;
        };
        let completed = matches!(task.await, Ok(PollOutcome::Authorized));
        if !completed
            && let Err(e) = self
                .flow
                .store
                .discard(&self.flow.params.handle, RecordKind::DeviceCodeGrant)
                .await
        {
            tracing::warn!(error = %e, "Failed to discard device code grant");
        }
    }
}

impl Drop for Rfc8628Connector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll(flow: Arc<DeviceFlow>, grant: DeviceCodeGrant, cancel: CancellationToken) -> PollOutcome {
    let handle = flow.params.handle.as_str();
    let mut interval = Duration::from_secs(grant.interval.max(1));

    let outcome = loop {
        if grant.is_expired() {
            break PollOutcome::Expired;
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(interval) => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            result = flow.connector.grant_device_code(
                &flow.params.token_url,
                &flow.params.auth,
                &grant.device_code,
            ) => result,
        };

        match result {
            Ok(token) => {
                if let Err(e) = flow.store.save_access_token(handle, &token).await {
                    tracing::error!(handle, error = %e, "Failed to store device flow token");
                    break PollOutcome::Denied("storage_error".to_string());
                }
                if let Err(e) = flow.store.discard(handle, RecordKind::DeviceCodeGrant).await {
                    tracing::warn!(handle, error = %e, "Failed to discard device code grant");
                }
                tracing::info!(handle, "Device authorization completed");
                flow.listeners.notify(&token);
                return PollOutcome::Authorized;
            }
            Err(OAuthError::Protocol(e)) if e.error == "authorization_pending" => {}
            Err(OAuthError::Protocol(e)) if e.error == "slow_down" => {
                interval += SLOW_DOWN_INCREMENT;
                tracing::debug!(handle, ?interval, "Provider asked to slow down");
            }
            Err(OAuthError::Protocol(e)) => break PollOutcome::Denied(e.error),
            Err(OAuthError::UnexpectedStatus { status }) if status >= 500 => {
                tracing::warn!(handle, status, "Token endpoint unavailable, retrying");
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(handle, error = %e, "Device code poll failed, retrying");
            }
            Err(e) => {
                tracing::warn!(handle, error = %e, "Device code poll failed");
                break PollOutcome::Denied(e.to_string());
            }
        }
    };

    tracing::info!(handle, ?outcome, "Device authorization ended");
    if let Err(e) = flow.store.discard(handle, RecordKind::DeviceCodeGrant).await {
        tracing::warn!(handle, error = %e, "Failed to discard device code grant");
    }
    outcome
}
