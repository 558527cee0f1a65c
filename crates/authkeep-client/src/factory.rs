//! Composition root for client services.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use authkeep_core::{OAuthError, Registration, Result};
use authkeep_store::{
    CipherRegistry, InMemoryKeyValueStore, JsonFileStore, KeyValueStore, ReapOutcome,
    StorageCipher, SymmetricKeyCipher, TokenStore,
};
use tokio::sync::Mutex;

use crate::config::{KeeperConfig, StoreConfig};
use crate::connector::{DEFAULT_REQUEST_TIMEOUT, OAuthConnector};
use crate::service::OAuthClientService;
use crate::transport::{HttpTransport, ReqwestTransport};

/// Creates, tracks and disposes of [`OAuthClientService`]s sharing one store
/// and one transport.
pub struct OAuthFactory {
    store: Arc<TokenStore>,
    transport: Arc<dyn HttpTransport>,
    request_timeout: Duration,
    services: Mutex<HashMap<String, Arc<OAuthClientService>>>,
}

impl OAuthFactory {
    pub fn new(store: Arc<TokenStore>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            store,
            transport,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            services: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builds the store, cipher and reqwest transport described by `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configured cipher is unknown or
    /// its key is invalid, and a storage error if the store cannot be opened.
    pub async fn from_config(config: &KeeperConfig) -> Result<Self> {
        let backend: Arc<dyn KeyValueStore> = match &config.store.path {
            Some(path) => Arc::new(JsonFileStore::open(path).await?),
            None => Arc::new(InMemoryKeyValueStore::new()),
        };
        let cipher = select_cipher(&config.store)?;
        let store = TokenStore::open_with_options(backend, cipher, config.store.options()).await?;
        let transport = ReqwestTransport::new()?;

        Ok(Self::new(Arc::new(store), Arc::new(transport))
            .with_request_timeout(config.http.request_timeout))
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    fn build(&self, registration: Registration) -> Arc<OAuthClientService> {
        let connector = OAuthConnector::new(Arc::clone(&self.transport))
            .with_request_timeout(self.request_timeout);
        Arc::new(OAuthClientService::new(
            registration,
            Arc::clone(&self.store),
            connector,
        ))
    }

    /// Registers a handle, replacing any previous registration of the same
    /// handle, and returns its service.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty handle, or a storage error.
    pub async fn create_service(&self, registration: Registration) -> Result<Arc<OAuthClientService>> {
        if registration.handle.trim().is_empty() {
            return Err(OAuthError::configuration("Handle must not be empty"));
        }
        self.store.save_registration(&registration).await?;

        let handle = registration.handle.clone();
        let service = self.build(registration);
        let previous = self
            .services
            .lock()
            .await
            .insert(handle.clone(), Arc::clone(&service));
        if let Some(previous) = previous {
            previous.close().await;
        }

        tracing::info!(handle = %handle, "Registered OAuth client");
        Ok(service)
    }

    /// Returns the live service of `handle`, rebuilding it from the persisted
    /// registration when needed. `None` when the handle is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration cannot be read.
    pub async fn get_service(&self, handle: &str) -> Result<Option<Arc<OAuthClientService>>> {
        let mut services = self.services.lock().await;
        if let Some(service) = services.get(handle)
            && !service.is_closed()
        {
            return Ok(Some(Arc::clone(service)));
        }

        let Some(registration) = self.store.load_registration(handle).await? else {
            services.remove(handle);
            return Ok(None);
        };
        let service = self.build(registration);
        services.insert(handle.to_string(), Arc::clone(&service));
        Ok(Some(service))
    }

    /// Closes and forgets the live service of `handle`. Persisted records
    /// are kept.
    pub async fn unget_service(&self, handle: &str) {
        let service = self.services.lock().await.remove(handle);
        if let Some(service) = service {
            service.close().await;
        }
    }

    /// Deletes every persisted record of `handle` and closes its service.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn delete_service_and_access_token(&self, handle: &str) -> Result<()> {
        let service = self.services.lock().await.remove(handle);
        self.store.remove_by_handle(handle).await?;
        if let Some(service) = service {
            service.close().await;
        }
        tracing::info!(handle, "Deleted OAuth client");
        Ok(())
    }

    /// All persisted handles.
    pub async fn handles(&self) -> Vec<String> {
        self.store.handles().await
    }

    /// Closes every live service, then reaps the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the reap fails mid-sweep.
    pub async fn shutdown(&self) -> Result<ReapOutcome> {
        let services: Vec<_> = self.services.lock().await.drain().map(|(_, s)| s).collect();
        for service in services {
            service.close().await;
        }
        Ok(self.store.reap().await?)
    }
}

impl std::fmt::Debug for OAuthFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthFactory")
            .field("store", &self.store)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Registers the built-in ciphers and selects the configured one.
fn select_cipher(config: &StoreConfig) -> Result<Option<Arc<dyn StorageCipher>>> {
    let Some(target) = config.cipher.as_deref() else {
        return Ok(None);
    };

    let mut registry = CipherRegistry::new();
    if let Some(key) = config.key.as_deref() {
        registry.register(Arc::new(SymmetricKeyCipher::from_encoded_key(key)?));
    }
    Ok(Some(registry.select(target)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    async fn factory(transport: &Arc<MockTransport>) -> OAuthFactory {
        let store = TokenStore::open(Arc::new(InMemoryKeyValueStore::new()), None)
            .await
            .unwrap();
        OAuthFactory::new(Arc::new(store), transport.clone())
    }

    #[tokio::test]
    async fn test_create_get_unget() {
        let transport = MockTransport::new();
        let factory = factory(&transport).await;

        let created = factory
            .create_service(Registration::new("h1").with_client_id("cid"))
            .await
            .unwrap();
        let fetched = factory.get_service("h1").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));

        factory.unget_service("h1").await;
        assert!(created.is_closed());

        let rebuilt = factory.get_service("h1").await.unwrap().unwrap();
        assert!(!rebuilt.is_closed());
        assert_eq!(rebuilt.registration().await.client_id.as_deref(), Some("cid"));

        assert!(factory.get_service("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_service() {
        let transport = MockTransport::new();
        let factory = factory(&transport).await;

        let first = factory.create_service(Registration::new("h1")).await.unwrap();
        let second = factory
            .create_service(Registration::new("h1").with_scope("new"))
            .await
            .unwrap();

        assert!(first.is_closed());
        assert_eq!(
            factory.store().load_registration("h1").await.unwrap().unwrap().scope.as_deref(),
            Some("new")
        );
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let transport = MockTransport::new();
        let factory = factory(&transport).await;
        let service = factory.create_service(Registration::new("h1")).await.unwrap();
        service
            .import_access_token(&authkeep_core::AccessToken::new("AT"))
            .await
            .unwrap();

        factory.delete_service_and_access_token("h1").await.unwrap();
        assert!(service.is_closed());
        assert!(factory.handles().await.is_empty());
        assert!(factory.get_service("h1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_handle_is_rejected() {
        let transport = MockTransport::new();
        let factory = factory(&transport).await;
        let err = factory.create_service(Registration::new(" ")).await.unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_shutdown_closes_services_and_reaps() {
        let transport = MockTransport::new();
        let factory = factory(&transport).await;
        let service = factory.create_service(Registration::new("h1")).await.unwrap();

        let outcome = factory.shutdown().await.unwrap();
        assert_eq!(outcome, ReapOutcome::Completed { removed: vec![] });
        assert!(service.is_closed());
        assert_eq!(factory.handles().await, vec!["h1".to_string()]);
    }

    #[test]
    fn test_unknown_cipher_fails_selection() {
        let config = StoreConfig {
            cipher: Some("Rot13".into()),
            key: Some(SymmetricKeyCipher::generate().encoded_key()),
            ..StoreConfig::default()
        };
        let err = select_cipher(&config).err().unwrap();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_no_cipher_configured_is_cleartext_mode() {
        assert!(select_cipher(&StoreConfig::default()).unwrap().is_none());
    }
}
