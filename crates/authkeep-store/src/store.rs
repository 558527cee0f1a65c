//! Token store facade.
//!
//! All access to the backend goes through one async mutex that also guards
//! the in-memory handle index, so the index can never disagree with the
//! records it describes. The lock is only ever held around backend calls,
//! never around network I/O.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use authkeep_core::{AccessToken, DeviceCodeGrant, Registration, Timestamp, now_utc};
use tokio::sync::Mutex;

use crate::cipher::StorageCipher;
use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::record::{INDEX_KEY, Lookup, RecordKind, StorageRecord};

/// Handles unused for longer than this are removed by [`TokenStore::reap`].
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(183 * 24 * 60 * 60);

/// How long [`TokenStore::reap`] waits for the store lock before giving up.
pub const DEFAULT_REAP_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables of a [`TokenStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub retention: Duration,
    pub reap_lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            reap_lock_timeout: DEFAULT_REAP_LOCK_TIMEOUT,
        }
    }
}

/// What a reap pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The sweep ran; these handles were removed.
    Completed { removed: Vec<String> },
    /// The lock could not be acquired in time; nothing was touched.
    Skipped,
}

/// Encrypted, indexed persistence of per-handle records.
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    cipher: Option<Arc<dyn StorageCipher>>,
    handles: Mutex<BTreeSet<String>>,
    options: StoreOptions,
}

impl TokenStore {
    /// Opens a store with default options.
    ///
    /// Passing `None` as cipher stores every secret in cleartext.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted index cannot be read.
    pub async fn open(
        backend: Arc<dyn KeyValueStore>,
        cipher: Option<Arc<dyn StorageCipher>>,
    ) -> StoreResult<Self> {
        Self::open_with_options(backend, cipher, StoreOptions::default()).await
    }

    /// Opens a store and loads the persisted handle index.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted index cannot be read.
    pub async fn open_with_options(
        backend: Arc<dyn KeyValueStore>,
        cipher: Option<Arc<dyn StorageCipher>>,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        let handles = read_index(backend.as_ref()).await?;

        match &cipher {
            Some(cipher) => tracing::info!(
                cipher = cipher.id(),
                handles = handles.len(),
                "Token store opened"
            ),
            None => tracing::warn!(
                handles = handles.len(),
                "Token store opened without a cipher, secrets are stored in cleartext"
            ),
        }

        Ok(Self {
            backend,
            cipher,
            handles: Mutex::new(handles),
            options,
        })
    }

    /// Identifier of the active cipher, if any.
    pub fn cipher_id(&self) -> Option<&str> {
        self.cipher.as_deref().map(|c| c.id())
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// All indexed handles, sorted.
    pub async fn handles(&self) -> Vec<String> {
        self.handles.lock().await.iter().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Generic record access
    // -------------------------------------------------------------------------

    /// Writes a record, stamps `LastUsed` and indexes the handle.
    ///
    /// Writing a `LastUsed` record stores the given timestamp as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend fails. Encryption
    /// failures are not errors; see [`StorageRecord`] sealing.
    pub async fn put(&self, handle: &str, record: StorageRecord) -> StoreResult<()> {
        let kind = record.kind();
        let raw = record.seal(self.cipher.as_deref())?;
        let stamp = serde_json::to_string(&now_utc())?;

        let mut handles = self.handles.lock().await;
        self.backend.put(&kind.key(handle), Some(raw)).await?;
        if kind != RecordKind::LastUsed {
            self.backend
                .put(&RecordKind::LastUsed.key(handle), Some(stamp))
                .await?;
        }

        if handles.insert(handle.to_string())
            && let Err(e) = self.write_index(&handles).await
        {
            handles.remove(handle);
            return Err(e);
        }

        tracing::debug!(handle, kind = %kind, "Stored record");
        Ok(())
    }

    /// Reads a record.
    ///
    /// Backend, parse and decrypt failures all surface as
    /// [`Lookup::Corrupt`] so they stay distinguishable from absence.
    pub async fn get(&self, handle: &str, kind: RecordKind) -> Lookup<StorageRecord> {
        let raw = {
            let _guard = self.handles.lock().await;
            self.backend.get(&kind.key(handle)).await
        };

        match raw {
            Ok(None) => Lookup::Absent,
            Ok(Some(raw)) => match StorageRecord::unseal(kind, &raw, self.cipher.as_deref()) {
                Ok(record) => Lookup::Found(record),
                Err(e) => Lookup::Corrupt(e),
            },
            Err(e) => Lookup::Corrupt(e),
        }
    }

    /// Deletes a single record kind without touching the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn discard(&self, handle: &str, kind: RecordKind) -> StoreResult<()> {
        let _guard = self.handles.lock().await;
        self.backend.remove(&kind.key(handle)).await
    }

    /// Deletes every record of `handle` and drops it from the index.
    ///
    /// Returns `false` without touching the backend when the handle is not
    /// indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn remove_by_handle(&self, handle: &str) -> StoreResult<bool> {
        let mut handles = self.handles.lock().await;
        if !handles.contains(handle) {
            return Ok(false);
        }
        self.remove_locked(&mut handles, handle).await?;
        tracing::debug!(handle, "Removed handle");
        Ok(true)
    }

    /// Deletes every indexed handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails. Handles removed before the
    /// failure stay removed.
    pub async fn remove_all(&self) -> StoreResult<()> {
        let mut handles = self.handles.lock().await;
        let all: Vec<String> = handles.iter().cloned().collect();
        for handle in &all {
            self.remove_locked(&mut handles, handle).await?;
        }
        tracing::info!(count = all.len(), "Removed all handles");
        Ok(())
    }

    /// Removes handles whose `LastUsed` is older than the retention period.
    ///
    /// Meant to run once at shutdown. The store lock is awaited for at most
    /// [`StoreOptions::reap_lock_timeout`]; if it cannot be acquired the sweep
    /// is skipped entirely. Handles with a missing or unreadable `LastUsed`
    /// are retained.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails mid-sweep.
    pub async fn reap(&self) -> StoreResult<ReapOutcome> {
        let Ok(mut handles) =
            tokio::time::timeout(self.options.reap_lock_timeout, self.handles.lock()).await
        else {
            tracing::warn!(
                timeout = ?self.options.reap_lock_timeout,
                "Token store busy, skipping reap"
            );
            return Ok(ReapOutcome::Skipped);
        };

        let mut candidates = handles.clone();
        match read_index(self.backend.as_ref()).await {
            Ok(persisted) => candidates.extend(persisted),
            Err(e) => tracing::warn!(error = %e, "Could not read persisted index during reap"),
        }

        let retention =
            time::Duration::seconds(i64::try_from(self.options.retention.as_secs()).unwrap_or(i64::MAX));
        let now = now_utc();
        let mut removed = Vec::new();

        for handle in candidates {
            let last_used = match self.backend.get(&RecordKind::LastUsed.key(&handle)).await? {
                Some(raw) => serde_json::from_str::<Timestamp>(&raw).ok(),
                None => None,
            };
            let Some(last_used) = last_used else {
                continue;
            };

            if last_used.elapsed_until(&now) > retention {
                handles.insert(handle.clone());
                self.remove_locked(&mut handles, &handle).await?;
                removed.push(handle);
            }
        }

        tracing::info!(removed = removed.len(), "Reaped expired handles");
        Ok(ReapOutcome::Completed { removed })
    }

    // -------------------------------------------------------------------------
    // Typed access
    // -------------------------------------------------------------------------

    /// Loads the cached access token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Cipher`] when the token cannot be decrypted and
    /// [`StoreError::Backend`] when the backend fails. Unparsable JSON is
    /// logged and reported as `None`.
    pub async fn load_access_token(&self, handle: &str) -> StoreResult<Option<AccessToken>> {
        let record = resolve(handle, self.get(handle, RecordKind::AccessToken).await)?;
        Ok(match record {
            Some(StorageRecord::AccessToken(token)) => Some(token),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn save_access_token(&self, handle: &str, token: &AccessToken) -> StoreResult<()> {
        self.put(handle, StorageRecord::AccessToken(token.clone())).await
    }

    /// Loads the pending device grant. Same error policy as
    /// [`load_access_token`](Self::load_access_token).
    ///
    /// # Errors
    ///
    /// Returns an error on decrypt or backend failure.
    pub async fn load_device_grant(&self, handle: &str) -> StoreResult<Option<DeviceCodeGrant>> {
        let record = resolve(handle, self.get(handle, RecordKind::DeviceCodeGrant).await)?;
        Ok(match record {
            Some(StorageRecord::DeviceCodeGrant(grant)) => Some(grant),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn save_device_grant(&self, handle: &str, grant: &DeviceCodeGrant) -> StoreResult<()> {
        self.put(handle, StorageRecord::DeviceCodeGrant(grant.clone()))
            .await
    }

    /// Loads the registration. Same error policy as
    /// [`load_access_token`](Self::load_access_token).
    ///
    /// # Errors
    ///
    /// Returns an error on decrypt or backend failure.
    pub async fn load_registration(&self, handle: &str) -> StoreResult<Option<Registration>> {
        let record = resolve(handle, self.get(handle, RecordKind::Registration).await)?;
        Ok(match record {
            Some(StorageRecord::Registration(registration)) => Some(registration),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn save_registration(&self, registration: &Registration) -> StoreResult<()> {
        self.put(
            &registration.handle,
            StorageRecord::Registration(registration.clone()),
        )
        .await
    }

    /// When `handle` was last written.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn last_used(&self, handle: &str) -> StoreResult<Option<Timestamp>> {
        let record = resolve(handle, self.get(handle, RecordKind::LastUsed).await)?;
        Ok(match record {
            Some(StorageRecord::LastUsed(ts)) => Some(ts),
            _ => None,
        })
    }

    // -------------------------------------------------------------------------
    // Lock-held helpers
    // -------------------------------------------------------------------------

    async fn remove_locked(&self, handles: &mut BTreeSet<String>, handle: &str) -> StoreResult<()> {
        for kind in RecordKind::ALL {
            self.backend.remove(&kind.key(handle)).await?;
        }
        handles.remove(handle);
        self.write_index(handles).await
    }

    async fn write_index(&self, handles: &BTreeSet<String>) -> StoreResult<()> {
        if handles.is_empty() {
            return self.backend.remove(INDEX_KEY).await;
        }
        let raw = serde_json::to_string(handles)?;
        self.backend.put(INDEX_KEY, Some(raw)).await
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("cipher", &self.cipher_id())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

async fn read_index(backend: &dyn KeyValueStore) -> StoreResult<BTreeSet<String>> {
    match backend.get(INDEX_KEY).await? {
        None => Ok(BTreeSet::new()),
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(handles) => Ok(handles),
            Err(e) => {
                tracing::warn!(error = %e, "Handle index is unreadable, starting empty");
                Ok(BTreeSet::new())
            }
        },
    }
}

/// Applies the read policy: unreadable JSON degrades to absence, decrypt and
/// backend failures propagate.
fn resolve(handle: &str, lookup: Lookup<StorageRecord>) -> StoreResult<Option<StorageRecord>> {
    match lookup {
        Lookup::Absent => Ok(None),
        Lookup::Found(record) => Ok(Some(record)),
        Lookup::Corrupt(StoreError::Serialization(e)) => {
            tracing::warn!(handle, error = %e, "Discarding unreadable record");
            Ok(None)
        }
        Lookup::Corrupt(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::SymmetricKeyCipher;
    use crate::kv::InMemoryKeyValueStore;

    fn days_ago(days: i64) -> Timestamp {
        Timestamp::new(now_utc().0 - time::Duration::days(days))
    }

    async fn open(
        kv: &Arc<InMemoryKeyValueStore>,
        cipher: Option<Arc<dyn StorageCipher>>,
    ) -> TokenStore {
        TokenStore::open(kv.clone(), cipher).await.unwrap()
    }

    fn sample_token() -> AccessToken {
        AccessToken::new("AT-1")
            .with_token_type("Bearer")
            .with_expires_in(3600)
            .with_refresh_token("R1")
            .with_scope("read write")
    }

    struct BrokenCipher;

    impl StorageCipher for BrokenCipher {
        fn id(&self) -> &str {
            "Broken"
        }
        fn encrypt(&self, _plaintext: &str) -> StoreResult<String> {
            Err(StoreError::cipher("hardware fault"))
        }
        fn decrypt(&self, ciphertext: &str) -> StoreResult<String> {
            Ok(ciphertext.to_string())
        }
    }

    #[tokio::test]
    async fn test_put_indexes_and_stamps_last_used() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = open(&kv, None).await;

        store.save_access_token("h1", &sample_token()).await.unwrap();

        assert_eq!(store.handles().await, vec!["h1".to_string()]);
        assert!(store.last_used("h1").await.unwrap().is_some());
        assert_eq!(
            kv.get(INDEX_KEY).await.unwrap().as_deref(),
            Some(r#"["h1"]"#)
        );
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        open(&kv, None)
            .await
            .save_registration(&Registration::new("h1"))
            .await
            .unwrap();

        let reopened = open(&kv, None).await;
        assert_eq!(reopened.handles().await, vec!["h1".to_string()]);
        assert!(reopened.remove_by_handle("h1").await.unwrap());
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn test_round_trip_with_cipher() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = open(&kv, Some(Arc::new(SymmetricKeyCipher::generate()))).await;
        let token = sample_token();

        store.save_access_token("h1", &token).await.unwrap();
        let raw = kv.get("h1.AccessToken").await.unwrap().unwrap();
        assert!(!raw.contains("AT-1"));
        assert!(!raw.contains("\"R1\""));

        let loaded = store.load_access_token("h1").await.unwrap().unwrap();
        assert!(loaded.same_grant(&token));
    }

    #[tokio::test]
    async fn test_round_trip_without_cipher_is_cleartext() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = open(&kv, None).await;
        let token = sample_token();

        store.save_access_token("h1", &token).await.unwrap();
        let raw = kv.get("h1.AccessToken").await.unwrap().unwrap();
        assert!(raw.contains("AT-1"));

        let loaded = store.load_access_token("h1").await.unwrap().unwrap();
        assert_eq!(loaded, token);
    }

    #[tokio::test]
    async fn test_encrypt_failure_stores_cleartext() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = open(&kv, Some(Arc::new(BrokenCipher))).await;

        store.save_access_token("h1", &sample_token()).await.unwrap();
        let raw = kv.get("h1.AccessToken").await.unwrap().unwrap();
        assert!(raw.contains("\"encrypted\":false"));

        let loaded = store.load_access_token("h1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "AT-1");
    }

    #[tokio::test]
    async fn test_decrypt_failure_is_distinct_from_absence() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        open(&kv, Some(Arc::new(SymmetricKeyCipher::generate())))
            .await
            .save_access_token("h1", &sample_token())
            .await
            .unwrap();

        let rekeyed = open(&kv, Some(Arc::new(SymmetricKeyCipher::generate()))).await;
        assert!(rekeyed.get("h1", RecordKind::AccessToken).await.is_corrupt());
        let err = rekeyed.load_access_token("h1").await.unwrap_err();
        assert!(err.is_security_error());

        assert!(rekeyed.load_access_token("h2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_json_reads_as_absent() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = open(&kv, None).await;
        kv.put("h1.DeviceCodeGrant", Some("{broken".into()))
            .await
            .unwrap();
        kv.put("h1.AccessToken", Some("[]".into())).await.unwrap();

        assert!(store.get("h1", RecordKind::DeviceCodeGrant).await.is_corrupt());
        assert!(store.load_device_grant("h1").await.unwrap().is_none());
        assert!(store.load_access_token("h1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_by_handle_unindexed_is_noop() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = open(&kv, None).await;
        kv.put("ghost.AccessToken", Some("x".into())).await.unwrap();

        assert!(!store.remove_by_handle("ghost").await.unwrap());
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_all() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = open(&kv, None).await;
        store.save_registration(&Registration::new("h1")).await.unwrap();
        store.save_access_token("h2", &sample_token()).await.unwrap();

        store.remove_all().await.unwrap();
        assert!(store.handles().await.is_empty());
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn test_reap_respects_retention() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = open(&kv, None).await;

        store.save_access_token("old", &sample_token()).await.unwrap();
        store.save_access_token("recent", &sample_token()).await.unwrap();
        store
            .put("old", StorageRecord::LastUsed(days_ago(184)))
            .await
            .unwrap();
        store
            .put("recent", StorageRecord::LastUsed(days_ago(182)))
            .await
            .unwrap();

        let outcome = store.reap().await.unwrap();
        assert_eq!(
            outcome,
            ReapOutcome::Completed {
                removed: vec!["old".to_string()]
            }
        );
        assert_eq!(store.handles().await, vec!["recent".to_string()]);
        assert!(kv.get("old.AccessToken").await.unwrap().is_none());
        assert!(store.load_access_token("recent").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reap_skips_when_lock_is_busy() {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let options = StoreOptions {
            reap_lock_timeout: Duration::from_millis(50),
            ..StoreOptions::default()
        };
        let store = TokenStore::open_with_options(kv.clone(), None, options)
            .await
            .unwrap();
        store.save_access_token("old", &sample_token()).await.unwrap();
        store
            .put("old", StorageRecord::LastUsed(days_ago(400)))
            .await
            .unwrap();

        let guard = store.handles.lock().await;
        let outcome = store.reap().await.unwrap();
        drop(guard);

        assert_eq!(outcome, ReapOutcome::Skipped);
        assert!(kv.get("old.AccessToken").await.unwrap().is_some());
    }
}
