use std::sync::Arc;

use authkeep_core::{AccessToken, DeviceCodeGrant, Registration};
use authkeep_store::{
    CipherRegistry, JsonFileStore, KeyValueStore, SymmetricKeyCipher, TokenStore,
};

#[tokio::test]
async fn tokens_persist_across_restarts_with_selected_cipher() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("authkeep.json");
    let key = SymmetricKeyCipher::generate().encoded_key();

    let mut registry = CipherRegistry::new();
    registry.register(Arc::new(
        SymmetricKeyCipher::from_encoded_key(&key).expect("key"),
    ));
    let cipher = registry.select(SymmetricKeyCipher::ID).expect("cipher");

    let backend = Arc::new(JsonFileStore::open(&path).await.expect("open"));
    let store = TokenStore::open(backend, Some(cipher.clone()))
        .await
        .expect("store");

    let registration = Registration::new("github")
        .with_token_url("https://idp.example/token")
        .with_client_id("cid")
        .with_client_secret("very-secret");
    let token = AccessToken::new("AT-42")
        .with_refresh_token("RT-42")
        .with_expires_in(600);
    let grant = DeviceCodeGrant::new("DC", "WDJB-MJHT", "https://idp.example/device", 900);

    store.save_registration(&registration).await.expect("save reg");
    store.save_access_token("github", &token).await.expect("save token");
    store.save_device_grant("github", &grant).await.expect("save grant");
    drop(store);

    let on_disk = std::fs::read_to_string(&path).expect("read file");
    for secret in ["very-secret", "AT-42", "RT-42", "WDJB-MJHT"] {
        assert!(!on_disk.contains(secret), "{secret} leaked to disk");
    }

    let backend = Arc::new(JsonFileStore::open(&path).await.expect("reopen"));
    let store = TokenStore::open(backend.clone(), Some(cipher))
        .await
        .expect("store");

    assert_eq!(store.handles().await, vec!["github".to_string()]);
    assert_eq!(
        store.load_registration("github").await.expect("load reg"),
        Some(registration)
    );
    let loaded = store
        .load_access_token("github")
        .await
        .expect("load token")
        .expect("token present");
    assert!(loaded.same_grant(&token));
    let loaded_grant = store
        .load_device_grant("github")
        .await
        .expect("load grant")
        .expect("grant present");
    assert_eq!(loaded_grant.user_code, "WDJB-MJHT");

    assert!(store.remove_by_handle("github").await.expect("remove"));
    assert!(backend.get("INDEX_HANDLES").await.expect("get").is_none());
}

#[tokio::test]
async fn unknown_cipher_identifier_is_a_startup_error() {
    let mut registry = CipherRegistry::new();
    registry.register(Arc::new(SymmetricKeyCipher::generate()));

    let err = registry.select("AesCbcLegacy").err().expect("must fail");
    assert_eq!(err.to_string(), "No cipher registered for 'AesCbcLegacy'");
}
