use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use authkeep_client::OAuthFactory;
use authkeep_client::config::KeeperConfig;
use authkeep_core::{AccessToken, Registration, Timestamp};
use authkeep_store::{ReapOutcome, SymmetricKeyCipher};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(dir: &tempfile::TempDir, key: &str) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.store.path = Some(dir.path().join("tokens.json"));
    config.store.cipher = Some(SymmetricKeyCipher::ID.to_string());
    config.store.key = Some(key.to_string());
    config
}

fn registration(server: &MockServer) -> Registration {
    Registration::new("calendar")
        .with_token_url(format!("{}/oauth/token", server.uri()))
        .with_authorization_url(format!("{}/oauth/authorize", server.uri()))
        .with_client_id("calendar-app")
        .with_client_secret("calendar-secret")
        .with_scope("calendar.read")
        .with_redirect_uri("https://app.example/callback")
        .with_basic_auth(true)
}

#[tokio::test]
async fn authorization_code_flow_then_refresh_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=AUTH-CODE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "first-access",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "first-refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=first-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "second-access",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tmp dir");
    let key = SymmetricKeyCipher::generate().encoded_key();

    let factory = OAuthFactory::from_config(&config(&dir, &key))
        .await
        .expect("factory");
    let service = factory
        .create_service(registration(&server))
        .await
        .expect("service");

    let url = service
        .authorization_url(None, None, Some("xyz"))
        .await
        .expect("url");
    assert!(url.starts_with(&format!("{}/oauth/authorize?response_type=code", server.uri())));

    let code = service
        .extract_auth_code("https://app.example/callback?code=AUTH-CODE&state=xyz")
        .await
        .expect("code");
    let token = service
        .access_token_by_authorization_code(&code, None)
        .await
        .expect("token");
    assert_eq!(token.access_token, "first-access");

    // Second call is served from the store.
    let cached = service.access_token().await.expect("cached").expect("present");
    assert_eq!(cached.access_token, "first-access");

    factory.shutdown().await.expect("shutdown");
    drop(factory);

    let on_disk = std::fs::read_to_string(dir.path().join("tokens.json")).expect("file");
    assert!(!on_disk.contains("first-access"));
    assert!(!on_disk.contains("calendar-secret"));

    let factory = OAuthFactory::from_config(&config(&dir, &key))
        .await
        .expect("factory after restart");
    let service = factory
        .get_service("calendar")
        .await
        .expect("lookup")
        .expect("registered");

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    service.add_listener(Arc::new(move |token: &AccessToken| {
        assert_eq!(token.access_token, "second-access");
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let refreshed = service.refresh_token().await.expect("refresh");
    assert_eq!(refreshed.access_token, "second-access");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("first-refresh"));
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_token_is_refreshed_once_for_concurrent_callers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "fresh",
                    "expires_in": 3600,
                    "refresh_token": "R2"
                }))
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let factory = OAuthFactory::from_config(&KeeperConfig::default())
        .await
        .expect("factory");
    let service = factory
        .create_service(registration(&server))
        .await
        .expect("service");
    let stale = AccessToken::new("stale")
        .with_expires_in(60)
        .with_refresh_token("R1")
        .with_created_on(Timestamp::from_unix(1_500_000_000).expect("ts"));
    service.import_access_token(&stale).await.expect("import");

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move { service.access_token().await }));
    }
    for task in tasks {
        let token = task.await.expect("join").expect("token").expect("present");
        assert_eq!(token.access_token, "fresh");
    }
}

#[tokio::test]
async fn reap_on_shutdown_removes_abandoned_handles() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let key = SymmetricKeyCipher::generate().encoded_key();
    let factory = OAuthFactory::from_config(&config(&dir, &key))
        .await
        .expect("factory");

    factory
        .create_service(Registration::new("abandoned"))
        .await
        .expect("service");
    factory
        .create_service(Registration::new("active"))
        .await
        .expect("service");

    let long_ago =
        Timestamp::from_unix(authkeep_core::now_utc().unix_timestamp() - 184 * 86_400).expect("ts");
    factory
        .store()
        .put("abandoned", authkeep_store::StorageRecord::LastUsed(long_ago))
        .await
        .expect("stamp");

    let outcome = factory.shutdown().await.expect("shutdown");
    assert_eq!(
        outcome,
        ReapOutcome::Completed {
            removed: vec!["abandoned".to_string()]
        }
    );
    assert_eq!(factory.handles().await, vec!["active".to_string()]);
}
