use std::sync::Arc;
use std::time::Duration;

use authkeep_client::{ClientAuth, OAuthConnector, ReqwestTransport};
use authkeep_core::OAuthError;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector() -> OAuthConnector {
    OAuthConnector::new(Arc::new(ReqwestTransport::new().expect("transport")))
}

fn confidential(basic_auth: bool) -> ClientAuth {
    ClientAuth {
        client_id: Some("cid".into()),
        client_secret: Some("csecret".into()),
        basic_auth,
        extra_fields: Vec::new(),
    }
}

#[tokio::test]
async fn client_credentials_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("Authorization", "Basic Y2lkOmNzZWNyZXQ="))
        .and(header("Accept", "application/json"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scope=api%3Aread"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "server-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = connector()
        .grant_client_credentials(
            &format!("{}/token", server.uri()),
            &confidential(true),
            Some("api:read"),
        )
        .await
        .expect("token");

    assert_eq!(token.access_token, "server-token");
    assert_eq!(token.token_type.as_deref(), Some("Bearer"));
    assert_eq!(token.expires_in, 3600);

    let received = server.received_requests().await.expect("recording enabled");
    let body = String::from_utf8_lossy(&received[0].body).to_string();
    assert!(!body.contains("client_secret"));
}

#[tokio::test]
async fn body_credentials_without_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("client_id=cid"))
        .and(body_string_contains("client_secret=csecret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "t",
            "expires_in": 60
        })))
        .expect(1)
        .mount(&server)
        .await;

    connector()
        .grant_password(
            &format!("{}/token", server.uri()),
            &confidential(false),
            "alice",
            "wonderland",
            None,
        )
        .await
        .expect("token");

    let received = server.received_requests().await.expect("recording enabled");
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn structured_error_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "Client authentication failed",
            "error_uri": "https://idp.example/docs/errors#invalid_client"
        })))
        .mount(&server)
        .await;

    let err = connector()
        .grant_client_credentials(&server.uri(), &confidential(false), None)
        .await
        .expect_err("must fail");

    let protocol = err.protocol_error().expect("protocol error");
    assert_eq!(protocol.error, "invalid_client");
    assert_eq!(
        protocol.uri.as_deref(),
        Some("https://idp.example/docs/errors#invalid_client")
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn unexpected_status_and_unparsable_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/proxy"))
        .respond_with(ResponseTemplate::new(400).set_body_string("<html>Bad Request</html>"))
        .mount(&server)
        .await;

    let connector = connector();
    let auth = confidential(false);

    let err = connector
        .grant_client_credentials(&format!("{}/down", server.uri()), &auth, None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, OAuthError::UnexpectedStatus { status: 502 }));

    let err = connector
        .grant_client_credentials(&format!("{}/html", server.uri()), &auth, None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, OAuthError::Format { .. }));

    let err = connector
        .grant_client_credentials(&format!("{}/proxy", server.uri()), &auth, None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, OAuthError::Service { .. }));
    assert!(err.to_string().contains("Bad Request"));
}

#[tokio::test]
async fn slow_endpoint_times_out_as_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "late" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = connector()
        .with_request_timeout(Duration::from_millis(200))
        .grant_client_credentials(&server.uri(), &confidential(false), None)
        .await
        .expect_err("must time out");

    assert!(matches!(err, OAuthError::Transport { timed_out: true, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    let err = connector()
        .grant_client_credentials("http://127.0.0.1:9/token", &confidential(false), None)
        .await
        .expect_err("must fail");
    assert!(err.is_retryable());
}
