//! Session establishment and Graph requests against a mock tenant.

mod common;

use std::time::{Duration, Instant};

use reqwest::Method;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{TOKEN_PATH, config_for, jwt_expiring_in, token_response};
use graph_gate::auth::AuthError;
use graph_gate::{AuthMethod, ErrorKind, GraphError, RetryError, SessionManager};

async fn mount_client_credentials_token(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(access_token, None)))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_client_secret_session_and_request() {
    let server = MockServer::start().await;
    let access = jwt_expiring_in(3600);

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("client_secret=s3cret"))
        .and(body_string_contains("scope="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response(&access, None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/sites/root"))
        .and(header("authorization", format!("Bearer {access}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "root-site" })))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = config_for(&server, AuthMethod::ClientCredentials);
    config.auth.client_secret = "s3cret".into();
    let manager = SessionManager::new(config);

    assert!(manager.ensure_session(false).await.unwrap());
    assert!(manager.is_connected().await);
    // Already established: no second token request
    assert!(manager.ensure_session(false).await.unwrap());

    let client = manager.client().await.unwrap();
    let cancel = CancellationToken::new();
    for _ in 0..2 {
        let site: serde_json::Value = client.get_json("sites/root", &cancel).await.unwrap();
        assert_eq!(site["id"], "root-site");
    }
}

#[tokio::test]
async fn test_certificate_session_sends_assertion() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("app.pem");
    std::fs::write(&cert_path, include_str!("fixtures/app_cert.pem")).unwrap();

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("client_assertion_type="))
        .and(body_string_contains("client_assertion=ey"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_response(&jwt_expiring_in(3600), None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server, AuthMethod::ClientCredentials);
    config.auth.certificate_path = Some(cert_path);
    let manager = SessionManager::new(config);

    assert!(manager.ensure_session(false).await.unwrap());
}

#[tokio::test]
async fn test_missing_credentials_fail_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let manager = SessionManager::new(config_for(&server, AuthMethod::ClientCredentials));
    let err = manager.ensure_session(false).await.unwrap_err();

    assert!(matches!(err, GraphError::Config(_)));
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn test_unsupported_scope_fails_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_scope",
            "error_description": "AADSTS70011: The provided value for the input parameter 'scope' is not valid."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server, AuthMethod::ClientCredentials);
    config.auth.client_secret = "s3cret".into();
    let manager = SessionManager::new(config);

    let err = manager.ensure_session(false).await.unwrap_err();
    assert!(matches!(err, GraphError::Auth(AuthError::UnsupportedScope(_))));
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn test_throttled_request_honors_retry_after() {
    let server = MockServer::start().await;
    mount_client_credentials_token(&server, &jwt_expiring_in(3600)).await;

    // First attempt is throttled, the second succeeds
    Mock::given(method("GET"))
        .and(path("/v1.0/me/drive"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me/drive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "drive" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server, AuthMethod::ClientCredentials);
    config.auth.client_secret = "s3cret".into();
    let manager = SessionManager::new(config);
    manager.ensure_session(false).await.unwrap();

    let client = manager.client().await.unwrap();
    let started = Instant::now();
    let drive: serde_json::Value = client
        .get_json("me/drive", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(drive["id"], "drive");
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    mount_client_credentials_token(&server, &jwt_expiring_in(3600)).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": "InvalidAuthenticationToken", "message": "Access token has expired." }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server, AuthMethod::ClientCredentials);
    config.auth.client_secret = "s3cret".into();
    let manager = SessionManager::new(config);
    manager.ensure_session(false).await.unwrap();

    let client = manager.client().await.unwrap();
    let err = client
        .send(Method::GET, "me", None, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        RetryError::Fatal(e) => {
            assert_eq!(e.kind(), ErrorKind::Auth);
            assert!(e.to_string().contains("InvalidAuthenticationToken"));
        }
        other => panic!("expected a fatal error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_retry_exhaustion_reports_attempts() {
    let server = MockServer::start().await;
    mount_client_credentials_token(&server, &jwt_expiring_in(3600)).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = config_for(&server, AuthMethod::ClientCredentials);
    config.auth.client_secret = "s3cret".into();
    config.retry.max_attempts = 3;
    let manager = SessionManager::new(config);
    manager.ensure_session(false).await.unwrap();

    let err = manager
        .client()
        .await
        .unwrap()
        .send(Method::GET, "me", None, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        RetryError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.kind(), ErrorKind::Transient);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_then_reconnect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_response(&jwt_expiring_in(3600), None)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let mut config = config_for(&server, AuthMethod::ClientCredentials);
    config.auth.client_secret = "s3cret".into();
    let manager = SessionManager::new(config);

    manager.ensure_session(false).await.unwrap();
    manager.disconnect().await;
    assert!(matches!(manager.client().await, Err(GraphError::NotConnected)));

    manager.ensure_session(false).await.unwrap();
    assert!(manager.transfer_client().await.is_ok());
}
