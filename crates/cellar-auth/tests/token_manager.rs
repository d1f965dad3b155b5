//! Token lifecycle tests against a mocked Zoho accounts server.

use std::sync::Arc;
use std::time::Duration;

use cellar_auth::store::generate_key;
use cellar_auth::{
    AuthError, EncryptedFileStore, RefreshPolicy, TokenManager, TokenStatus, TokenStore,
    ZohoOAuthConfig,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ZohoOAuthConfig {
    ZohoOAuthConfig {
        client_id: "1000.TESTCLIENT".into(),
        client_secret: "test-secret".into(),
        redirect_uri: "http://localhost:3001/auth/zoho/callback".into(),
        organization_id: "60000000001".into(),
        accounts_url: Some(server.uri()),
        ..Default::default()
    }
}

fn manager_for(server: &MockServer, policy: RefreshPolicy) -> TokenManager {
    TokenManager::new(config_for(server), policy).expect("build token manager")
}

fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> serde_json::Value {
    let mut body = json!({
        "access_token": access,
        "expires_in": expires_in,
        "api_domain": "https://www.zohoapis.com",
        "token_type": "Bearer",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

async fn mount_exchange(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn exchange_then_valid_token_needs_no_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc123"))
        .and(body_string_contains("client_id=1000.TESTCLIENT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("T1", Some("R1"), 3600)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let manager = manager_for(&server, RefreshPolicy::default());
    let creds = manager.exchange_authorization_code("abc123").await.unwrap();
    assert_eq!(creds.access_token.as_deref(), Some("T1"));
    assert_eq!(creds.refresh_token.as_deref(), Some("R1"));

    assert!(manager.is_authenticated());
    assert_eq!(manager.status(), TokenStatus::Fresh);
    assert!(manager.refresh_scheduled());
    assert_eq!(manager.valid_access_token().await.unwrap(), "T1");
    assert_eq!(manager.valid_access_token().await.unwrap(), "T1");

    manager.shutdown();
    assert!(!manager.refresh_scheduled());
}

#[tokio::test]
async fn short_lived_token_is_refreshed_on_demand() {
    let server = MockServer::start().await;
    mount_exchange(&server, token_body("T1", Some("R1"), 5)).await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=R1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("T2", None, 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server, RefreshPolicy::default());
    manager.exchange_authorization_code("abc123").await.unwrap();

    // 5s lifetime is already inside the 5 minute buffer.
    assert_eq!(manager.status(), TokenStatus::Stale);
    assert_eq!(manager.valid_access_token().await.unwrap(), "T2");

    let creds = manager.credentials();
    assert_eq!(creds.access_token.as_deref(), Some("T2"));
    // Refresh responses carry no refresh_token; the old one is kept.
    assert_eq!(creds.refresh_token.as_deref(), Some("R1"));
    assert_eq!(manager.status(), TokenStatus::Fresh);
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    mount_exchange(&server, token_body("T1", Some("R1"), 5)).await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("T2", None, 3600))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server, RefreshPolicy::default());
    manager.exchange_authorization_code("abc123").await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(
            async move { manager.valid_access_token().await },
        ));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "T2");
    }
}

#[tokio::test]
async fn rejected_code_in_ok_body_is_an_error() {
    let server = MockServer::start().await;
    mount_exchange(&server, json!({ "error": "invalid_code" })).await;

    let manager = manager_for(&server, RefreshPolicy::default());
    let err = manager
        .exchange_authorization_code("stale-code")
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::UpstreamAuth { .. }));
    assert_eq!(err.oauth_error_code(), Some("invalid_code"));
    assert!(!manager.is_authenticated());
    assert_eq!(manager.status(), TokenStatus::Unauthenticated);
    assert!(!manager.refresh_scheduled());
}

#[tokio::test]
async fn exchange_without_refresh_token_is_an_error() {
    let server = MockServer::start().await;
    mount_exchange(&server, token_body("T1", None, 3600)).await;

    let manager = manager_for(&server, RefreshPolicy::default());
    let err = manager
        .exchange_authorization_code("abc123")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("refresh_token"));
    assert_eq!(manager.status(), TokenStatus::Unauthenticated);
}

#[tokio::test]
async fn rejected_refresh_breaks_the_manager() {
    let server = MockServer::start().await;
    mount_exchange(&server, token_body("T1", Some("R1"), 5)).await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "invalid_code" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server, RefreshPolicy::default());
    manager.exchange_authorization_code("abc123").await.unwrap();

    let err = manager.valid_access_token().await.unwrap_err();
    assert!(err.requires_reauthorization());

    assert_eq!(manager.status(), TokenStatus::Broken);
    assert!(!manager.is_authenticated());
    assert!(manager.last_error().is_some());
    let creds = manager.credentials();
    assert_eq!(creds.access_token, None);
    assert_eq!(creds.refresh_token.as_deref(), Some("R1"));
}

#[tokio::test]
async fn transport_failure_keeps_token_for_retry() {
    let server = MockServer::start().await;
    mount_exchange(&server, token_body("T1", Some("R1"), 5)).await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(2)
        .mount(&server)
        .await;

    let manager = manager_for(&server, RefreshPolicy::default());
    manager.exchange_authorization_code("abc123").await.unwrap();

    assert!(manager.valid_access_token().await.is_err());
    assert_eq!(manager.status(), TokenStatus::Stale);
    assert!(manager.is_authenticated());

    // Nothing was cached from the failure; the next call asks again.
    assert!(manager.valid_access_token().await.is_err());
}

#[tokio::test]
async fn timer_refreshes_before_expiry() {
    let server = MockServer::start().await;
    mount_exchange(&server, token_body("T1", Some("R1"), 1)).await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("T2", None, 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let policy = RefreshPolicy {
        refresh_buffer: Duration::from_secs(1),
        minimum_refresh_delay: Duration::from_millis(50),
    };
    let manager = manager_for(&server, policy);
    manager.exchange_authorization_code("abc123").await.unwrap();

    let mut refreshed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if manager.credentials().access_token.as_deref() == Some("T2") {
            refreshed = true;
            break;
        }
    }
    assert!(refreshed, "scheduled refresh never ran");
    assert_eq!(manager.status(), TokenStatus::Fresh);
    // Re-armed for the new token.
    assert!(manager.refresh_scheduled());
    manager.shutdown();
}

#[tokio::test]
async fn shutdown_during_scheduled_refresh_does_not_rearm() {
    let server = MockServer::start().await;
    mount_exchange(&server, token_body("T1", Some("R1"), 1)).await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("T2", None, 3600))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let policy = RefreshPolicy {
        refresh_buffer: Duration::from_secs(1),
        minimum_refresh_delay: Duration::from_millis(50),
    };
    let manager = manager_for(&server, policy);
    manager.exchange_authorization_code("abc123").await.unwrap();

    // The timer has fired and its refresh is waiting on the slow response.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!manager.refresh_scheduled());
    manager.shutdown();

    let mut refreshed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if manager.credentials().access_token.as_deref() == Some("T2") {
            refreshed = true;
            break;
        }
    }
    assert!(refreshed, "in-flight refresh should still complete");
    assert!(!manager.refresh_scheduled());
}

#[tokio::test]
async fn restored_refresh_token_mints_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=R-persisted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("T9", None, 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server, RefreshPolicy::default());
    manager.set_refresh_token("R-persisted");
    assert_eq!(manager.status(), TokenStatus::Restored);

    assert_eq!(manager.valid_access_token().await.unwrap(), "T9");
    assert!(manager.is_authenticated());
    assert_eq!(manager.status(), TokenStatus::Fresh);
    manager.shutdown();
}

#[tokio::test]
async fn acquired_refresh_token_is_persisted() {
    let server = MockServer::start().await;
    mount_exchange(&server, token_body("T1", Some("R1"), 3600)).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zoho-token.json");
    let key = generate_key();

    let manager = manager_for(&server, RefreshPolicy::default())
        .with_store(Arc::new(EncryptedFileStore::new(&path, key)));
    manager.exchange_authorization_code("abc123").await.unwrap();
    manager.shutdown();

    let reopened = EncryptedFileStore::new(&path, key);
    assert_eq!(reopened.load().await.unwrap().as_deref(), Some("R1"));
}
