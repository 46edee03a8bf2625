//! End-to-end session lifecycle flows against a mock backend:
//! login/register/logout, 401-triggered refresh with single replay, and
//! the single-flight guarantee under concurrent failures.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shopfront_core::auth::{StoredSession, TokenStore};
use shopfront_core::{ApiError, Config, SessionStatus, Storefront, User};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn storefront(base_url: &str, dir: &Path) -> Storefront {
    // Use RUST_LOG to surface crate logs while debugging a test run.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    Storefront::new(Config {
        base_url: base_url.to_string(),
        request_timeout_secs: 5,
        keychain: false,
        session_dir: Some(dir.to_path_buf()),
    })
    .expect("storefront should build")
}

/// Seed the storage directory with an authenticated session whose access
/// token the mock backend will treat as expired.
fn seed_stale_session(dir: &Path) {
    let store = TokenStore::new(dir.to_path_buf(), false);
    store.save(StoredSession {
        user: User {
            id: 1,
            email: "u@x.com".to_string(),
        },
        access_token: "stale-access".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        saved_at: Utc::now(),
    });
}

#[tokio::test]
async fn login_with_valid_credentials_authenticates_and_persists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_partial_json(serde_json::json!({
            "email": "u@x.com",
            "password": "p"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 42,
            "email": "u@x.com",
            "accessToken": "access-42",
            "refreshToken": "refresh-42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let shop = storefront(&server.uri(), dir.path());
    assert_eq!(shop.session().status(), SessionStatus::Anonymous);

    let user = shop
        .session()
        .login("u@x.com", "p")
        .await
        .expect("login should succeed");
    assert_eq!(user.id, 42);
    assert_eq!(shop.session().status(), SessionStatus::Authenticated);
    assert_eq!(shop.session().access_token().as_deref(), Some("access-42"));

    // The token store mirrors the session durably.
    let stored = TokenStore::new(dir.path().to_path_buf(), false)
        .load()
        .expect("session should be persisted");
    assert_eq!(stored.access_token, "access-42");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-42"));
    assert_eq!(stored.user.email, "u@x.com");
}

#[tokio::test]
async fn rejected_login_returns_to_anonymous_with_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "message": "Invalid email or password"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let shop = storefront(&server.uri(), dir.path());

    let err = shop
        .session()
        .login("u@x.com", "wrong")
        .await
        .expect_err("login should be rejected");
    assert!(matches!(err, ApiError::AuthFailed(ref m) if m == "Invalid email or password"));

    let snapshot = shop.session().snapshot();
    assert_eq!(snapshot.status, SessionStatus::Anonymous);
    assert_eq!(snapshot.last_error.as_deref(), Some("Invalid email or password"));
    assert!(shop.session().access_token().is_none());
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_replayed_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(header("authorization", "Bearer stale-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_partial_json(serde_json::json!({
            "refreshToken": "refresh-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "fresh-access"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(header("authorization", "Bearer fresh-access"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "orders": [] })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    seed_stale_session(dir.path());
    let shop = storefront(&server.uri(), dir.path());

    let body: serde_json::Value = shop
        .api()
        .get("/orders")
        .await
        .expect("request should succeed after transparent refresh");
    assert_eq!(body["orders"], serde_json::json!([]));
    assert_eq!(shop.session().status(), SessionStatus::Authenticated);

    // Any request built after the refresh resolves reads the new token.
    let _: serde_json::Value = shop.api().get("/orders").await.expect("second request");

    // The rotated document keeps the old refresh credential when the
    // server does not rotate it.
    let stored = TokenStore::new(dir.path().to_path_buf(), false)
        .load()
        .expect("session should still be persisted");
    assert_eq!(stored.access_token, "fresh-access");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn failed_refresh_is_terminal_and_clears_storage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "message": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    seed_stale_session(dir.path());
    let shop = storefront(&server.uri(), dir.path());

    let err = shop
        .api()
        .get::<serde_json::Value>("/orders")
        .await
        .expect_err("request should fail when refresh fails");
    assert!(matches!(err, ApiError::Unauthorized));

    let snapshot = shop.session().snapshot();
    assert_eq!(snapshot.status, SessionStatus::LoggedOut);
    assert!(snapshot.user.is_none());
    assert!(shop.session().access_token().is_none());
    assert!(TokenStore::new(dir.path().to_path_buf(), false)
        .load()
        .is_none());
}

#[tokio::test]
async fn replayed_request_that_fails_again_is_never_sent_a_third_time() {
    let server = MockServer::start().await;
    // The backend rejects this token no matter how often it is presented.
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "fresh-access"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    seed_stale_session(dir.path());
    let shop = storefront(&server.uri(), dir.path());

    let err = shop
        .api()
        .get::<serde_json::Value>("/orders")
        .await
        .expect_err("second 401 must be terminal");
    assert!(matches!(err, ApiError::Unauthorized));
    assert_eq!(shop.session().status(), SessionStatus::LoggedOut);
    assert!(TokenStore::new(dir.path().to_path_buf(), false)
        .load()
        .is_none());
}

#[tokio::test]
async fn concurrent_failures_share_a_single_refresh_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(header("authorization", "Bearer stale-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;
    // The delay holds the refresh open long enough for all three failed
    // requests to join it.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_json(serde_json::json!({ "accessToken": "fresh-access" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(header("authorization", "Bearer fresh-access"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "orders": [] })),
        )
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    seed_stale_session(dir.path());
    let shop = Arc::new(storefront(&server.uri(), dir.path()));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let shop = Arc::clone(&shop);
        handles.push(tokio::spawn(async move {
            shop.api().get::<serde_json::Value>("/orders").await
        }));
    }
    for handle in handles {
        handle
            .await
            .unwrap()
            .expect("every request should succeed with the shared fresh token");
    }
    assert_eq!(shop.session().status(), SessionStatus::Authenticated);
    assert_eq!(
        shop.session().access_token().as_deref(),
        Some("fresh-access")
    );
}

#[tokio::test]
async fn register_never_authenticates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .and(body_partial_json(serde_json::json!({
            "email": "new@x.com",
            "name": "Ada"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "message": "account created"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let shop = storefront(&server.uri(), dir.path());

    let registration = shopfront_core::Registration {
        email: "new@x.com".to_string(),
        password: "p".to_string(),
        name: "Ada".to_string(),
        surname: "Lovelace".to_string(),
        phone: "555-0100".to_string(),
        dob: "1990-12-10".to_string(),
    };
    shop.session()
        .register(&registration)
        .await
        .expect("registration should succeed");

    // No implicit login: the session is untouched either way.
    assert_eq!(shop.session().status(), SessionStatus::Anonymous);
    assert!(shop.session().access_token().is_none());
}

#[tokio::test]
async fn rejected_registration_surfaces_message_and_leaves_session_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "message": "email already in use"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let shop = storefront(&server.uri(), dir.path());

    let registration = shopfront_core::Registration {
        email: "new@x.com".to_string(),
        password: "p".to_string(),
        name: "Ada".to_string(),
        surname: "Lovelace".to_string(),
        phone: "555-0100".to_string(),
        dob: "1990-12-10".to_string(),
    };
    let err = shop
        .session()
        .register(&registration)
        .await
        .expect_err("registration should be rejected");
    assert!(matches!(err, ApiError::AuthFailed(ref m) if m == "email already in use"));
    assert_eq!(shop.session().status(), SessionStatus::Anonymous);
    assert!(shop.session().snapshot().last_error.is_none());
}

#[tokio::test]
async fn logout_drops_the_session_and_is_idempotent() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    seed_stale_session(dir.path());
    let shop = storefront(&server.uri(), dir.path());
    assert_eq!(shop.session().status(), SessionStatus::Authenticated);

    shop.session().logout();
    assert_eq!(shop.session().status(), SessionStatus::LoggedOut);
    assert!(shop.session().access_token().is_none());
    assert!(TokenStore::new(dir.path().to_path_buf(), false)
        .load()
        .is_none());

    // Logging out again changes nothing and still does not error.
    shop.session().logout();
    assert_eq!(shop.session().status(), SessionStatus::LoggedOut);
}
