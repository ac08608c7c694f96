//! Integration tests for transparent token refresh.
//!
//! These tests run the client against a mock Campus backend over real HTTP
//! and check how expired tokens, concurrent callers, and refresh failures are
//! handled.

mod mock_backend;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use campus_client::{
    ApiClient, ApiError, AuthSession, ClientConfig, Credentials, MemoryTokenStore, TokenStore,
};
use mock_backend::{spawn_test_server, Backend, EMAIL, PASSWORD};
use serde_json::{json, Value};

/// Builds a logged-in session against `base_url`.
async fn logged_in_session(base_url: &str) -> AuthSession {
    let session = session_for(base_url);
    session
        .login(&Credentials::new(EMAIL, PASSWORD))
        .await
        .expect("login failed");
    session
}

fn session_for(base_url: &str) -> AuthSession {
    let config = ClientConfig {
        base_url: base_url.to_string(),
        ..ClientConfig::default()
    };
    let client = ApiClient::builder(base_url)
        .token_store(Arc::new(MemoryTokenStore::new()))
        .build()
        .expect("client");
    AuthSession::new(client, &config)
}

// ============================================================================
// Single request
// ============================================================================

/// Tests that an expired token is refreshed and the request retried once.
#[tokio::test]
async fn test_expired_token_is_refreshed_transparently() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = logged_in_session(&base_url).await;
    let client = session.client();

    let before = client.token().unwrap().expect("token after login");
    backend.expire_tokens();

    let dashboard: Value = client.get("/student/dashboard").await.unwrap();

    assert_eq!(dashboard["courses"], 3);
    assert_eq!(backend.refresh_count(), 1);
    // First attempt plus exactly one retry
    assert_eq!(backend.dashboard_calls.load(Ordering::SeqCst), 2);

    let after = client.token().unwrap().expect("token after refresh");
    assert_ne!(before, after);
}

/// Tests that a valid token never touches the refresh endpoint.
#[tokio::test]
async fn test_valid_token_does_not_refresh() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = logged_in_session(&base_url).await;

    let _: Value = session.client().get("/student/dashboard").await.unwrap();
    let _: Value = session.client().get("/student/dashboard").await.unwrap();

    assert_eq!(backend.refresh_count(), 0);
}

/// Tests that a validation failure is returned without refresh or retry.
#[tokio::test]
async fn test_validation_error_is_returned_as_is() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = logged_in_session(&base_url).await;

    let err = session
        .client()
        .post::<Value, _>("/assignments", &json!({ "dueDate": "2026-11-01" }))
        .await
        .unwrap_err();

    assert_eq!(err.status(), 422);
    assert!(matches!(&err, ApiError::Validation { message, .. } if message == "title is required"));
    assert_eq!(backend.assignment_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.refresh_count(), 0);
}

/// Tests that an expired token on a POST still delivers the body on retry.
#[tokio::test]
async fn test_post_is_retried_with_same_body() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = logged_in_session(&base_url).await;
    backend.expire_tokens();

    let created: Value = session
        .client()
        .post("/assignments", &json!({ "title": "Essay 1" }))
        .await
        .unwrap();

    assert_eq!(created["title"], "Essay 1");
    assert_eq!(backend.assignment_calls.load(Ordering::SeqCst), 2);
}

/// Tests that without any stored token the client makes one refresh attempt
/// and then fails.
#[tokio::test]
async fn test_no_token_attempts_single_refresh() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = session_for(&base_url);

    let err = session
        .client()
        .get::<Value>("/student/dashboard")
        .await
        .unwrap_err();

    assert!(err.is_auth_failure());
    assert_eq!(backend.refresh_count(), 1);
    assert_eq!(backend.dashboard_calls.load(Ordering::SeqCst), 1);
    assert!(!session.is_authenticated());
}

// ============================================================================
// Concurrency
// ============================================================================

/// Tests that concurrent 401s share a single refresh call.
#[tokio::test]
async fn test_concurrent_requests_share_one_refresh() {
    let backend = Backend::new();
    backend.set_refresh_delay(Duration::from_millis(300));
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = logged_in_session(&base_url).await;
    backend.expire_tokens();

    let client = session.client();
    let requests = (0..8).map(|_| client.get::<Value>("/student/dashboard"));
    let results = futures::future::join_all(requests).await;

    for result in results {
        assert_eq!(result.unwrap()["courses"], 3);
    }
    assert_eq!(backend.refresh_count(), 1);
    assert!(!client.refresh_coordinator().is_refreshing());
}

/// Tests that concurrent requests on separate tasks coalesce as well.
#[tokio::test]
async fn test_spawned_requests_share_one_refresh() {
    let backend = Backend::new();
    backend.set_refresh_delay(Duration::from_millis(300));
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = logged_in_session(&base_url).await;
    backend.expire_tokens();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = session.client().clone();
            tokio::spawn(async move { client.get::<Value>("/student/dashboard").await })
        })
        .collect();

    for handle in futures::future::join_all(handles).await {
        assert!(handle.unwrap().is_ok());
    }
    assert_eq!(backend.refresh_count(), 1);
}

/// Tests that a failed refresh rejects every queued caller and clears the
/// session.
#[tokio::test]
async fn test_refresh_failure_rejects_all_and_clears_session() {
    let backend = Backend::new();
    backend.set_refresh_delay(Duration::from_millis(300));
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = logged_in_session(&base_url).await;
    backend.expire_tokens();
    backend.refresh_fails.store(true, Ordering::SeqCst);

    let client = session.client();
    let requests = (0..5).map(|_| client.get::<Value>("/student/dashboard"));
    let results = futures::future::join_all(requests).await;

    for result in results {
        let err = result.unwrap_err();
        assert!(err.is_auth_failure(), "unexpected error: {err:?}");
    }
    assert_eq!(backend.refresh_count(), 1);
    assert!(!session.is_authenticated());
    assert!(client.token_store().load().unwrap().is_none());
}

// ============================================================================
// Auth endpoints
// ============================================================================

/// Tests that a rejected login is returned without a refresh attempt.
#[tokio::test]
async fn test_login_failure_never_refreshes() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let session = session_for(&base_url);

    let err = session
        .login(&Credentials::new(EMAIL, "wrong"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), 401);
    assert!(err.to_string().contains("Invalid email or password"));
    assert_eq!(backend.refresh_count(), 0);
}
