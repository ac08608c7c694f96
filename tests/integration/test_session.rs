//! Integration tests for session persistence and transport failures.
//!
//! These tests use the file-backed token store the CLI uses, so a session
//! written by one client is picked up by the next.

mod mock_backend;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use campus_client::{
    ApiClient, ApiClientBuilder, ApiError, AuthSession, ClientConfig, Credentials,
    FileTokenStore, TokenStore,
};
use mock_backend::{spawn_test_server, Backend, EMAIL, PASSWORD, REFRESH_TOKEN};
use serde_json::Value;

fn session_file(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join("campus-integration")
        .join(format!("{name}-{}.json", std::process::id()))
}

/// Builds a session the way the CLI does: config plus a file store.
fn file_backed_session(base_url: &str, token_file: &Path) -> AuthSession {
    let config = ClientConfig {
        base_url: base_url.to_string(),
        token_file: token_file.display().to_string(),
        ..ClientConfig::default()
    };
    config.validate().expect("valid config");

    let client = ApiClientBuilder::from_config(&config)
        .token_store(Arc::new(FileTokenStore::new(config.token_path())))
        .build()
        .expect("client");
    AuthSession::new(client, &config)
}

/// Tests that a login survives into a second client over the same file.
#[tokio::test]
async fn test_session_survives_restart() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let path = session_file("restart");

    let first = file_backed_session(&base_url, &path);
    first
        .login(&Credentials::new(EMAIL, PASSWORD))
        .await
        .unwrap();
    drop(first);

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(on_disk.contains("authToken"));
    assert!(on_disk.contains(REFRESH_TOKEN));

    let second = file_backed_session(&base_url, &path);
    assert!(second.is_authenticated());
    let user = second.current_user().await.unwrap();
    assert_eq!(user["email"], EMAIL);

    second.logout().await.unwrap();
    assert!(!path.exists());
}

/// Tests that a refresh performed by one client is persisted for the next.
#[tokio::test]
async fn test_refreshed_token_is_persisted() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let path = session_file("refresh");

    let session = file_backed_session(&base_url, &path);
    let login = session
        .login(&Credentials::new(EMAIL, PASSWORD))
        .await
        .unwrap();
    backend.expire_tokens();

    let _: Value = session.client().get("/student/dashboard").await.unwrap();

    let stored = FileTokenStore::new(&path).load().unwrap().unwrap();
    assert_ne!(stored.access_token, login.access_token);
    assert_eq!(stored.refresh_token.as_deref(), Some(REFRESH_TOKEN));
    assert!(stored.user.is_some());

    FileTokenStore::new(&path).clear().unwrap();
}

/// Tests that logout clears the local session and tells the server.
#[tokio::test]
async fn test_logout_clears_session_file() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(Arc::clone(&backend)).await;
    let path = session_file("logout");

    let session = file_backed_session(&base_url, &path);
    session
        .login(&Credentials::new(EMAIL, PASSWORD))
        .await
        .unwrap();
    assert!(path.exists());

    session.logout().await.unwrap();

    assert!(!path.exists());
    assert!(!session.is_authenticated());
    assert_eq!(backend.logout_calls.load(Ordering::SeqCst), 1);
}

/// Tests that a slow endpoint surfaces as a timeout with status 0.
#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let backend = Backend::new();
    let (base_url, _handle) = spawn_test_server(backend).await;

    let client = ApiClient::builder(&base_url)
        .timeout(Duration::from_millis(250))
        .build()
        .unwrap();
    let err = client.get::<Value>("/reports/slow").await.unwrap_err();

    assert!(matches!(err, ApiError::Timeout { .. }), "got: {err:?}");
    assert_eq!(err.status(), 0);
    assert!(err.is_transient());
}

/// Tests that an unreachable backend is a network error with status 0.
#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let backend = Backend::new();
    let (base_url, handle) = spawn_test_server(backend).await;
    handle.abort();
    let _ = handle.await;

    let client = ApiClient::builder(&base_url).build().unwrap();
    let err = client
        .get::<Value>("/student/dashboard")
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Network { .. }), "got: {err:?}");
    assert_eq!(err.status(), 0);
}
