//! Sessions persisted by the file store survive across invocations.
//!
//! Each `depot` command builds a fresh dispatcher over the same session
//! file, so these tests do the same: one dispatcher per simulated command.

use std::sync::Arc;

use depot_core::{ClientConfig, CredentialStore, Dispatcher, FileCredentialStore};
use serde_json::json;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

fn invocation(server: &MockServer, session_file: &std::path::Path) -> Dispatcher {
    let config = ClientConfig::new(&format!("{}/api", server.uri())).unwrap();
    Dispatcher::builder(config)
        .store(Arc::new(FileCredentialStore::new(session_file)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_login_then_request_in_next_invocation() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let session_file = dir.path().join("session.json");

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "accessToken": "a1", "refreshToken": "r1" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/inventory"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [{ "sku": "PX-1", "quantity": 4 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let login = invocation(&server, &session_file)
        .login("clerk@example.com", "hunter2")
        .await;
    assert!(login.is_success());
    assert!(session_file.exists());

    let inventory = invocation(&server, &session_file).get("/inventory").await;
    assert!(inventory.is_success());
    assert_eq!(inventory.data(), &json!([{ "sku": "PX-1", "quantity": 4 }]));
}

#[tokio::test]
async fn test_rotated_tokens_are_persisted() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let session_file = dir.path().join("session.json");

    FileCredentialStore::new(&session_file)
        .set(&depot_core::Credential::new("stale", "r1"))
        .await
        .unwrap();

    Mock::given(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "jwt expired" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "accessToken": "a2", "refreshToken": "r2" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(2)
        .mount(&server)
        .await;

    assert!(invocation(&server, &session_file).get("/orders").await.is_success());

    // The next command starts with the rotated pair and needs no refresh.
    let next = invocation(&server, &session_file);
    let stored = next.credential().await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose(), "a2");
    assert_eq!(stored.refresh_token.expose(), "r2");
    assert!(next.get("/orders").await.is_success());
}

#[tokio::test]
async fn test_logout_clears_session_when_server_fails() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let session_file = dir.path().join("session.json");

    FileCredentialStore::new(&session_file)
        .set(&depot_core::Credential::new("a1", "r1"))
        .await
        .unwrap();

    // The server fails the logout call; the local session still ends.
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let logout = invocation(&server, &session_file).logout().await.unwrap();
    assert!(logout.is_error());
    assert!(!session_file.exists());

    let next = invocation(&server, &session_file);
    assert!(next.credential().await.unwrap().is_none());
}
