use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use query_node::config::{DecryptionConfig, RegistryConfig};
use query_node::decrypt::HttpDecryptor;
use query_node::registry::HttpRegistry;
use query_node_core::gateway::{Decryptor, Registry};
use query_node_core::models::QueryRequest;
use query_node_core::store::memory::InMemoryStore;
use query_node_core::error::classify_failure;
use query_node_core::{KeyRejected, Resolver, ResolverSettings, Stage};

const NODE: &str = "0xNode";
const PROFILE_URL: &str = "https://files.example/profile.enc";
const PLAINTEXT: &str = "Go is fast.\n\nPython is everywhere.";
const TOKEN: &str = "s3cret";

// ============ Fake gateway ============

/// One server playing registry, blob storage and decryption gateway.
async fn spawn_gateway() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let app = Router::new()
        .route("/files/by-url", get(by_url))
        .route("/files/{id}", get(file))
        .route("/files/{id}/permissions/{grantee}", get(permission))
        .route("/blob/{id}", get(blob))
        .route("/decrypt", post(decrypt))
        .with_state(Arc::new(base.clone()));

    tokio::spawn(axum::serve(listener, app).into_future());
    base
}

async fn by_url(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let id = if params.get("url").map(String::as_str) == Some(PROFILE_URL) {
        7
    } else {
        0
    };
    Json(json!({ "file_id": id }))
}

async fn file(State(base): State<Arc<String>>, Path(id): Path<u64>) -> Response {
    match id {
        7 | 8 => Json(json!({
            "id": id,
            "owner": "0xOwner",
            "url": format!("{}/blob/{}", base, id),
            "hash": format!("hash{}", id),
        }))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn permission(Path((id, grantee)): Path<(u64, String)>) -> Response {
    if grantee != NODE {
        return StatusCode::NOT_FOUND.into_response();
    }
    match id {
        7 => Json(json!({ "key": "k7" })).into_response(),
        // A grant whose key the decryption gateway will reject.
        8 => Json(json!({ "key": "garbage" })).into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable").into_response(),
    }
}

async fn blob(Path(id): Path<u64>) -> Vec<u8> {
    format!("cipher{}", id).into_bytes()
}

async fn decrypt(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let expected = format!("Bearer {}", TOKEN);
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    }
    if body["key"] != "k7" {
        return (StatusCode::BAD_REQUEST, "invalid key: not a valid private key").into_response();
    }
    let ciphertext = BASE64.decode(body["data"].as_str().unwrap_or("")).unwrap();
    assert_eq!(ciphertext, b"cipher7");
    Json(json!({ "data": BASE64.encode(PLAINTEXT) })).into_response()
}

// ============ Helpers ============

fn registry(base: &str) -> HttpRegistry {
    HttpRegistry::new(&RegistryConfig {
        url: format!("{}/", base),
        address: NODE.to_string(),
        timeout_secs: 2,
    })
    .unwrap()
}

fn decryptor(base: &str, token_env: Option<&str>) -> HttpDecryptor {
    HttpDecryptor::new(&DecryptionConfig {
        url: base.to_string(),
        timeout_secs: 2,
        token_env: token_env.map(str::to_string),
    })
    .unwrap()
}

// ============ Tests ============

#[tokio::test]
async fn test_registry_client() {
    let base = spawn_gateway().await;
    let registry = registry(&base);

    assert_eq!(registry.resolve_file_id(PROFILE_URL).await.unwrap(), 7);
    assert_eq!(
        registry
            .resolve_file_id("https://files.example/other")
            .await
            .unwrap(),
        0
    );

    let record = registry.get_file(7).await.unwrap().unwrap();
    assert_eq!(record.file_id, 7);
    assert_eq!(record.owner, "0xOwner");
    assert_eq!(record.storage_locator, format!("{}/blob/7", base));
    assert_eq!(record.content_hash, "hash7");
    assert!(registry.get_file(42).await.unwrap().is_none());

    assert_eq!(registry.get_permission(7, NODE).await.unwrap(), "k7");
    let err = registry.get_permission(7, "0xStranger").await.unwrap_err();
    assert!(err.to_string().contains("no permission"));
    let err = registry.get_permission(9, NODE).await.unwrap_err();
    assert!(err.to_string().contains("registry unavailable"));
}

#[tokio::test]
async fn test_decryptor_sends_token() {
    std::env::set_var("QNODE_TEST_TOKEN_OK", TOKEN);
    let base = spawn_gateway().await;
    let decryptor = decryptor(&base, Some("QNODE_TEST_TOKEN_OK"));

    let plain = decryptor
        .decrypt(&format!("{}/blob/7", base), "k7")
        .await
        .unwrap();
    assert_eq!(plain, PLAINTEXT.as_bytes());
}

#[tokio::test]
async fn test_decryptor_surfaces_gateway_errors() {
    let base = spawn_gateway().await;

    let err = decryptor(&base, None)
        .decrypt(&format!("{}/blob/7", base), "k7")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
    assert!(err.is::<KeyRejected>());

    let err = decryptor(&base, Some("QNODE_TEST_TOKEN_UNSET_VAR"))
        .decrypt("http://127.0.0.1:1/blob/7", "k7")
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("failed to download"));
}

#[tokio::test]
async fn test_storage_failure_is_upstream_whatever_the_locator_says() {
    let base = spawn_gateway().await;
    let locator = format!("{}/blob/pem-private-key", base);

    let err = decryptor(&base, None)
        .decrypt(&locator, "k7")
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains(&locator));
    assert!(!err.is::<KeyRejected>());

    let classified = classify_failure(Stage::Decrypt, &err);
    assert_eq!(classified.error_type(), "upstream_error");
    assert!(classified.is_retryable());
}

#[tokio::test]
async fn test_resolver_over_http_gateways() {
    std::env::set_var("QNODE_TEST_TOKEN_E2E", TOKEN);
    let base = spawn_gateway().await;

    let settings = ResolverSettings {
        registry_address: NODE.to_string(),
        ..Default::default()
    };
    let resolver = Resolver::new(
        Arc::new(registry(&base)),
        Arc::new(decryptor(&base, Some("QNODE_TEST_TOKEN_E2E"))),
        Arc::new(InMemoryStore::new()),
        settings,
    );

    let response = resolver
        .resolve(&QueryRequest::by_url(PROFILE_URL, "python"))
        .await
        .unwrap();
    assert_eq!(response.file_id, 7);
    assert_eq!(response.file_hash, "hash7");
    assert!(response.data[0].contains("Python"));

    // The gateway rejects file 8's key material.
    let err = resolver
        .resolve(&QueryRequest::by_id(8, "python"))
        .await
        .unwrap_err();
    assert_eq!(err.error_type(), "configuration_error");
}
