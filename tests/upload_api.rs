//! HTTP-level tests for uploading and retrieving files

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use keepsake_server::config::{AuthConfig, Config};
use keepsake_server::{build_router, AppState};

const API_KEY: &str = "test-key";
const PUBLIC_URL: &str = "http://files.test";
const BOUNDARY: &str = "keepsake-test-boundary";
const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

// ============================================================================
// Helpers
// ============================================================================

fn test_config(temp_dir: &TempDir, ttl: Duration) -> Config {
    let mut config = Config::default();
    config.server.public_url = PUBLIC_URL.to_string();
    config.storage.permanent_dir = temp_dir.path().join("uploads");
    config.storage.temporary_dir = temp_dir.path().join("temp");
    config.storage.staging_dir = temp_dir.path().join(".staging");
    config.storage.index_path = temp_dir.path().join("checksums.json");
    config.limits.max_permanent_bytes = 1024;
    config.limits.max_temporary_bytes = 4096;
    config.expiry.ttl = ttl;
    config.auth = AuthConfig::from_list(API_KEY);
    config
}

async fn test_app(temp_dir: &TempDir, ttl: Duration) -> (AppState, Router) {
    let state = AppState::new(test_config(temp_dir, ttl)).await.unwrap();
    let app = build_router(state.clone());
    (state, app)
}

fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(mode: Option<&str>, key: Option<&str>, field: &str, name: &str, data: &[u8]) -> Request<Body> {
    let uri = match mode {
        Some(mode) => format!("/upload?mode={}", mode),
        None => "/upload".to_string(),
    };

    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }

    builder.body(Body::from(multipart_body(field, name, data))).unwrap()
}

async fn upload(app: &Router, mode: Option<&str>, name: &str, data: &[u8]) -> Response {
    app.clone()
        .oneshot(upload_request(mode, Some(API_KEY), "file", name, data))
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn raw_body(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

fn url_path(file_url: &Value) -> String {
    file_url
        .as_str()
        .unwrap()
        .strip_prefix(PUBLIC_URL)
        .unwrap()
        .to_string()
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_upload_without_key_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let response = app
        .clone()
        .oneshot(upload_request(None, None, "file", "hello.txt", b"hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["message"], "Unauthorized");

    let response = app
        .clone()
        .oneshot(upload_request(None, Some("wrong-key"), "file", "hello.txt", b"hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(state.index().is_empty());
    assert!(std::fs::read_dir(temp_dir.path().join("uploads"))
        .unwrap()
        .next()
        .is_none());
}

// ============================================================================
// Permanent uploads
// ============================================================================

#[tokio::test]
async fn test_hello_upload_and_retrieval() {
    let temp_dir = TempDir::new().unwrap();
    let (_state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let response = upload(&app, None, "hello.txt", b"hello").await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["status"], "created");
    assert_eq!(json["digest"], HELLO_SHA256);
    assert_eq!(json["kind"], "permanent");
    assert_eq!(json["size"], 5);
    assert!(json.get("expiresAt").is_none());
    assert!(json.get("expiryNotice").is_none());

    let path = url_path(&json["fileUrl"]);
    assert!(path.starts_with("/uploads/"));
    assert!(path.ends_with(".txt"));

    let response = get(&app, &path).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert_eq!(raw_body(response).await, b"hello");
}

#[tokio::test]
async fn test_duplicate_upload_returns_existing_url() {
    let temp_dir = TempDir::new().unwrap();
    let (state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let first = json_body(upload(&app, None, "hello.txt", b"hello").await).await;

    let response = upload(&app, None, "renamed.md", b"hello").await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = json_body(response).await;

    assert_eq!(second["status"], "exists");
    assert_eq!(second["fileUrl"], first["fileUrl"]);
    assert_eq!(state.index().len(), 1);
}

#[tokio::test]
async fn test_image_field_is_accepted() {
    let temp_dir = TempDir::new().unwrap();
    let (_state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let response = app
        .clone()
        .oneshot(upload_request(None, Some(API_KEY), "image", "pixel.png", b"\x89PNG"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert!(url_path(&json["fileUrl"]).ends_with(".png"));
}

#[tokio::test]
async fn test_missing_file_field() {
    let temp_dir = TempDir::new().unwrap();
    let (_state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let response = app
        .clone()
        .oneshot(upload_request(None, Some(API_KEY), "comment", "note.txt", b"hi"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "MISSING_FILE");
}

#[tokio::test]
async fn test_size_ceiling_per_mode() {
    let temp_dir = TempDir::new().unwrap();
    let (state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let exact = upload(&app, None, "exact.bin", &[1u8; 1024]).await;
    assert_eq!(exact.status(), StatusCode::CREATED);

    let over = upload(&app, Some("permanent"), "over.bin", &[2u8; 1025]).await;
    assert_eq!(over.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(over).await["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(state.index().len(), 1);

    let temporary = upload(&app, Some("temporary"), "over.bin", &[2u8; 1025]).await;
    assert_eq!(temporary.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_and_traversal_names_are_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let (_state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;
    upload(&app, None, "hello.txt", b"hello").await;

    assert_eq!(get(&app, "/uploads/nope.txt").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        get(&app, "/uploads/..%2Fchecksums.json").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_concurrent_identical_uploads() {
    let temp_dir = TempDir::new().unwrap();
    let (state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let mut handles = Vec::new();
    for i in 0..6 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let response = upload(&app, None, &format!("copy-{}.txt", i), b"same content").await;
            let status = response.status();
            (status, json_body(response).await)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let created = results
        .iter()
        .filter(|(status, _)| *status == StatusCode::CREATED)
        .count();
    assert_eq!(created, 1);
    assert!(results
        .iter()
        .all(|(status, _)| *status == StatusCode::CREATED || *status == StatusCode::OK));

    let url = &results[0].1["fileUrl"];
    assert!(results.iter().all(|(_, json)| &json["fileUrl"] == url));
    assert_eq!(state.index().len(), 1);
}

#[tokio::test]
async fn test_index_survives_restart() {
    let temp_dir = TempDir::new().unwrap();

    let first_url = {
        let (_state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;
        json_body(upload(&app, None, "hello.txt", b"hello").await).await["fileUrl"].clone()
    };

    let (state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;
    assert_eq!(state.index().len(), 1);

    let response = upload(&app, None, "hello.txt", b"hello").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["fileUrl"], first_url);
}

// ============================================================================
// Temporary uploads
// ============================================================================

#[tokio::test]
async fn test_temporary_upload_expires() {
    let temp_dir = TempDir::new().unwrap();
    let (state, app) = test_app(&temp_dir, Duration::from_millis(300)).await;

    let response = upload(&app, Some("temporary"), "note.txt", b"ephemeral").await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = json_body(response).await;
    assert_eq!(json["kind"], "temporary");
    assert!(json["expiresAt"].is_string());
    assert!(json["expiryNotice"].as_str().unwrap().contains("deleted"));

    let path = url_path(&json["fileUrl"]);
    assert!(path.starts_with("/temp/"));

    // Retrievable before the deadline, and only from the temporary area
    let response = get(&app, &path).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(raw_body(response).await, b"ephemeral");
    let permanent_path = path.replacen("/temp/", "/uploads/", 1);
    assert_eq!(get(&app, &permanent_path).await.status(), StatusCode::NOT_FOUND);

    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(get(&app, &path).await.status(), StatusCode::NOT_FOUND);
    assert!(state.index().is_empty());
    assert!(std::fs::read_dir(temp_dir.path().join("temp"))
        .unwrap()
        .next()
        .is_none());
}

#[tokio::test]
async fn test_permanent_request_matching_temporary_content() {
    let temp_dir = TempDir::new().unwrap();
    let (_state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let temporary = json_body(upload(&app, Some("temporary"), "a.txt", b"shared").await).await;

    let response = upload(&app, Some("permanent"), "a.txt", b"shared").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "exists");
    assert_eq!(json["kind"], "temporary");
    assert_eq!(json["fileUrl"], temporary["fileUrl"]);
    assert_eq!(json["expiresAt"], temporary["expiresAt"]);
}

#[tokio::test]
async fn test_temporary_request_matching_permanent_content() {
    let temp_dir = TempDir::new().unwrap();
    let (_state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let permanent = json_body(upload(&app, None, "hello.txt", b"hello").await).await;

    let response = upload(&app, Some("temporary"), "hello.txt", b"hello").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "exists");
    assert_eq!(json["kind"], "permanent");
    assert_eq!(json["fileUrl"], permanent["fileUrl"]);
    assert!(json.get("expiresAt").is_none());
    assert!(json["expiryNotice"].as_str().unwrap().contains("will not expire"));
}

#[tokio::test]
async fn test_invalid_mode_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;

    let response = upload(&app, Some("forever"), "a.txt", b"data").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(state.index().is_empty());
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_reports_entry_count() {
    let temp_dir = TempDir::new().unwrap();
    let (_state, app) = test_app(&temp_dir, Duration::from_secs(3600)).await;
    upload(&app, None, "hello.txt", b"hello").await;

    let server = axum_test::TestServer::new(app).unwrap();
    let response = server.get("/health").await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["entries"], 1);
}
