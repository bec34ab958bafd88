//! Endpoint-level tests for the transfer server: the upload handler's
//! pairing gate and the full upload/download round trip, driven through
//! the router without binding a socket.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;
use uuid::Uuid;

use landrop_core::config::Config;
use landrop_core::history::NullLedger;
use landrop_core::identity::DeviceIdentity;
use landrop_core::transfer::headers;
use landrop_core::transfer::multipart::Framing;
use landrop_core::web::{router, AppState, SharedState};

async fn test_server(storage_dir: &std::path::Path) -> (Router, SharedState) {
    let mut config = Config::default();
    config.general.storage_dir = Some(storage_dir.to_path_buf());

    let identity = DeviceIdentity {
        device_id: Uuid::new_v4(),
        device_name: "Test Device".to_string(),
    };

    let state = AppState::new(config, identity, Arc::new(NullLedger))
        .await
        .expect("assemble state");
    (router(Arc::clone(&state)), state)
}

fn upload_request(device_id: &str, code: &str, file_name: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(headers::DEVICE_ID, device_id)
        .header(headers::PAIRING_CODE, code)
        .header(headers::FILE_NAME, file_name)
        .header(headers::SENDER_DEVICE_ID, "sender-1")
        .header(headers::TRANSFER_ID, "transfer-42")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .expect("build request")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("JSON body")
}

#[tokio::test]
async fn test_upload_with_wrong_code_is_forbidden() {
    let dir = common::create_temp_dir();
    let (app, state) = test_server(dir.path()).await;

    // Codes never start with a zero, so this one can never match.
    let code = state.pairing.issue("receiver-1");
    let request = upload_request("receiver-1", "000000", "secret.txt", b"payload".to_vec());

    let response = app.oneshot(request).await.expect("route request");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Nothing was written, and the real code survives the failed attempt.
    let listed = state.storage.list().await.expect("list uploads");
    assert!(listed.is_empty());
    assert!(state.pairing.validate("receiver-1", &code));
}

#[tokio::test]
async fn test_upload_without_credentials_is_rejected() {
    let dir = common::create_temp_dir();
    let (app, _state) = test_server(dir.path()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::from("payload"))
        .expect("build request");

    let response = app.oneshot(request).await.expect("route request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_framed_upload_then_download_round_trip() {
    let dir = common::create_temp_dir();
    let (app, state) = test_server(dir.path()).await;

    let original: Vec<u8> = (0..20_000u32).flat_map(u32::to_le_bytes).collect();
    let framing = Framing::new("notes.txt");
    let mut wire = Vec::new();
    wire.extend_from_slice(framing.preamble());
    wire.extend_from_slice(&original);
    wire.extend_from_slice(framing.trailer());
    assert_eq!(wire.len() as u64, framing.content_length(original.len() as u64));

    let code = state.pairing.issue("receiver-1");
    let mut request = upload_request("receiver-1", &code, "notes.txt", wire);
    request
        .headers_mut()
        .insert(header::CONTENT_TYPE, framing.content_type().parse().expect("header"));

    let response = app.clone().oneshot(request).await.expect("route upload");
    assert_eq!(response.status(), StatusCode::OK);

    let receipt = json_body(response).await;
    assert_eq!(receipt["ok"], true);
    assert_eq!(receipt["filename"], "notes.txt");
    assert_eq!(receipt["size"], original.len() as u64);
    let saved_as = receipt["savedAs"].as_str().expect("savedAs").to_string();
    assert_eq!(receipt["downloadUrl"], format!("/api/files/{saved_as}"));

    // One transfer per code.
    assert!(!state.pairing.validate("receiver-1", &code));

    let request = Request::builder()
        .uri(format!("/api/files/{saved_as}"))
        .body(Body::empty())
        .expect("build request");
    let response = app.oneshot(request).await.expect("route download");
    assert_eq!(response.status(), StatusCode::OK);

    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .expect("content disposition")
        .to_string();
    assert!(disposition.contains("notes.txt"), "got {disposition}");

    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read file body");
    assert_eq!(bytes.as_ref(), original.as_slice());
}
