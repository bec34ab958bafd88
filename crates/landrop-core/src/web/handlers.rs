//! HTTP endpoint handlers for the transfer server.
//!
//! The upload handler is the receive half of the transfer pipeline: it
//! authorizes the request against the pairing authority, streams the body
//! to disk chunk by chunk, and broadcasts throttled progress over the
//! signaling group. Nothing here buffers a whole file in memory.

#![allow(clippy::missing_errors_doc)]

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::Error;
use crate::history::{LedgerEntry, TransferDirection};
use crate::signaling::{Payload, SignalMessage};
use crate::storage::{original_file_name, StoredFile};
use crate::transfer::{headers as transfer_headers, multipart, pair_and_send, UploadReceipt};
use crate::PROGRESS_INTERVAL;

use super::error::{ApiError, ApiResult};
use super::state::SharedState;

// ============================================================================
// Response and request types
// ============================================================================

/// Health probe response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok" when the server is up
    status: &'static str,
    /// Current server time, RFC 3339
    timestamp: String,
    /// This device's display name
    device: String,
    /// Library version
    version: &'static str,
}

/// Identity response for `/api/identify`, the shape subnet probes look
/// for to tell a transfer server apart from whatever else answers on
/// the port.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    app: &'static str,
    name: String,
    id: String,
    device_id: String,
    icon: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    version: &'static str,
}

/// Pairing code grant.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCodeResponse {
    code: String,
    expires_in: u64,
}

/// Success descriptor for a completed upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    ok: bool,
    status: &'static str,
    message: &'static str,
    filename: String,
    size: u64,
    saved_as: String,
    download_url: String,
}

/// Stored file listing.
#[derive(Debug, Serialize)]
pub struct FilesResponse {
    files: Vec<StoredFile>,
}

/// Request body for `/api/transfer/send`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransferRequest {
    /// Device to send to, from the discovery registry
    #[serde(alias = "targetId")]
    target_device_id: String,
    /// Local path of the file to stream
    file_path: String,
}

// ============================================================================
// Status handlers
// ============================================================================

/// GET /health - liveness probe.
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        device: state.identity.device_name.clone(),
        version: crate::VERSION,
    })
}

/// GET /api/identify - this device's identity.
pub async fn identify(State(state): State<SharedState>) -> Json<IdentifyResponse> {
    let id = state.identity.device_id.to_string();
    Json(IdentifyResponse {
        app: crate::APP_TAG,
        name: state.identity.device_name.clone(),
        id: id.clone(),
        device_id: id,
        icon: "laptop",
        kind: "DESKTOP",
        version: crate::VERSION,
    })
}

// ============================================================================
// Pairing
// ============================================================================

/// GET /pairing-code - issue a pairing code for this device.
///
/// The device is named by the `x-device-id` header; a local request
/// without one gets a code for this device's own identity.
pub async fn pairing_code(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> ApiResult<Json<PairingCodeResponse>> {
    let device_id = header_value(&headers, transfer_headers::DEVICE_ID)
        .unwrap_or_else(|| state.identity.device_id.to_string());

    let code = state.pairing.issue(&device_id);
    tracing::info!(device_id = %device_id, "Issued pairing code");

    Ok(Json(PairingCodeResponse {
        code,
        expires_in: state.pairing.ttl().as_secs(),
    }))
}

// ============================================================================
// Upload (receive pipeline)
// ============================================================================

/// POST /upload - receive a file stream from a paired peer.
pub async fn upload(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<UploadResponse>> {
    // Credentials are checked before a single body byte is read.
    let device_id = header_value(&headers, transfer_headers::DEVICE_ID);
    let pairing_code = header_value(&headers, transfer_headers::PAIRING_CODE);
    let (Some(device_id), Some(pairing_code)) = (device_id, pairing_code) else {
        return Err(Error::MissingCredentials.into());
    };

    if !state.pairing.validate(&device_id, &pairing_code) {
        tracing::warn!(device_id = %device_id, "Upload with invalid pairing code rejected");
        return Err(Error::InvalidPairingCode(device_id).into());
    }

    let file_name = header_value(&headers, transfer_headers::FILE_NAME)
        .unwrap_or_else(|| "unnamed".to_string());
    let transfer_id = header_value(&headers, transfer_headers::TRANSFER_ID)
        .unwrap_or_else(|| format!("transfer-{}", chrono::Utc::now().timestamp_millis()));
    let sender_id = header_value(&headers, transfer_headers::SENDER_DEVICE_ID)
        .unwrap_or_else(|| "unknown".to_string());

    let content_length: u64 = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let limit = state.limits.max_upload_bytes(&sender_id);
    if let Some(limit) = limit {
        if content_length > limit {
            return Err(Error::SizeLimitExceeded {
                size: content_length,
                limit,
            }
            .into());
        }
    }

    // The sender frames the body as single-file multipart; strip it when
    // the boundary is declared, otherwise treat the body as raw bytes.
    let mut stripper = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(multipart::boundary_from_content_type)
        .map(|boundary| multipart::MultipartStripper::new(&boundary));

    let (saved_name, path) = state.storage.allocate(&file_name);
    let mut out = tokio::fs::File::create(&path)
        .await
        .map_err(|e| upload_failed(&state, &transfer_id, &file_name, &e.to_string()))?;

    tracing::info!(
        file = %file_name,
        transfer_id = %transfer_id,
        sender = %sender_id,
        size = content_length,
        "Inbound transfer starting"
    );

    let mut received: u64 = 0;
    let mut written: u64 = 0;
    let mut last_emit: Option<Instant> = None;
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                state.storage.discard(&path).await;
                return Err(upload_failed(&state, &transfer_id, &file_name, &e.to_string()));
            }
        };
        received += chunk.len() as u64;

        if let Some(limit) = limit {
            if received > limit {
                state.storage.discard(&path).await;
                return Err(upload_failed_with(
                    &state,
                    &transfer_id,
                    &file_name,
                    Error::SizeLimitExceeded {
                        size: received,
                        limit,
                    },
                ));
            }
        }

        let file_bytes = match &mut stripper {
            Some(stripper) => match stripper.push(&chunk) {
                Ok(bytes) => bytes,
                Err(e) => {
                    state.storage.discard(&path).await;
                    return Err(upload_failed(&state, &transfer_id, &file_name, &e.to_string()));
                }
            },
            None => chunk.to_vec(),
        };

        if !file_bytes.is_empty() {
            if let Err(e) = out.write_all(&file_bytes).await {
                state.storage.discard(&path).await;
                return Err(upload_failed(&state, &transfer_id, &file_name, &e.to_string()));
            }
            written += file_bytes.len() as u64;
        }

        // At most one progress event per interval, plus a guaranteed final
        // event when a known-size body completes.
        let due = last_emit.is_none_or(|t| t.elapsed() >= PROGRESS_INTERVAL);
        if due || (content_length > 0 && received == content_length) {
            state
                .hub
                .broadcast(progress_message(&transfer_id, &file_name, received, content_length));
            last_emit = Some(Instant::now());
        }
    }

    if let Some(stripper) = &mut stripper {
        if let Err(e) = stripper.finish() {
            state.storage.discard(&path).await;
            return Err(upload_failed(&state, &transfer_id, &file_name, &e.to_string()));
        }
    }
    if let Err(e) = out.flush().await {
        state.storage.discard(&path).await;
        return Err(upload_failed(&state, &transfer_id, &file_name, &e.to_string()));
    }
    drop(out);

    // One successful transfer per code.
    state.pairing.consume(&device_id);

    let download_url = format!("/api/files/{saved_name}");
    state.hub.broadcast(SignalMessage::TransferComplete(payload(
        &transfer_id,
        json!({
            "file": file_name,
            "filename": file_name,
            "savedAs": saved_name,
            "size": written,
            "downloadUrl": download_url,
        }),
    )));

    if let Err(e) = state.ledger.record(
        LedgerEntry::new(TransferDirection::Received, &file_name, written)
            .with_transfer_id(&transfer_id)
            .with_peer(&sender_id)
            .with_saved_as(&saved_name),
    ) {
        tracing::warn!("Failed to record transfer history: {e}");
    }

    tracing::info!(file = %file_name, saved_as = %saved_name, size = written, "Inbound transfer complete");

    Ok(Json(UploadResponse {
        ok: true,
        status: "success",
        message: "File received successfully",
        filename: file_name,
        size: written,
        saved_as: saved_name,
        download_url,
    }))
}

/// Broadcast a failure and convert the reason into an API error.
fn upload_failed(state: &SharedState, transfer_id: &str, file: &str, reason: &str) -> ApiError {
    tracing::error!(transfer_id = %transfer_id, "Inbound transfer failed: {reason}");
    state.hub.broadcast(SignalMessage::TransferError(payload(
        transfer_id,
        json!({ "file": file, "error": reason }),
    )));
    ApiError::internal(format!("Upload failed: {reason}"))
}

fn upload_failed_with(
    state: &SharedState,
    transfer_id: &str,
    file: &str,
    error: Error,
) -> ApiError {
    state.hub.broadcast(SignalMessage::TransferError(payload(
        transfer_id,
        json!({ "file": file, "error": error.to_string() }),
    )));
    error.into()
}

fn progress_message(transfer_id: &str, file: &str, received: u64, total: u64) -> SignalMessage {
    let percentage = if total > 0 {
        #[allow(clippy::cast_precision_loss)]
        let ratio = received as f64 / total as f64 * 100.0;
        (ratio.min(100.0) * 100.0).round() / 100.0
    } else {
        0.0
    };
    SignalMessage::Progress(payload(
        transfer_id,
        json!({
            "file": file,
            "receivedBytes": received,
            "totalBytes": if total > 0 { total } else { received },
            "percentage": percentage,
        }),
    ))
}

fn payload(transfer_id: &str, fields: Value) -> Payload {
    Payload {
        transfer_id: Some(transfer_id.to_string()),
        rest: fields.as_object().cloned().unwrap_or_else(Map::new),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

// ============================================================================
// Download & file listing
// ============================================================================

/// GET /api/files/{filename} - stream a received file back out.
///
/// The attachment name is the original filename, recovered by stripping
/// the timestamp prefix.
pub async fn download_file(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let path = state.storage.resolve(&filename).await.map_err(ApiError::from)?;
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let original = original_file_name(&filename);
    let mime = mime_guess::from_path(original).first_or_octet_stream();

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{original}\""),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// GET /files/{filename} - legacy path, redirects to /api/files.
pub async fn download_file_legacy(Path(filename): Path<String>) -> Redirect {
    Redirect::to(&format!("/api/files/{filename}"))
}

/// GET /files - list received files, newest first.
pub async fn list_files(State(state): State<SharedState>) -> ApiResult<Json<FilesResponse>> {
    let files = state.storage.list().await.map_err(ApiError::from)?;
    Ok(Json(FilesResponse { files }))
}

// ============================================================================
// Devices & history
// ============================================================================

/// GET /api/devices - peers from mDNS discovery.
pub async fn list_devices(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "devices": state.directory.list_devices() }))
}

/// GET /api/signaling/devices - devices bound to a signaling connection.
pub async fn signaling_devices(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "devices": state.hub.list_registered_devices() }))
}

/// GET /api/history - recent transfers, newest first.
pub async fn history(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({ "transfers": state.ledger.list(Some(50)) }))
}

// ============================================================================
// Outbound transfer
// ============================================================================

/// POST /api/transfer/send - pair with a discovered peer and stream a
/// local file to it.
pub async fn send_transfer(
    State(state): State<SharedState>,
    Json(request): Json<SendTransferRequest>,
) -> ApiResult<Json<UploadReceipt>> {
    let peer = state
        .directory
        .get_device(&request.target_device_id)
        .ok_or_else(|| Error::TargetOffline(request.target_device_id.clone()))?;
    let address = peer
        .address
        .ok_or_else(|| Error::TargetOffline(request.target_device_id.clone()))?;

    let file_path = std::path::PathBuf::from(&request.file_path);
    let result = pair_and_send(
        &state.sender,
        &file_path,
        &address.to_string(),
        peer.port,
        &peer.device_id,
        &state.identity.device_id.to_string(),
    )
    .await;

    let file_name = file_path
        .file_name()
        .map_or_else(|| request.file_path.clone(), |n| n.to_string_lossy().to_string());

    match result {
        Ok(receipt) => {
            if let Err(e) = state.ledger.record(
                LedgerEntry::new(TransferDirection::Sent, &file_name, receipt.size)
                    .with_peer(&peer.device_id),
            ) {
                tracing::warn!("Failed to record transfer history: {e}");
            }
            Ok(Json(receipt))
        }
        Err(e) => {
            if let Err(le) = state.ledger.record(
                LedgerEntry::new(TransferDirection::Sent, &file_name, 0)
                    .with_peer(&peer.device_id)
                    .with_error(e.to_string()),
            ) {
                tracing::warn!("Failed to record transfer history: {le}");
            }
            Err(e.into())
        }
    }
}
