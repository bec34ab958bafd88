//! Outbound file transfer for Landrop.
//!
//! The [`FileSender`] streams a local file to a peer's upload endpoint
//! without ever buffering it: the multipart framing is precomputed so the
//! request carries an exact `Content-Length`, and the file is read in
//! chunks interleaved with network writes. Progress is observable through
//! a watch channel and an in-flight transfer can be cancelled at any time,
//! which aborts the underlying connection.

pub mod multipart;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::DEFAULT_CHUNK_SIZE;

/// Request headers understood by the upload endpoint.
pub mod headers {
    /// Original filename of the streamed file
    pub const FILE_NAME: &str = "x-file-name";
    /// Transfer identifier from signaling
    pub const TRANSFER_ID: &str = "x-transfer-id";
    /// Receiving device's identifier, paired with the code
    pub const DEVICE_ID: &str = "x-device-id";
    /// Pairing code authorizing this upload
    pub const PAIRING_CODE: &str = "x-pairing-code";
    /// Identifier of the sending device
    pub const SENDER_DEVICE_ID: &str = "x-sender-device-id";
}

/// Phase of an outbound transfer as seen by progress observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Bytes are flowing
    Streaming,
    /// The transfer was aborted before completion
    Cancelled,
}

/// Progress of an outbound transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendProgress {
    /// Current phase
    pub state: SendState,
    /// File bytes written to the network so far
    pub bytes_sent: u64,
    /// Total file size
    pub total_bytes: u64,
    /// Completion ratio as a percentage, capped at 100
    pub percent: f64,
}

impl SendProgress {
    fn new(bytes_sent: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            100.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let ratio = bytes_sent as f64 / total_bytes as f64 * 100.0;
            ratio.min(100.0)
        };
        Self {
            state: SendState::Streaming,
            bytes_sent,
            total_bytes,
            percent,
        }
    }
}

/// What to send and where.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Local file to stream
    pub file_path: PathBuf,
    /// Peer host (address or name)
    pub host: String,
    /// Peer transfer port
    pub port: u16,
    /// Receiving device's identifier
    pub target_device_id: String,
    /// Pairing code issued by the receiver
    pub pairing_code: String,
    /// This device's identifier
    pub sender_device_id: String,
    /// Transfer identifier from signaling, if one was negotiated
    pub transfer_id: Option<String>,
}

/// Success descriptor returned by the peer's upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    /// Peer-reported status string
    #[serde(default)]
    pub status: String,
    /// Original filename as the peer saw it
    #[serde(default)]
    pub filename: String,
    /// Bytes the peer received
    #[serde(default)]
    pub size: u64,
    /// Name the peer saved the file under
    #[serde(default)]
    pub saved_as: String,
    /// Path to retrieve the file from the peer
    #[serde(default)]
    pub download_url: String,
}

/// Pairing code response from a peer.
#[derive(Debug, Clone, Deserialize)]
pub struct PairingCodeGrant {
    /// The 6-digit code
    pub code: String,
    /// Seconds until it expires
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
}

/// Streams files to peers.
pub struct FileSender {
    client: reqwest::Client,
    chunk_size: usize,
    active: Mutex<Option<CancellationToken>>,
    progress_tx: watch::Sender<Option<SendProgress>>,
}

impl std::fmt::Debug for FileSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSender")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl Default for FileSender {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl FileSender {
    /// Create a sender reading the source in `chunk_size` pieces.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        let (progress_tx, _) = watch::channel(None);
        Self {
            client: reqwest::Client::new(),
            chunk_size: chunk_size.max(1),
            active: Mutex::new(None),
            progress_tx,
        }
    }

    /// Observe progress of the in-flight transfer. `None` means idle.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Option<SendProgress>> {
        self.progress_tx.subscribe()
    }

    /// Ask a peer to issue a pairing code for an inbound transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the peer declines.
    pub async fn fetch_pairing_code(
        &self,
        host: &str,
        port: u16,
        target_device_id: &str,
    ) -> Result<PairingCodeGrant> {
        let url = format!("http://{host}:{port}/pairing-code");
        let response = self
            .client
            .get(&url)
            .header(headers::DEVICE_ID, target_device_id)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::PeerRejected { status, body });
        }

        Ok(response.json().await?)
    }

    /// Stream one file to a peer.
    ///
    /// Progress is emitted on every chunk; the final event always reports
    /// 100% for a non-empty file. A concurrent [`cancel`](Self::cancel)
    /// aborts the connection and surfaces [`Error::TransferCancelled`].
    ///
    /// # Errors
    ///
    /// Fails fast with [`Error::FileNotFound`] when the source is missing,
    /// [`Error::PeerRejected`] on a non-success status, or the underlying
    /// network/read error otherwise.
    pub async fn send_file(&self, request: SendRequest) -> Result<UploadReceipt> {
        let metadata = tokio::fs::metadata(&request.file_path)
            .await
            .map_err(|_| Error::FileNotFound(request.file_path.display().to_string()))?;
        if !metadata.is_file() {
            return Err(Error::FileNotFound(request.file_path.display().to_string()));
        }
        let file_size = metadata.len();

        let file_name = request
            .file_path
            .file_name()
            .map_or_else(|| "unnamed".to_string(), |n| n.to_string_lossy().to_string());

        let framing = multipart::Framing::new(&file_name);
        let content_length = framing.content_length(file_size);

        let token = CancellationToken::new();
        *self.lock_active() = Some(token.clone());
        // Clear any terminal event left over from a previous transfer.
        self.progress_tx.send_replace(None);

        let body = self.body_stream(
            request.file_path.clone(),
            file_size,
            framing.clone(),
            token.clone(),
        );

        let url = format!("http://{}:{}/upload", request.host, request.port);
        let mut builder = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, framing.content_type())
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .header(headers::FILE_NAME, &file_name)
            .header(headers::DEVICE_ID, &request.target_device_id)
            .header(headers::PAIRING_CODE, &request.pairing_code)
            .header(headers::SENDER_DEVICE_ID, &request.sender_device_id);
        if let Some(transfer_id) = &request.transfer_id {
            builder = builder.header(headers::TRANSFER_ID, transfer_id);
        }

        tracing::info!(
            file = %file_name,
            size = file_size,
            target = %request.target_device_id,
            url = %url,
            "Starting outbound transfer"
        );

        let outcome = builder.body(reqwest::Body::wrap_stream(body)).send().await;
        *self.lock_active() = None;

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                if token.is_cancelled() {
                    self.mark_cancelled();
                    tracing::info!(file = %file_name, "Outbound transfer cancelled");
                    return Err(Error::TransferCancelled);
                }
                return Err(Error::Request(e));
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, "Peer rejected transfer");
            return Err(Error::PeerRejected { status, body });
        }

        let receipt: UploadReceipt = response.json().await?;
        tracing::info!(saved_as = %receipt.saved_as, "Outbound transfer complete");
        Ok(receipt)
    }

    /// Abort the in-flight transfer, if any. Returns whether one was
    /// active. Safe no-op when idle.
    ///
    /// Progress observers see a terminal [`SendState::Cancelled`] event
    /// carrying the last reported byte counts.
    pub fn cancel(&self) -> bool {
        let token = self.lock_active().take();
        match token {
            Some(token) => {
                token.cancel();
                self.mark_cancelled();
                tracing::info!("Cancelling outbound transfer");
                true
            }
            None => false,
        }
    }

    /// Flip the watch channel to a terminal cancelled event, keeping the
    /// last reported byte counts.
    fn mark_cancelled(&self) {
        self.progress_tx.send_modify(|slot| match slot {
            Some(progress) => progress.state = SendState::Cancelled,
            None => {
                *slot = Some(SendProgress {
                    state: SendState::Cancelled,
                    bytes_sent: 0,
                    total_bytes: 0,
                    percent: 0.0,
                });
            }
        });
    }

    fn body_stream(
        &self,
        path: PathBuf,
        file_size: u64,
        framing: multipart::Framing,
        token: CancellationToken,
    ) -> impl futures::Stream<Item = std::result::Result<Vec<u8>, io::Error>> + Send + 'static
    {
        let chunk_size = self.chunk_size;
        let progress_tx = self.progress_tx.clone();

        async_stream::try_stream! {
            yield framing.preamble().to_vec();

            let mut file = tokio::fs::File::open(&path).await?;
            let mut buf = vec![0u8; chunk_size];
            let mut sent: u64 = 0;

            loop {
                if token.is_cancelled() {
                    Err(io::Error::new(io::ErrorKind::Interrupted, "transfer cancelled"))?;
                }
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                sent += n as u64;
                let _ = progress_tx.send(Some(SendProgress::new(sent, file_size)));
                yield buf[..n].to_vec();
            }

            yield framing.trailer().to_vec();
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().expect("sender state poisoned")
    }
}

/// Send one file to a peer, first fetching a pairing code from it.
///
/// This is the orchestration used by the CLI: resolve the peer's address
/// elsewhere, then pair and stream in one call.
///
/// # Errors
///
/// Propagates any pairing or transfer failure.
pub async fn pair_and_send(
    sender: &FileSender,
    file_path: &Path,
    host: &str,
    port: u16,
    target_device_id: &str,
    sender_device_id: &str,
) -> Result<UploadReceipt> {
    let grant = sender
        .fetch_pairing_code(host, port, target_device_id)
        .await?;
    tracing::debug!(expires_in = grant.expires_in, "Obtained pairing code");

    sender
        .send_file(SendRequest {
            file_path: file_path.to_path_buf(),
            host: host.to_string(),
            port,
            target_device_id: target_device_id.to_string(),
            pairing_code: grant.code,
            sender_device_id: sender_device_id.to_string(),
            transfer_id: None,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_capped_at_100() {
        let p = SendProgress::new(150, 100);
        assert!((p.percent - 100.0).abs() < f64::EPSILON);

        let p = SendProgress::new(50, 100);
        assert!((p.percent - 50.0).abs() < f64::EPSILON);

        // Zero-size files are complete as soon as they start.
        let p = SendProgress::new(0, 0);
        assert!((p.percent - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_send_missing_file_fails_fast() {
        let sender = FileSender::default();
        let err = sender
            .send_file(SendRequest {
                file_path: PathBuf::from("/definitely/not/here.bin"),
                host: "127.0.0.1".to_string(),
                port: 1,
                target_device_id: "d2".to_string(),
                pairing_code: "123456".to_string(),
                sender_device_id: "d1".to_string(),
                transfer_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn test_cancel_is_noop_when_idle() {
        let sender = FileSender::default();
        assert!(!sender.cancel());
    }

    #[test]
    fn test_cancel_publishes_terminal_progress() {
        let sender = FileSender::default();
        *sender.lock_active() = Some(CancellationToken::new());
        let progress = sender.progress();

        assert!(sender.cancel());
        let event = progress.borrow().expect("cancel event");
        assert_eq!(event.state, SendState::Cancelled);
    }

    #[tokio::test]
    async fn test_body_stream_yields_exact_content_length() {
        use futures::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let contents: Vec<u8> = (0u8..=255).cycle().take(100_000).collect();
        tokio::fs::write(&path, &contents).await.unwrap();

        let sender = FileSender::new(4096);
        let framing = multipart::Framing::new("data.bin");
        let expected = framing.content_length(contents.len() as u64);

        let stream = sender.body_stream(
            path,
            contents.len() as u64,
            framing,
            CancellationToken::new(),
        );
        futures::pin_mut!(stream);

        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len() as u64;
        }
        assert_eq!(total, expected);
    }

    #[tokio::test]
    async fn test_body_stream_progress_monotonic_and_final_100() {
        use futures::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let contents = vec![7u8; 10_000];
        tokio::fs::write(&path, &contents).await.unwrap();

        let sender = FileSender::new(1024);
        let mut progress = sender.progress();
        let framing = multipart::Framing::new("data.bin");

        let stream = sender.body_stream(
            path,
            contents.len() as u64,
            framing,
            CancellationToken::new(),
        );
        futures::pin_mut!(stream);

        let mut last_bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            chunk.unwrap();
            if let Some(p) = *progress.borrow_and_update() {
                assert!(p.bytes_sent >= last_bytes);
                last_bytes = p.bytes_sent;
            }
        }

        let final_progress = progress.borrow().expect("progress emitted");
        assert_eq!(final_progress.bytes_sent, contents.len() as u64);
        assert!((final_progress.percent - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_cancelled_stream_errors() {
        use futures::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, vec![1u8; 50_000]).await.unwrap();

        let sender = FileSender::new(1024);
        let token = CancellationToken::new();
        let stream = sender.body_stream(path, 50_000, multipart::Framing::new("data.bin"), token.clone());
        futures::pin_mut!(stream);

        // Preamble and the first chunk flow, then cancellation bites.
        assert!(stream.next().await.unwrap().is_ok());
        token.cancel();
        let mut saw_error = false;
        while let Some(item) = stream.next().await {
            if item.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
    }
}
