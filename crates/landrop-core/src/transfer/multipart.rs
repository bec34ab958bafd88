//! Single-file multipart framing.
//!
//! The send path builds the framing by hand so the body can be streamed
//! with an exact `Content-Length` (preamble + file size + trailer) instead
//! of being buffered. The receive path strips the same framing
//! incrementally with a small holdback buffer, so file bytes hit disk as
//! they arrive.

use std::io;

use crate::error::{Error, Result};

/// End of the part headers.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Part headers may not exceed this; anything longer is not our framing.
const MAX_PREAMBLE_LEN: usize = 8 * 1024;

/// Precomputed framing for one outbound file.
#[derive(Debug, Clone)]
pub struct Framing {
    boundary: String,
    preamble: Vec<u8>,
    trailer: Vec<u8>,
}

impl Framing {
    /// Build framing for a file with a fresh time-based boundary.
    #[must_use]
    pub fn new(file_name: &str) -> Self {
        let boundary = format!(
            "----FormDataBoundary{}",
            chrono::Utc::now().timestamp_millis()
        );
        Self::with_boundary(file_name, boundary)
    }

    fn with_boundary(file_name: &str, boundary: String) -> Self {
        let preamble = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        let trailer = format!("\r\n--{boundary}--\r\n").into_bytes();
        Self {
            boundary,
            preamble,
            trailer,
        }
    }

    /// `Content-Type` header value for this body.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact body length for a file of `file_size` bytes.
    #[must_use]
    pub fn content_length(&self, file_size: u64) -> u64 {
        self.preamble.len() as u64 + file_size + self.trailer.len() as u64
    }

    /// Bytes sent before the file.
    #[must_use]
    pub fn preamble(&self) -> &[u8] {
        &self.preamble
    }

    /// Bytes sent after the file.
    #[must_use]
    pub fn trailer(&self) -> &[u8] {
        &self.trailer
    }
}

/// Pull the boundary parameter out of a `Content-Type` header value.
#[must_use]
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    if !content_type
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
    {
        return None;
    }
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

enum StripperState {
    /// Accumulating the part headers
    Preamble(Vec<u8>),
    /// Streaming file bytes, holding back enough for the trailer
    Body,
}

/// Incremental parser that peels the framing off an inbound body.
///
/// Feed raw chunks through [`push`](Self::push) and write whatever it
/// returns; call [`finish`](Self::finish) at end of stream to verify the
/// closing boundary and flush nothing was swallowed.
pub struct MultipartStripper {
    state: StripperState,
    /// Expected closing sequence, `\r\n--boundary--\r\n`
    trailer: Vec<u8>,
    /// Tail of the stream not yet classified as file bytes
    holdback: Vec<u8>,
}

impl MultipartStripper {
    /// Build a stripper for a known boundary.
    #[must_use]
    pub fn new(boundary: &str) -> Self {
        Self {
            state: StripperState::Preamble(Vec::new()),
            trailer: format!("\r\n--{boundary}--\r\n").into_bytes(),
            holdback: Vec::new(),
        }
    }

    /// Consume one raw chunk, returning the file bytes it contained.
    ///
    /// # Errors
    ///
    /// Returns an error if the part headers never terminate within a sane
    /// length.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        match &mut self.state {
            StripperState::Preamble(buf) => {
                buf.extend_from_slice(chunk);
                if let Some(pos) = find_subsequence(buf, HEADER_TERMINATOR) {
                    let body_start = pos + HEADER_TERMINATOR.len();
                    let rest = buf.split_off(body_start);
                    self.state = StripperState::Body;
                    self.holdback = rest;
                    Ok(self.drain_body())
                } else if buf.len() > MAX_PREAMBLE_LEN {
                    Err(Error::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "multipart headers too long",
                    )))
                } else {
                    Ok(Vec::new())
                }
            }
            StripperState::Body => {
                self.holdback.extend_from_slice(chunk);
                Ok(self.drain_body())
            }
        }
    }

    /// Verify the stream ended on the closing boundary.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream was truncated or did not carry the
    /// expected trailer.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            StripperState::Preamble(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "multipart body ended inside headers",
            ))),
            StripperState::Body if self.holdback == self.trailer => Ok(()),
            StripperState::Body => Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "multipart body missing closing boundary",
            ))),
        }
    }

    /// Everything in the holdback beyond one trailer length is file data.
    fn drain_body(&mut self) -> Vec<u8> {
        if self.holdback.len() <= self.trailer.len() {
            return Vec::new();
        }
        let keep_from = self.holdback.len() - self.trailer.len();
        let tail = self.holdback.split_off(keep_from);
        std::mem::replace(&mut self.holdback, tail)
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
