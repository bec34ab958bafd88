//! # Landrop Core Library
//!
//! `landrop-core` provides the core functionality for Landrop, a tool for
//! moving files directly between two devices on the same local network
//! without a cloud intermediary.
//!
//! ## How a transfer works
//!
//! 1. Both devices advertise themselves via mDNS and browse for peers
//!    ([`discovery`]).
//! 2. The sender asks the receiver for a short-lived 6-digit pairing code
//!    ([`pairing`]), which authorizes exactly one inbound transfer.
//! 3. File metadata, the accept/reject decision, and progress updates flow
//!    over a WebSocket signaling channel ([`signaling`]); file bytes never do.
//! 4. On accept, the file is streamed over a direct HTTP connection
//!    ([`transfer`] on the sending side, [`web`] on the receiving side),
//!    chunk by chunk, with bounded memory and live progress.
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`discovery`] - mDNS device advertisement and browsing
//! - [`history`] - Completed-transfer recording (collaborator interface)
//! - [`identity`] - Persistent device identity
//! - [`pairing`] - Pairing code issuance and validation
//! - [`session`] - Per-transfer state machine
//! - [`signaling`] - Signaling hub and wire messages
//! - [`storage`] - Received-file storage
//! - [`transfer`] - Outbound streaming file sender
//! - [`web`] - HTTP server (upload, download, pairing, signaling endpoints)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod history;
pub mod identity;
pub mod pairing;
pub mod session;
pub mod signaling;
pub mod storage;
pub mod transfer;
pub mod web;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application tag carried in discovery records and identity responses
pub const APP_TAG: &str = "Landrop";

/// Default port for the transfer server (HTTP + signaling WebSocket)
pub const DEFAULT_PORT: u16 = 8080;

/// Pairing code validity window in seconds
pub const PAIRING_CODE_TTL_SECS: u64 = 300;

/// Chunk size used when streaming files from disk (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Minimum interval between progress broadcasts
pub const PROGRESS_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
