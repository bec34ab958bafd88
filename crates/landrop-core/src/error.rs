//! Error types for Landrop.
//!
//! This module provides a unified error type for all Landrop operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Landrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Landrop.
#[derive(Error, Debug)]
pub enum Error {
    /// Upload request is missing the device-id or pairing-code header (E001)
    #[error("missing credentials: device id and pairing code are required")]
    MissingCredentials,

    /// Pairing code is wrong, expired, or was never issued (E002)
    #[error("invalid or expired pairing code for device '{0}'")]
    InvalidPairingCode(String),

    /// Source file for an outbound transfer does not exist (E003)
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Requested download does not exist (E004)
    #[error("no received file named '{0}'")]
    ReceivedFileNotFound(String),

    /// Signaling message named a target with no live connection (E005)
    #[error("target device '{0}' is offline")]
    TargetOffline(String),

    /// Signaling forwarding message did not name a target (E006)
    #[error("targetId is required")]
    MissingTarget,

    /// Peer answered an upload with a non-success status (E007)
    #[error("peer rejected transfer with status {status}: {body}")]
    PeerRejected {
        /// HTTP status returned by the peer
        status: u16,
        /// Response body from the peer
        body: String,
    },

    /// Transfer was cancelled by explicit action
    #[error("transfer cancelled")]
    TransferCancelled,

    /// Upload exceeds the size limit for this device (E008)
    #[error("transfer of {size} bytes exceeds limit of {limit} bytes")]
    SizeLimitExceeded {
        /// Declared transfer size
        size: u64,
        /// Allowed maximum
        limit: u64,
    },

    /// Session state machine received a transition it cannot take
    #[error("invalid session transition from {from} on {event}")]
    InvalidTransition {
        /// Current state name
        from: &'static str,
        /// Event that was applied
        event: &'static str,
    },

    /// Unknown transfer id
    #[error("unknown transfer '{0}'")]
    UnknownTransfer(String),

    /// Discovery backend failure
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Outbound HTTP request failed
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::MissingCredentials => Some("E001"),
            Self::InvalidPairingCode(_) => Some("E002"),
            Self::FileNotFound(_) => Some("E003"),
            Self::ReceivedFileNotFound(_) => Some("E004"),
            Self::TargetOffline(_) => Some("E005"),
            Self::MissingTarget => Some("E006"),
            Self::PeerRejected { .. } => Some("E007"),
            Self::SizeLimitExceeded { .. } => Some("E008"),
            _ => None,
        }
    }

    /// Returns whether this error is a client error (caller's fault) as
    /// opposed to a transfer or server failure.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials
                | Self::InvalidPairingCode(_)
                | Self::MissingTarget
                | Self::SizeLimitExceeded { .. }
                | Self::InvalidPath(_)
        )
    }
}
