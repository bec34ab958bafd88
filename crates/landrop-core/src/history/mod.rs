//! Transfer history for Landrop.
//!
//! The transfer core records completed (and failed) transfers through the
//! [`TransferLedger`] trait and consults [`TransferLimits`] before
//! accepting an upload; it does not care how either is backed.
//! [`JsonLedger`] is the default file-backed ledger.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default cap on stored ledger entries.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// A file was sent to another device
    Sent,
    /// A file was received from another device
    Received,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "Sent"),
            Self::Received => write!(f, "Received"),
        }
    }
}

/// Final outcome of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Transfer completed successfully
    Completed,
    /// Transfer failed
    Failed,
    /// Transfer was cancelled
    Cancelled,
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// One recorded transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier for this record
    pub id: Uuid,
    /// Transfer identifier from signaling, when known
    pub transfer_id: Option<String>,
    /// When the transfer finished
    pub timestamp: DateTime<Utc>,
    /// Direction of the transfer
    pub direction: TransferDirection,
    /// Identifier of the remote device, when known
    pub peer_device_id: Option<String>,
    /// Original file name
    pub file_name: String,
    /// Name the file was saved under (receive direction only)
    pub saved_as: Option<String>,
    /// Bytes moved
    pub size: u64,
    /// Final outcome
    pub outcome: TransferOutcome,
    /// Error message, for failed transfers
    pub error_message: Option<String>,
}

impl LedgerEntry {
    /// Create a completed entry stamped with the current time.
    #[must_use]
    pub fn new(direction: TransferDirection, file_name: impl Into<String>, size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            transfer_id: None,
            timestamp: Utc::now(),
            direction,
            peer_device_id: None,
            file_name: file_name.into(),
            saved_as: None,
            size,
            outcome: TransferOutcome::Completed,
            error_message: None,
        }
    }

    /// Set the signaling transfer identifier.
    #[must_use]
    pub fn with_transfer_id(mut self, transfer_id: impl Into<String>) -> Self {
        self.transfer_id = Some(transfer_id.into());
        self
    }

    /// Set the remote device identifier.
    #[must_use]
    pub fn with_peer(mut self, device_id: impl Into<String>) -> Self {
        self.peer_device_id = Some(device_id.into());
        self
    }

    /// Set the saved filename.
    #[must_use]
    pub fn with_saved_as(mut self, saved_as: impl Into<String>) -> Self {
        self.saved_as = Some(saved_as.into());
        self
    }

    /// Mark the entry failed with a reason.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.outcome = TransferOutcome::Failed;
        self.error_message = Some(message.into());
        self
    }
}

/// Records finished transfers.
pub trait TransferLedger: Send + Sync {
    /// Append one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the entry fails.
    fn record(&self, entry: LedgerEntry) -> Result<()>;

    /// List entries, newest first.
    fn list(&self, limit: Option<usize>) -> Vec<LedgerEntry>;
}

/// Per-device transfer limits consulted before accepting an upload.
pub trait TransferLimits: Send + Sync {
    /// Largest upload accepted from `device_id` in bytes, or `None` for
    /// no limit.
    fn max_upload_bytes(&self, device_id: &str) -> Option<u64>;
}

/// Limits read once from configuration; the same cap applies to every
/// device.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredLimits {
    /// Largest accepted upload in bytes
    pub max_upload_bytes: Option<u64>,
}

impl TransferLimits for ConfiguredLimits {
    fn max_upload_bytes(&self, _device_id: &str) -> Option<u64> {
        self.max_upload_bytes
    }
}

/// Serializable wrapper for the ledger file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    entries: Vec<LedgerEntry>,
}

/// File-backed ledger storing entries as pretty-printed JSON.
#[derive(Debug)]
pub struct JsonLedger {
    path: PathBuf,
    entries: Mutex<Vec<LedgerEntry>>,
    max_entries: usize,
}

impl JsonLedger {
    /// Load the ledger from the default data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing ledger file cannot be read.
    pub fn load() -> Result<Self> {
        let path = Self::default_path().unwrap_or_else(|| PathBuf::from("history.json"));
        Self::load_from(path)
    }

    /// Load from a specific path. A missing file yields an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                Error::ConfigError(format!(
                    "Failed to read transfer history at {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let file: LedgerFile = serde_json::from_str(&contents).map_err(|e| {
                Error::ConfigError(format!(
                    "Failed to parse transfer history at {}: {}",
                    path.display(),
                    e
                ))
            })?;
            file.entries
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            max_entries: DEFAULT_MAX_ENTRIES,
        })
    }

    /// Override the entry cap.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// The default ledger location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "landrop", "Landrop")
            .map(|dirs| dirs.data_dir().join("history.json"))
    }

    fn save(&self, entries: &[LedgerEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!(
                    "Failed to create history directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = LedgerFile {
            entries: entries.to_vec(),
        };
        let contents = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::ConfigError(format!("Failed to encode transfer history: {e}")))?;
        std::fs::write(&self.path, contents).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to write transfer history at {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl TransferLedger for JsonLedger {
    fn record(&self, entry: LedgerEntry) -> Result<()> {
        let mut entries = self.entries.lock().expect("ledger poisoned");
        entries.insert(0, entry);
        if entries.len() > self.max_entries {
            entries.truncate(self.max_entries);
        }
        self.save(&entries)
    }

    fn list(&self, limit: Option<usize>) -> Vec<LedgerEntry> {
        let entries = self.entries.lock().expect("ledger poisoned");
        let n = limit.unwrap_or(entries.len()).min(entries.len());
        entries[..n].to_vec()
    }
}

/// Ledger that discards entries; useful when history is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLedger;

impl TransferLedger for NullLedger {
    fn record(&self, _entry: LedgerEntry) -> Result<()> {
        Ok(())
    }

    fn list(&self, _limit: Option<usize>) -> Vec<LedgerEntry> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str) -> LedgerEntry {
        LedgerEntry::new(TransferDirection::Received, name, 1024)
            .with_peer("d1")
            .with_saved_as(format!("1724680000000-{name}"))
    }

    #[test]
    fn test_ledger_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history.json");

        let ledger = JsonLedger::load_from(path.clone()).unwrap();
        ledger.record(entry("a.txt")).unwrap();
        ledger.record(entry("b.txt")).unwrap();

        let reloaded = JsonLedger::load_from(path).unwrap();
        let listed = reloaded.list(None);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].file_name, "b.txt");
        assert_eq!(listed[1].file_name, "a.txt");
    }

    #[test]
    fn test_ledger_caps_entries() {
        let tmp = TempDir::new().unwrap();
        let ledger = JsonLedger::load_from(tmp.path().join("history.json"))
            .unwrap()
            .with_max_entries(3);

        for i in 0..5 {
            ledger.record(entry(&format!("file{i}.txt"))).unwrap();
        }

        let listed = ledger.list(None);
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].file_name, "file4.txt");
    }

    #[test]
    fn test_list_limit() {
        let tmp = TempDir::new().unwrap();
        let ledger = JsonLedger::load_from(tmp.path().join("history.json")).unwrap();
        for i in 0..4 {
            ledger.record(entry(&format!("file{i}.txt"))).unwrap();
        }
        assert_eq!(ledger.list(Some(2)).len(), 2);
        assert_eq!(ledger.list(Some(100)).len(), 4);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let ledger = JsonLedger::load_from(tmp.path().join("nope.json")).unwrap();
        assert!(ledger.list(None).is_empty());
    }

    #[test]
    fn test_entry_with_error_marks_failed() {
        let e = LedgerEntry::new(TransferDirection::Sent, "x.bin", 10).with_error("peer reset");
        assert_eq!(e.outcome, TransferOutcome::Failed);
        assert_eq!(e.error_message.as_deref(), Some("peer reset"));
    }

    #[test]
    fn test_configured_limits_apply_to_every_device() {
        assert_eq!(ConfiguredLimits::default().max_upload_bytes("d1"), None);
        let limits = ConfiguredLimits {
            max_upload_bytes: Some(1024),
        };
        assert_eq!(limits.max_upload_bytes("d1"), Some(1024));
        assert_eq!(limits.max_upload_bytes("d2"), Some(1024));
    }
}
