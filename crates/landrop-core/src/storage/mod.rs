//! Received-file storage.
//!
//! Uploads land in a single flat directory under collision-avoided names:
//! a millisecond timestamp prefix joined to the sanitized original name
//! with a `-`. The original name is recovered for downloads by stripping
//! everything up to and including the first `-`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Recover the original filename from a saved name by stripping the
/// timestamp prefix. A name without a `-` is returned unchanged.
#[must_use]
pub fn original_file_name(saved_name: &str) -> &str {
    saved_name
        .split_once('-')
        .map_or(saved_name, |(_, rest)| rest)
}

/// A file sitting in the uploads directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Saved (prefixed) filename
    pub filename: String,
    /// Size in bytes
    pub size: u64,
    /// When the file was created
    pub created_at: DateTime<Utc>,
}

/// The uploads directory and its naming scheme.
#[derive(Debug, Clone)]
pub struct Storage {
    uploads_dir: PathBuf,
}

impl Storage {
    /// Open (creating if needed) the uploads directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(uploads_dir: impl Into<PathBuf>) -> Result<Self> {
        let uploads_dir = uploads_dir.into();
        tokio::fs::create_dir_all(&uploads_dir).await?;
        Ok(Self { uploads_dir })
    }

    /// The directory uploads are written to.
    #[must_use]
    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Pick a unique destination for an incoming file. Returns the saved
    /// name and its full path.
    #[must_use]
    pub fn allocate(&self, original_name: &str) -> (String, PathBuf) {
        let saved_name = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            sanitize_file_name(original_name)
        );
        let path = self.uploads_dir.join(&saved_name);
        (saved_name, path)
    }

    /// Resolve a saved name to its path, refusing anything that would
    /// escape the uploads directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for names with path separators or
    /// parent components, and [`Error::ReceivedFileNotFound`] when the
    /// file does not exist.
    pub async fn resolve(&self, saved_name: &str) -> Result<PathBuf> {
        if saved_name.is_empty()
            || saved_name.contains('/')
            || saved_name.contains('\\')
            || saved_name.contains("..")
        {
            return Err(Error::InvalidPath(saved_name.to_string()));
        }

        let path = self.uploads_dir.join(saved_name);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::ReceivedFileNotFound(saved_name.to_string()));
        }
        Ok(path)
    }

    /// List stored files, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub async fn list(&self) -> Result<Vec<StoredFile>> {
        let mut entries = tokio::fs::read_dir(&self.uploads_dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            files.push(StoredFile {
                filename: entry.file_name().to_string_lossy().to_string(),
                size: metadata.len(),
                created_at: DateTime::<Utc>::from(created),
            });
        }

        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }

    /// Best-effort removal of a partially written file after a failed
    /// upload. Errors are logged, not surfaced.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::debug!(path = %path.display(), "Failed to remove partial file: {e}");
        }
    }
}
