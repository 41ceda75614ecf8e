//!
//! docbridge document store
//! ------------------------
//! Path-addressed access to the documents the editor works on. Reads hand out a
//! fresh `DocumentRef` plus an open file; writes go through a same-directory temp
//! file and a rename so readers only ever observe complete versions.
//!
//! Callers address documents by logical path. A missing leading slash is added
//! and `.`/`..` segments are collapsed lexically. When a root is configured every
//! resolved path must stay inside it.
//!
//! There is no in-process locking: concurrent saves to one path each complete or
//! fail on their own and the last rename wins.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::formats::extension_of;

mod paths;
mod io;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("file not found")]
    NotFound,
    #[error("invalid path")]
    InvalidPath,
    #[error("permission denied")]
    PermissionDenied,
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("save failed: {0}")]
    SaveFailed(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl StoreError {
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound,
            std::io::ErrorKind::PermissionDenied => StoreError::PermissionDenied,
            _ => StoreError::Io(err.to_string()),
        }
    }
}

/// Metadata snapshot of one stored document. Obtained per operation, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRef {
    /// Normalized logical path, always starting with `/`.
    pub path: String,
    pub name: String,
    /// Lowercase, no leading dot; empty when the name has none.
    pub extension: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    root: Option<PathBuf>,
    max_size: Option<u64>,
}

impl DocumentStore {
    pub fn new(root: Option<PathBuf>, max_size: Option<u64>) -> Self { Self { root, max_size } }

    pub fn unrestricted() -> Self { Self::default() }

    pub fn root(&self) -> Option<&std::path::Path> { self.root.as_deref() }
    pub fn max_size(&self) -> Option<u64> { self.max_size }

    /// Current metadata for a document. Directories are not documents.
    pub async fn stat(&self, path: &str) -> Result<DocumentRef, StoreError> {
        let resolved = self.resolve(path)?;
        stat_resolved(&resolved).await
    }

    /// Metadata plus an open read handle.
    pub async fn open(&self, path: &str) -> Result<(DocumentRef, tokio::fs::File), StoreError> {
        let resolved = self.resolve(path)?;
        let doc = stat_resolved(&resolved).await?;
        let file = tokio::fs::File::open(&resolved).await.map_err(StoreError::from_read)?;
        Ok((doc, file))
    }
}

async fn stat_resolved(resolved: &std::path::Path) -> Result<DocumentRef, StoreError> {
    let meta = tokio::fs::metadata(resolved).await.map_err(StoreError::from_read)?;
    if meta.is_dir() {
        return Err(StoreError::InvalidPath);
    }
    let modified = meta.modified().map(DateTime::<Utc>::from).map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(document_ref(resolved, meta.len(), modified))
}

fn document_ref(resolved: &std::path::Path, size: u64, modified: DateTime<Utc>) -> DocumentRef {
    let path = resolved.to_string_lossy().replace('\\', "/");
    let name = resolved.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let extension = extension_of(&name);
    DocumentRef { path, name, extension, size, modified }
}
