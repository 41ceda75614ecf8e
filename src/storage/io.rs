use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::{DocumentStore, StoreError};

/// Removes the temp file on drop unless the rename went through.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self { Self { path, armed: true } }
    fn disarm(&mut self) { self.armed = false; }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(target: "storage", "failed to remove temp file {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let tmp = format!(".{}.tmp-{}", name, uuid::Uuid::new_v4().simple());
    match dest.parent() {
        Some(dir) => dir.join(tmp),
        None => PathBuf::from(tmp),
    }
}

fn save_failed(context: &str, e: std::io::Error) -> StoreError {
    StoreError::SaveFailed(format!("{context}: {e}"))
}

impl DocumentStore {
    /// Replace the document at `path` with the bytes from `reader`, using the store's size cap.
    pub async fn save<R: AsyncRead + Unpin>(&self, path: &str, reader: R) -> Result<u64, StoreError> {
        self.save_with_limit(path, reader, self.max_size).await
    }

    /// Atomic write: stream into a temp file beside the destination, then rename over it.
    ///
    /// Reading stops as soon as more than `limit` bytes have arrived. On any failure the
    /// temp file is removed and the destination is left untouched. Returns the byte count.
    pub async fn save_with_limit<R: AsyncRead + Unpin>(
        &self,
        path: &str,
        reader: R,
        limit: Option<u64>,
    ) -> Result<u64, StoreError> {
        let dest = self.resolve(path)?;
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| save_failed("create directory", e))?;
        }

        let tmp_path = temp_path_for(&dest);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await
            .map_err(|e| save_failed("create temp file", e))?;
        let mut guard = TempGuard::new(tmp_path.clone());

        let mut limited = reader.take(limit.map(|l| l.saturating_add(1)).unwrap_or(u64::MAX));
        let written = tokio::io::copy(&mut limited, &mut file).await.map_err(|e| save_failed("write", e))?;
        if let Some(l) = limit {
            if written > l {
                return Err(StoreError::TooLarge { limit: l });
            }
        }

        file.flush().await.map_err(|e| save_failed("flush", e))?;
        file.sync_all().await.map_err(|e| save_failed("sync", e))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &dest).await.map_err(|e| save_failed("rename", e))?;
        guard.disarm();
        tracing::debug!(target: "storage", "saved {} ({} bytes)", dest.display(), written);
        Ok(written)
    }
}
