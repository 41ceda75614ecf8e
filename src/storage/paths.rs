use std::path::{Path, PathBuf};

use path_absolutize::Absolutize;

use super::{DocumentStore, StoreError};

impl DocumentStore {
    /// Map a caller-supplied logical path to a host path.
    ///
    /// `docs/a.docx` and `/docs/a.docx` resolve identically. `..` is collapsed
    /// without touching the filesystem, then the result is checked against the
    /// configured root component by component.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let trimmed = path.trim();
        if trimmed.is_empty() || trimmed.contains('\0') {
            return Err(StoreError::InvalidPath);
        }
        let rooted = if trimmed.starts_with('/') { trimmed.to_string() } else { format!("/{trimmed}") };
        let abs = Path::new(&rooted).absolutize().map_err(|_| StoreError::InvalidPath)?.to_path_buf();

        if let Some(root) = &self.root {
            let root_abs = root.absolutize().map_err(|_| StoreError::InvalidPath)?;
            if !is_prefix_path(&abs, &root_abs) {
                tracing::warn!(target: "storage", "rejected path outside root: {}", abs.display());
                return Err(StoreError::InvalidPath);
            }
        }
        Ok(abs)
    }
}

// Component-wise, so /data/vol1 never matches /data/vol10.
fn is_prefix_path(path: &Path, prefix: &Path) -> bool {
    if cfg!(windows) {
        let pr = path.components().next();
        let rr = prefix.components().next();
        if pr != rr { return false; }
    }
    path.starts_with(prefix)
}
