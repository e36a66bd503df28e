//! Source tree digests.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{WorkspaceError, WorkspaceResult};

/// SHA-256 over every regular file under `dir`: relative path, a NUL
/// separator, then the contents, in file-name order. Hex encoded.
pub fn source_digest(dir: &Path) -> WorkspaceResult<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| WorkspaceError::Io {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        let bytes = fs::read(entry.path()).map_err(WorkspaceError::io(entry.path()))?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}
