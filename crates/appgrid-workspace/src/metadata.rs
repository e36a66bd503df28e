//! `version.json` and `current_version.txt`.

use std::fs;
use std::io::Write;
use std::path::Path;

use appgrid_core::Version;
use serde::{Deserialize, Serialize};

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::layout::AppWorkspace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub current_version: Version,
    pub latest_version: Version,
    /// SHA-256 of the source tree `latest_version` was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
}

impl VersionMetadata {
    /// Read `version.json`. A missing file means the app was never built.
    pub fn read(ws: &AppWorkspace) -> WorkspaceResult<Option<Self>> {
        let path = ws.version_json_path();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WorkspaceError::Io { path, source: e }),
        };
        let meta = serde_json::from_slice(&bytes).map_err(|e| WorkspaceError::Metadata {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(meta))
    }

    /// Rewrite `version.json`, then `current_version.txt`.
    pub fn write(&self, ws: &AppWorkspace) -> WorkspaceResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| WorkspaceError::Metadata {
            path: ws.version_json_path(),
            reason: e.to_string(),
        })?;
        atomic_write(&ws.version_json_path(), &json)?;
        atomic_write(
            &ws.current_version_txt_path(),
            self.current_version.to_string().as_bytes(),
        )?;
        Ok(())
    }
}

/// Version named in `current_version.txt`, if present and well-formed.
pub fn read_current_version_txt(ws: &AppWorkspace) -> Option<Version> {
    fs::read_to_string(ws.current_version_txt_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Write to a sibling temp file and rename it over `path`.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> WorkspaceResult<()> {
    let parent = path.parent().ok_or_else(|| WorkspaceError::InvalidPath {
        path: path.display().to_string(),
        reason: "no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(WorkspaceError::io(parent))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    {
        let mut f = fs::File::create(&tmp).map_err(WorkspaceError::io(&tmp))?;
        f.write_all(bytes).map_err(WorkspaceError::io(&tmp))?;
        f.sync_all().map_err(WorkspaceError::io(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(WorkspaceError::io(path))?;
    Ok(())
}
