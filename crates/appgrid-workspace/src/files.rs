//! Workspace-relative file primitives.
//!
//! These back the manager's file subjects. Paths are relative to the app
//! root; absolute paths and `..` are rejected, and nothing may be written
//! under `workplace/`, which belongs to the builder.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::layout::AppWorkspace;
use crate::metadata::atomic_write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

fn invalid(path: &str, reason: &str) -> WorkspaceError {
    WorkspaceError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Resolve a workspace-relative path under the app root.
pub fn resolve(ws: &AppWorkspace, rel: &str) -> WorkspaceResult<PathBuf> {
    let path = Path::new(rel);
    let mut out = ws.root().to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid(rel, "'..' is not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid(rel, "absolute paths are not allowed"));
            }
        }
    }
    Ok(out)
}

fn resolve_writable(ws: &AppWorkspace, rel: &str) -> WorkspaceResult<PathBuf> {
    let path = resolve(ws, rel)?;
    if path.starts_with(ws.workplace_dir()) {
        return Err(invalid(rel, "workplace/ is managed by the builder"));
    }
    if path == ws.root() {
        return Err(invalid(rel, "path names the workspace root"));
    }
    Ok(path)
}

/// Every file under `rel_dir`, with paths relative to the app root.
pub fn read_directory_files(ws: &AppWorkspace, rel_dir: &str) -> WorkspaceResult<Vec<FileContent>> {
    let dir = resolve(ws, rel_dir)?;
    if !dir.is_dir() {
        return Err(WorkspaceError::SourceMissing(dir));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry.map_err(|e| WorkspaceError::Io {
            path: dir.clone(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = fs::read(entry.path()).map_err(WorkspaceError::io(entry.path()))?;
        let rel = entry
            .path()
            .strip_prefix(ws.root())
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        files.push(FileContent {
            path: rel,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    Ok(files)
}

/// Write each file, creating parent directories. Returns the count.
pub fn batch_write_files(ws: &AppWorkspace, files: &[FileWrite]) -> WorkspaceResult<usize> {
    let resolved: Vec<PathBuf> = files
        .iter()
        .map(|f| resolve_writable(ws, &f.path))
        .collect::<WorkspaceResult<_>>()?;
    for (file, path) in files.iter().zip(&resolved) {
        atomic_write(path, file.content.as_bytes())?;
    }
    debug!(root = %ws.root().display(), count = files.len(), "files written");
    Ok(files.len())
}

/// Create every directory (and its parents). Returns the count.
pub fn batch_create_directory_tree(ws: &AppWorkspace, dirs: &[String]) -> WorkspaceResult<usize> {
    let resolved: Vec<PathBuf> = dirs
        .iter()
        .map(|d| resolve_writable(ws, d))
        .collect::<WorkspaceResult<_>>()?;
    for dir in &resolved {
        fs::create_dir_all(dir).map_err(WorkspaceError::io(dir))?;
    }
    Ok(resolved.len())
}

/// Store the service tree document verbatim as `code/service_tree.json`.
pub fn update_service_tree(ws: &AppWorkspace, tree: &serde_json::Value) -> WorkspaceResult<()> {
    let path = ws.service_tree_path();
    let body = serde_json::to_vec_pretty(tree).map_err(|e| WorkspaceError::Metadata {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    atomic_write(&path, &body)
}
