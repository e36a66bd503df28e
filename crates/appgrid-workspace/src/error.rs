//! Workspace and build errors.

use std::path::PathBuf;

use thiserror::Error;

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkspaceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source directory not found: {0}")]
    SourceMissing(PathBuf),

    /// The toolchain ran and failed.
    #[error("build failed (exit code {code:?}): {stderr}")]
    Build { code: Option<i32>, stderr: String },

    #[error("toolchain unavailable: {0}")]
    Toolchain(String),

    #[error("invalid workspace path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("corrupt metadata at {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("invalid platform {0:?}, expected <os>/<arch>")]
    Platform(String),

    #[error(transparent)]
    Core(#[from] appgrid_core::CoreError),
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> WorkspaceError {
        let path = path.into();
        move |source| WorkspaceError::Io { path, source }
    }
}
