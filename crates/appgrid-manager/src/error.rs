use std::time::Duration;

use appgrid_bus::BusError;
use appgrid_container::ContainerError;
use appgrid_core::CoreError;
use appgrid_license::QuotaError;
use appgrid_state::StateError;
use appgrid_workspace::WorkspaceError;
use thiserror::Error;

pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManagerError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("app not found: {0}")]
    NotFound(String),

    #[error("app already exists: {0}")]
    AlreadyExists(String),

    #[error("another operation is in progress for {0}")]
    InProgress(String),

    #[error("timeout waiting for {what} after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{step}: {source}")]
    Context {
        step: String,
        #[source]
        source: Box<ManagerError>,
    },
}

/// Coarse error classes reported back to bus callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AlreadyExists,
    InProgress,
    Timeout,
    Bus,
    Container,
    Build,
    Quota,
    Internal,
}

impl ErrorKind {
    /// Status code carried in the reply header.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Quota => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::Build => 422,
            ErrorKind::InProgress => 423,
            ErrorKind::Bus => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::Container | ErrorKind::Internal => 500,
        }
    }
}

impl ManagerError {
    /// Prefix the error with the step that produced it.
    pub fn context(self, step: impl Into<String>) -> Self {
        ManagerError::Context {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context layers.
    pub fn root(&self) -> &ManagerError {
        match self {
            ManagerError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            ManagerError::Validation(_) => ErrorKind::Validation,
            ManagerError::NotFound(_) => ErrorKind::NotFound,
            ManagerError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ManagerError::InProgress(_) => ErrorKind::InProgress,
            ManagerError::Timeout { .. } => ErrorKind::Timeout,
            ManagerError::Bus(e) if e.is_timeout() => ErrorKind::Timeout,
            ManagerError::Bus(_) => ErrorKind::Bus,
            ManagerError::Container(ContainerError::Timeout { .. }) => ErrorKind::Timeout,
            ManagerError::Container(_) => ErrorKind::Container,
            ManagerError::Workspace(WorkspaceError::Core(_)) => ErrorKind::Validation,
            ManagerError::Workspace(WorkspaceError::InvalidPath { .. }) => ErrorKind::Validation,
            ManagerError::Workspace(WorkspaceError::SourceMissing(_)) => ErrorKind::NotFound,
            ManagerError::Workspace(_) => ErrorKind::Build,
            ManagerError::Quota(_) => ErrorKind::Quota,
            ManagerError::State(_) | ManagerError::Context { .. } => ErrorKind::Internal,
        }
    }
}

impl From<CoreError> for ManagerError {
    fn from(e: CoreError) -> Self {
        ManagerError::Validation(e.to_string())
    }
}
