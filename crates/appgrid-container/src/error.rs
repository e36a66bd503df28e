//! Actuator errors.

use std::time::Duration;

use thiserror::Error;

pub type ContainerResult<T> = Result<T, ContainerError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container already exists: {0}")]
    AlreadyExists(String),

    /// The engine ran but reported failure.
    #[error("{op} failed (exit code {code:?}): {stderr}")]
    Command {
        op: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("failed to spawn container engine: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid container request: {0}")]
    Invalid(String),
}
