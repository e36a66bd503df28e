//! Actuator trait.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ContainerResult;

/// Grace period given to a container's processes on stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to create one app container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// `<user>-<app>`.
    pub name: String,
    /// Host directory bind-mounted into the container (the app workspace).
    pub host_path: PathBuf,
    pub container_path: String,
    pub command: Vec<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
}

/// Container engine operations.
///
/// Implementations are safe for concurrent use; callers serialize
/// operations per container name.
#[async_trait]
pub trait ContainerActuator: Send + Sync + 'static {
    /// Short identifier for logs.
    fn kind(&self) -> &'static str;

    /// Create (but do not start) a container. Returns the engine's id.
    async fn create_with_mount_and_command(&self, spec: &ContainerSpec) -> ContainerResult<String>;

    async fn start(&self, name: &str) -> ContainerResult<()>;

    /// Stop a container. A missing container is [`ContainerError::NotFound`].
    ///
    /// [`ContainerError::NotFound`]: crate::ContainerError::NotFound
    async fn stop(&self, name: &str, timeout: Duration) -> ContainerResult<()>;

    /// Remove a container. Removing a missing container succeeds.
    async fn remove(&self, name: &str, force: bool) -> ContainerResult<()>;

    async fn exists(&self, name: &str) -> ContainerResult<bool>;

    /// `false` for stopped and missing containers alike.
    async fn is_running(&self, name: &str) -> ContainerResult<bool>;

    /// Run a command to completion and return its stdout.
    async fn exec(&self, name: &str, cmd: &[String]) -> ContainerResult<String>;

    /// Launch a command inside a running container without waiting for it.
    async fn exec_detached(&self, name: &str, cmd: &[String]) -> ContainerResult<()>;

    /// Copy a host file or directory into the container.
    async fn copy_in(&self, name: &str, src: &Path, dst: &str) -> ContainerResult<()>;
}
