//! Docker CLI driver.
//!
//! Each operation is one `docker` invocation through `tokio::process`.
//! A missing container is recognised from the engine's stderr so
//! `remove` can stay idempotent and `stop` can report `NotFound`.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::actuator::{ContainerActuator, ContainerSpec};
use crate::error::{ContainerError, ContainerResult};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub struct DockerCli {
    binary: PathBuf,
    command_timeout: Duration,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Upper bound on any single engine invocation.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn output(&self, op: &'static str, args: &[String]) -> ContainerResult<Output> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(op, ?args, "running container engine");

        match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ContainerError::Timeout {
                op,
                after: self.command_timeout,
            }),
        }
    }

    /// Run and require success; returns trimmed stdout.
    async fn run(&self, op: &'static str, name: &str, args: &[String]) -> ContainerResult<String> {
        let output = self.output(op, args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_missing(&stderr) {
            return Err(ContainerError::NotFound(name.to_string()));
        }
        if stderr.contains("is already in use") {
            return Err(ContainerError::AlreadyExists(name.to_string()));
        }
        Err(ContainerError::Command {
            op,
            code: output.status.code(),
            stderr,
        })
    }
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("no such container")
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn create_args(spec: &ContainerSpec) -> ContainerResult<Vec<String>> {
    if spec.command.is_empty() {
        return Err(ContainerError::Invalid(format!(
            "container {} has an empty command",
            spec.name
        )));
    }
    let mut out = args(["create", "--name"]);
    out.push(spec.name.clone());
    out.push("-v".to_string());
    out.push(format!("{}:{}", spec.host_path.display(), spec.container_path));
    out.push("-w".to_string());
    out.push(spec.container_path.clone());
    for kv in &spec.env {
        out.push("-e".to_string());
        out.push(kv.clone());
    }
    out.push(spec.image.clone());
    out.extend(spec.command.iter().cloned());
    Ok(out)
}

#[async_trait]
impl ContainerActuator for DockerCli {
    fn kind(&self) -> &'static str {
        "docker"
    }

    async fn create_with_mount_and_command(&self, spec: &ContainerSpec) -> ContainerResult<String> {
        let id = self.run("create", &spec.name, &create_args(spec)?).await?;
        info!(name = %spec.name, image = %spec.image, %id, "container created");
        Ok(id)
    }

    async fn start(&self, name: &str) -> ContainerResult<()> {
        let mut a = args(["start"]);
        a.push(name.to_string());
        self.run("start", name, &a).await?;
        info!(%name, "container started");
        Ok(())
    }

    async fn stop(&self, name: &str, timeout: Duration) -> ContainerResult<()> {
        let mut a = args(["stop", "-t"]);
        a.push(timeout.as_secs().to_string());
        a.push(name.to_string());
        self.run("stop", name, &a).await?;
        info!(%name, "container stopped");
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> ContainerResult<()> {
        let mut a = args(["rm"]);
        if force {
            a.push("-f".to_string());
        }
        a.push(name.to_string());
        match self.run("remove", name, &a).await {
            Ok(_) => {
                info!(%name, "container removed");
                Ok(())
            }
            Err(ContainerError::NotFound(_)) => {
                debug!(%name, "container already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, name: &str) -> ContainerResult<bool> {
        let mut a = args(["inspect", "--format", "{{.Id}}"]);
        a.push(name.to_string());
        match self.run("inspect", name, &a).await {
            Ok(_) => Ok(true),
            Err(ContainerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_running(&self, name: &str) -> ContainerResult<bool> {
        let mut a = args(["inspect", "--format", "{{.State.Running}}"]);
        a.push(name.to_string());
        match self.run("inspect", name, &a).await {
            Ok(state) => Ok(state == "true"),
            Err(ContainerError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> ContainerResult<String> {
        if cmd.is_empty() {
            return Err(ContainerError::Invalid("empty exec command".to_string()));
        }
        let mut a = args(["exec"]);
        a.push(name.to_string());
        a.extend(cmd.iter().cloned());
        self.run("exec", name, &a).await
    }

    async fn exec_detached(&self, name: &str, cmd: &[String]) -> ContainerResult<()> {
        if cmd.is_empty() {
            return Err(ContainerError::Invalid("empty exec command".to_string()));
        }
        let mut a = args(["exec", "-d"]);
        a.push(name.to_string());
        a.extend(cmd.iter().cloned());
        self.run("exec", name, &a).await?;
        info!(%name, command = ?cmd, "detached exec launched");
        Ok(())
    }

    async fn copy_in(&self, name: &str, src: &Path, dst: &str) -> ContainerResult<()> {
        if !src.exists() {
            warn!(%name, src = %src.display(), "copy source missing");
            return Err(ContainerError::Invalid(format!(
                "copy source {} does not exist",
                src.display()
            )));
        }
        let a = vec![
            "cp".to_string(),
            src.display().to_string(),
            format!("{name}:{dst}"),
        ];
        self.run("copy", name, &a).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "appgrid/runtime:latest".to_string(),
            name: "alice-todo".to_string(),
            host_path: PathBuf::from("/srv/apps/alice/todo"),
            container_path: "/workspace".to_string(),
            command: vec!["/workspace/workplace/bin/app".to_string()],
            env: vec!["APP_USER=alice".to_string()],
        }
    }

    #[test]
    fn create_args_mount_env_and_command() {
        let a = create_args(&spec()).unwrap();
        assert_eq!(
            a,
            vec![
                "create",
                "--name",
                "alice-todo",
                "-v",
                "/srv/apps/alice/todo:/workspace",
                "-w",
                "/workspace",
                "-e",
                "APP_USER=alice",
                "appgrid/runtime:latest",
                "/workspace/workplace/bin/app",
            ]
        );
    }

    #[test]
    fn create_rejects_empty_command() {
        let mut s = spec();
        s.command.clear();
        assert!(matches!(create_args(&s), Err(ContainerError::Invalid(_))));
    }

    #[test]
    fn recognises_missing_container_stderr() {
        assert!(is_missing("Error response from daemon: No such container: alice-todo"));
        assert!(!is_missing("permission denied"));
    }

    #[tokio::test]
    async fn missing_engine_binary_is_spawn_error() {
        let docker = DockerCli::new("/nonexistent/docker-binary");
        let err = docker.is_running("alice-todo").await.unwrap_err();
        assert!(matches!(err, ContainerError::Spawn(_)));
    }
}
