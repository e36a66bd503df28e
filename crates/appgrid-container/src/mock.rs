//! In-memory actuator for tests and development mode.
//!
//! Every state change is broadcast as a [`MockEvent`], letting a test
//! harness play the role of the app process that would have been launched.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::actuator::{ContainerActuator, ContainerSpec};
use crate::error::{ContainerError, ContainerResult};

/// Something the mock actuator did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// The container's entry command started.
    Started { name: String, command: Vec<String> },
    /// A detached command was launched inside a running container.
    Exec { name: String, command: Vec<String> },
    Stopped { name: String },
    Removed { name: String },
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    spec: ContainerSpec,
    running: bool,
}

pub struct MockActuator {
    containers: Arc<Mutex<HashMap<String, MockContainer>>>,
    execs: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    failing: Arc<Mutex<HashSet<&'static str>>>,
    events: broadcast::Sender<MockEvent>,
    next_id: Arc<Mutex<u64>>,
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockActuator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            execs: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            events,
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<MockEvent> {
        self.events.subscribe()
    }

    /// Make every subsequent call of `op` fail (`"create"`, `"start"`, ...).
    pub async fn fail_on(&self, op: &'static str) {
        self.failing.lock().await.insert(op);
    }

    pub async fn clear_failures(&self) {
        self.failing.lock().await.clear();
    }

    /// Simulate the container dying outside the runtime's control.
    pub async fn kill(&self, name: &str) {
        if let Some(c) = self.containers.lock().await.get_mut(name) {
            c.running = false;
        }
        let _ = self.events.send(MockEvent::Stopped {
            name: name.to_string(),
        });
    }

    /// Commands passed to `exec` and `exec_detached`, in order.
    pub async fn exec_log(&self) -> Vec<(String, Vec<String>)> {
        self.execs.lock().await.clone()
    }

    pub async fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.containers.lock().await.get(name).map(|c| c.spec.clone())
    }

    pub async fn container_id(&self, name: &str) -> Option<String> {
        self.containers.lock().await.get(name).map(|c| c.id.clone())
    }

    async fn check(&self, op: &'static str) -> ContainerResult<()> {
        if self.failing.lock().await.contains(op) {
            return Err(ContainerError::Command {
                op,
                code: Some(1),
                stderr: format!("injected {op} failure"),
            });
        }
        Ok(())
    }

    async fn record_exec(&self, name: &str, cmd: &[String]) -> ContainerResult<()> {
        let containers = self.containers.lock().await;
        match containers.get(name) {
            Some(c) if c.running => {}
            Some(_) => {
                return Err(ContainerError::Command {
                    op: "exec",
                    code: Some(1),
                    stderr: format!("container {name} is not running"),
                });
            }
            None => return Err(ContainerError::NotFound(name.to_string())),
        }
        drop(containers);
        self.execs
            .lock()
            .await
            .push((name.to_string(), cmd.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl ContainerActuator for MockActuator {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn create_with_mount_and_command(&self, spec: &ContainerSpec) -> ContainerResult<String> {
        self.check("create").await?;
        let mut containers = self.containers.lock().await;
        if containers.contains_key(&spec.name) {
            return Err(ContainerError::AlreadyExists(spec.name.clone()));
        }
        let id = {
            let mut next = self.next_id.lock().await;
            *next += 1;
            format!("mock-{:012x}", *next)
        };
        containers.insert(
            spec.name.clone(),
            MockContainer {
                id: id.clone(),
                spec: spec.clone(),
                running: false,
            },
        );
        debug!(name = %spec.name, %id, "mock container created");
        Ok(id)
    }

    async fn start(&self, name: &str) -> ContainerResult<()> {
        self.check("start").await?;
        let command = {
            let mut containers = self.containers.lock().await;
            let c = containers
                .get_mut(name)
                .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
            if c.running {
                return Ok(());
            }
            c.running = true;
            c.spec.command.clone()
        };
        let _ = self.events.send(MockEvent::Started {
            name: name.to_string(),
            command,
        });
        Ok(())
    }

    async fn stop(&self, name: &str, _timeout: Duration) -> ContainerResult<()> {
        self.check("stop").await?;
        {
            let mut containers = self.containers.lock().await;
            let c = containers
                .get_mut(name)
                .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
            c.running = false;
        }
        let _ = self.events.send(MockEvent::Stopped {
            name: name.to_string(),
        });
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> ContainerResult<()> {
        self.check("remove").await?;
        let removed = {
            let mut containers = self.containers.lock().await;
            match containers.get(name) {
                Some(c) if c.running && !force => {
                    return Err(ContainerError::Command {
                        op: "remove",
                        code: Some(1),
                        stderr: format!("container {name} is running"),
                    });
                }
                Some(_) => containers.remove(name).is_some(),
                None => false,
            }
        };
        if removed {
            let _ = self.events.send(MockEvent::Removed {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn exists(&self, name: &str) -> ContainerResult<bool> {
        Ok(self.containers.lock().await.contains_key(name))
    }

    async fn is_running(&self, name: &str) -> ContainerResult<bool> {
        Ok(self
            .containers
            .lock()
            .await
            .get(name)
            .is_some_and(|c| c.running))
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> ContainerResult<String> {
        self.check("exec").await?;
        self.record_exec(name, cmd).await?;
        Ok(String::new())
    }

    async fn exec_detached(&self, name: &str, cmd: &[String]) -> ContainerResult<()> {
        self.check("exec").await?;
        self.record_exec(name, cmd).await?;
        let _ = self.events.send(MockEvent::Exec {
            name: name.to_string(),
            command: cmd.to_vec(),
        });
        Ok(())
    }

    async fn copy_in(&self, name: &str, src: &Path, _dst: &str) -> ContainerResult<()> {
        self.check("copy").await?;
        if !self.containers.lock().await.contains_key(name) {
            return Err(ContainerError::NotFound(name.to_string()));
        }
        if !src.exists() {
            return Err(ContainerError::Invalid(format!(
                "copy source {} does not exist",
                src.display()
            )));
        }
        Ok(())
    }
}
