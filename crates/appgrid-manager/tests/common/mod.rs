//! Shared harness: a manager wired to in-memory collaborators and a fake
//! app process driven by the mock actuator.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use appgrid_bus::{BusExt, BusHeaders, MemoryBus, MessageBus};
use appgrid_container::{MockActuator, MockEvent};
use appgrid_core::config::{ContainerConfig, TimeoutsConfig};
use appgrid_core::{AppKey, EventDispatcher, Version, VersionKey, epoch_secs, subjects};
use appgrid_discovery::DiscoveryService;
use appgrid_license::LicenseGate;
use appgrid_manager::{AppManager, CreateRequest, ManagerDeps, UpdateRequest};
use appgrid_qps::QpsTracker;
use appgrid_state::StateStore;
use appgrid_workspace::{Builder, StubToolchain, VersionMetadata, Workspace};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub struct Behaviour {
    /// Processes never announce startup.
    pub mute_startup: AtomicBool,
    /// Processes ignore the shutdown command.
    pub ignore_shutdown: AtomicBool,
}

/// A lifecycle control message the manager sent to an app version.
#[derive(Debug, Clone)]
pub struct ControlMessage {
    pub subject: String,
    pub kind: String,
    pub headers: BusHeaders,
}

pub struct Harness {
    pub bus: Arc<dyn MessageBus>,
    pub mock: Arc<MockActuator>,
    pub toolchain: Arc<StubToolchain>,
    pub discovery: Arc<DiscoveryService>,
    pub qps: Arc<QpsTracker>,
    pub manager: Arc<AppManager>,
    pub behaviour: Arc<Behaviour>,
    /// `onAppUpdate` and `shutdown` messages, in send order.
    pub control: Arc<Mutex<Vec<ControlMessage>>>,
    pub dir: tempfile::TempDir,
    pub shutdown: watch::Sender<bool>,
}

pub fn timeouts() -> TimeoutsConfig {
    TimeoutsConfig {
        app_startup: Duration::from_millis(1500),
        app_shutdown: Duration::from_secs(1),
        container_start: Duration::from_secs(2),
        drain_check_interval: Duration::from_millis(20),
        drain_confirm_samples: 3,
        drain_max_duration: Duration::from_secs(5),
        delete_drain_max_duration: Duration::from_secs(2),
        ..TimeoutsConfig::default()
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(timeouts(), QpsTracker::new(Duration::from_secs(60), 0.1, 10_000)).await
    }

    pub async fn with(timeouts: TimeoutsConfig, qps: QpsTracker) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let events = EventDispatcher::new();
        let workspace = Workspace::new(dir.path());
        let (shutdown, rx) = watch::channel(false);

        let discovery = Arc::new(DiscoveryService::new(
            Arc::clone(&bus),
            events.clone(),
            workspace.clone(),
            "host-a",
        ));
        Arc::clone(&discovery).start(rx.clone()).await.unwrap();

        let mock = Arc::new(MockActuator::new());
        let behaviour = Arc::new(Behaviour {
            mute_startup: AtomicBool::new(false),
            ignore_shutdown: AtomicBool::new(false),
        });
        tokio::spawn(simulate(
            Arc::clone(&bus),
            dir.path().to_path_buf(),
            mock.events(),
            Arc::clone(&behaviour),
        ));

        let control = Arc::new(Mutex::new(Vec::new()));
        for pattern in ["runtime.status.>", "app.status.>"] {
            let mut sub = bus.subscribe(pattern).await.unwrap();
            let control = Arc::clone(&control);
            tokio::spawn(async move {
                while let Some(msg) = sub.next().await {
                    let kind = msg
                        .decode::<serde_json::Value>()
                        .ok()
                        .and_then(|v| v["type"].as_str().map(str::to_string))
                        .unwrap_or_default();
                    if kind == "onAppUpdate" || kind == "shutdown" {
                        control.lock().unwrap().push(ControlMessage {
                            subject: msg.subject.clone(),
                            kind,
                            headers: msg.headers.clone(),
                        });
                    }
                }
            });
        }

        let toolchain = Arc::new(StubToolchain::new());
        let builder = Builder::new(
            toolchain.clone(),
            "linux/amd64".parse().unwrap(),
            "{user}_{app}_{version}",
        )
        .unwrap();
        let qps = Arc::new(qps);
        let manager = Arc::new(AppManager::new(
            ManagerDeps {
                bus: Arc::clone(&bus),
                actuator: mock.clone(),
                store: StateStore::open_in_memory().unwrap(),
                workspace,
                builder: Arc::new(builder),
                discovery: Arc::clone(&discovery),
                qps: Arc::clone(&qps),
                license: Arc::new(LicenseGate::new(Arc::clone(&bus), None)),
                events,
            },
            ContainerConfig::default(),
            timeouts,
        ));
        manager.start_event_listener(rx);

        Self {
            bus,
            mock,
            toolchain,
            discovery,
            qps,
            manager,
            behaviour,
            control,
            dir,
            shutdown,
        }
    }

    pub fn app_key(&self) -> AppKey {
        AppKey::new("alice", "todo").unwrap()
    }

    pub fn vkey(&self, n: u32) -> VersionKey {
        self.app_key().with_version(Version::new(n).unwrap())
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_source(&self, body: &str) {
        let code = self.base().join("alice/todo/code");
        std::fs::create_dir_all(&code).unwrap();
        std::fs::write(code.join("main.go"), body).unwrap();
    }

    pub fn control_messages(&self) -> Vec<ControlMessage> {
        self.control.lock().unwrap().clone()
    }

    /// Wait up to two seconds for at least `n` control messages.
    pub async fn wait_for_control(&self, n: usize) -> Vec<ControlMessage> {
        for _ in 0..200 {
            let seen = self.control_messages();
            if seen.len() >= n {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.control_messages()
    }

    pub fn update_req(&self) -> UpdateRequest {
        UpdateRequest {
            user: "alice".to_string(),
            app: "todo".to_string(),
            ..UpdateRequest::default()
        }
    }

    /// Create alice/todo and deploy v1.
    pub async fn deploy_first(&self) {
        self.manager
            .create(CreateRequest {
                user: "alice".to_string(),
                app: "todo".to_string(),
                ..CreateRequest::default()
            })
            .await
            .unwrap();
        self.write_source("package main // v1");
        let handle = self.manager.update(self.update_req()).await.unwrap();
        assert_eq!(handle.version, Version::FIRST);
        handle.drained().await;
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Play the app processes a real container would run.
async fn simulate(
    bus: Arc<dyn MessageBus>,
    base: PathBuf,
    mut events: broadcast::Receiver<MockEvent>,
    behaviour: Arc<Behaviour>,
) {
    let mut procs: HashMap<String, Vec<JoinHandle<()>>> = HashMap::new();
    while let Ok(event) = events.recv().await {
        match event {
            MockEvent::Started { name, .. } => {
                let Some(key) = app_of(&name) else { continue };
                let ws = Workspace::new(&base).app(&key);
                let Ok(Some(meta)) = VersionMetadata::read(&ws) else {
                    continue;
                };
                let vkey = key.with_version(meta.current_version);
                procs
                    .entry(name)
                    .or_default()
                    .push(spawn_process(Arc::clone(&bus), vkey, Arc::clone(&behaviour)));
            }
            MockEvent::Exec { name, command } => {
                let Some(key) = app_of(&name) else { continue };
                let Some(version) = command
                    .first()
                    .and_then(|bin| bin.rsplit('_').next())
                    .and_then(|v| v.parse::<Version>().ok())
                else {
                    continue;
                };
                procs.entry(name).or_default().push(spawn_process(
                    Arc::clone(&bus),
                    key.with_version(version),
                    Arc::clone(&behaviour),
                ));
            }
            MockEvent::Stopped { name } | MockEvent::Removed { name } => {
                for p in procs.remove(&name).unwrap_or_default() {
                    p.abort();
                }
            }
        }
    }
}

fn app_of(container: &str) -> Option<AppKey> {
    let (user, app) = container.split_once('-')?;
    AppKey::new(user, app).ok()
}

fn spawn_process(bus: Arc<dyn MessageBus>, key: VersionKey, behaviour: Arc<Behaviour>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(mut control) = bus.subscribe(&subjects::app_status(&key)).await else {
            return;
        };
        if !behaviour.mute_startup.load(Ordering::SeqCst) {
            let startup = json!({"type": "startup", "start_time": epoch_secs()});
            let _ = bus
                .publish_json(&subjects::runtime_status(&key), BusHeaders::new(), &startup)
                .await;
        }
        while let Some(msg) = control.next().await {
            let is_shutdown = msg
                .decode::<serde_json::Value>()
                .map(|v| v["type"] == "shutdown")
                .unwrap_or(false);
            if is_shutdown && !behaviour.ignore_shutdown.load(Ordering::SeqCst) {
                let close = json!({"type": "close"});
                let _ = bus
                    .publish_json(&subjects::runtime_status(&key), BusHeaders::new(), &close)
                    .await;
                return;
            }
        }
    })
}
