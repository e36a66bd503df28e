//! App lifecycle: create, update with hand-off, delete.

use std::collections::HashSet;
use std::sync::Arc;

use appgrid_bus::{BusExt, MessageBus, Rendezvous};
use appgrid_container::{ContainerActuator, ContainerError, ContainerSpec, DEFAULT_STOP_TIMEOUT};
use appgrid_core::config::{ContainerConfig, TimeoutsConfig};
use appgrid_core::{
    AppKey, EventDispatcher, EventTopic, RuntimeEvent, Version, VersionKey, epoch_secs, subjects,
};
use appgrid_discovery::DiscoveryService;
use appgrid_license::LicenseGate;
use appgrid_qps::QpsTracker;
use appgrid_state::{AppRecord, AppStatus, AppVersionRecord, StateStore};
use appgrid_workspace::{AppWorkspace, BuildOutcome, Builder, Workspace};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::drain::{Drain, DrainPhase, DrainPolicy, DrainStep};
use crate::error::{ManagerError, ManagerResult};
use crate::guard::{AppGuards, AppLease};
use crate::protocol::{CreateRequest, DeleteRequest, RequestContext, UpdateRequest};

/// Collaborators the manager coordinates.
pub struct ManagerDeps {
    pub bus: Arc<dyn MessageBus>,
    pub actuator: Arc<dyn ContainerActuator>,
    pub store: StateStore,
    pub workspace: Workspace,
    pub builder: Arc<Builder>,
    pub discovery: Arc<DiscoveryService>,
    pub qps: Arc<QpsTracker>,
    pub license: Arc<LicenseGate>,
    pub events: EventDispatcher,
}

/// Outcome of retiring one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub version: Version,
    pub phase: DrainPhase,
    pub forced: bool,
}

/// A promoted update whose old versions may still be draining.
pub struct UpdateHandle {
    pub version: Version,
    pub previous: Option<Version>,
    /// Versions being retired in the background.
    pub retiring: Vec<Version>,
    retirement: JoinHandle<Vec<DrainReport>>,
}

impl UpdateHandle {
    /// Wait for every retiring version to finish draining.
    pub async fn drained(self) -> Vec<DrainReport> {
        match self.retirement.await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(error = %e, "retirement task failed");
                Vec::new()
            }
        }
    }
}

pub struct AppManager {
    bus: Arc<dyn MessageBus>,
    actuator: Arc<dyn ContainerActuator>,
    store: StateStore,
    workspace: Workspace,
    builder: Arc<Builder>,
    discovery: Arc<DiscoveryService>,
    qps: Arc<QpsTracker>,
    license: Arc<LicenseGate>,
    events: EventDispatcher,
    container: ContainerConfig,
    timeouts: TimeoutsConfig,
    guards: AppGuards,
    startups: Rendezvous<VersionKey, ()>,
    closes: Rendezvous<VersionKey, ()>,
}

impl AppManager {
    pub fn new(deps: ManagerDeps, container: ContainerConfig, timeouts: TimeoutsConfig) -> Self {
        Self {
            bus: deps.bus,
            actuator: deps.actuator,
            store: deps.store,
            workspace: deps.workspace,
            builder: deps.builder,
            discovery: deps.discovery,
            qps: deps.qps,
            license: deps.license,
            events: deps.events,
            container,
            timeouts,
            guards: AppGuards::new(),
            startups: Rendezvous::new(),
            closes: Rendezvous::new(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn is_busy(&self, key: &AppKey) -> bool {
        self.guards.is_busy(key)
    }

    /// Claim the per-app lease that update and delete hold, for work on
    /// the app's workspace outside the manager.
    pub fn lease(&self, key: &AppKey) -> ManagerResult<AppLease> {
        self.guards.try_acquire(key)
    }

    /// Seed discovery's current-version view from persisted rows.
    pub async fn restore(&self) -> ManagerResult<usize> {
        let apps = self.store.list_apps()?;
        let mut seeded = 0;
        for app in &apps {
            if let Some(version) = app.current_version {
                self.discovery.set_current_version(&app.key(), Some(version)).await;
                seeded += 1;
            }
        }
        info!(apps = apps.len(), seeded, "manager state restored");
        Ok(seeded)
    }

    /// React to discovery transitions until shutdown.
    pub fn start_event_listener(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut sub = self.events.subscribe(&[EventTopic::Startup, EventTopic::Close]);
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = sub.recv() => match event {
                        Some(event) => manager.on_event(event).await,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("manager event listener stopped");
        })
    }

    async fn on_event(&self, event: RuntimeEvent) {
        match event {
            // Rows are written before the waiter wakes.
            RuntimeEvent::AppStartup { key, .. } => {
                if let Err(e) = self.on_app_startup(&key) {
                    warn!(version = %key, error = %e, "failed to record startup");
                }
                self.startups.notify(&key, ());
            }
            RuntimeEvent::AppClose { key } => {
                if let Err(e) = self.on_app_close(&key).await {
                    warn!(version = %key, error = %e, "failed to record close");
                }
                self.closes.notify(&key, ());
            }
            RuntimeEvent::AppPromoted { .. } => {}
        }
    }

    /// A current version that comes back after a loss reactivates its app.
    fn on_app_startup(&self, key: &VersionKey) -> ManagerResult<()> {
        let app_key = key.app_key();
        let Some(mut app) = self.store.get_app(&app_key)? else {
            return Ok(());
        };
        if app.current_version != Some(key.version) {
            return Ok(());
        }
        let now = epoch_secs();
        if app.status == AppStatus::Inactive {
            app.status = AppStatus::Active;
            app.last_seen = now;
            self.store.put_app(&app)?;
            info!(app = %app_key, version = %key.version, "app reactivated");
        }
        match self.store.get_version(key)? {
            Some(row) if !row.is_stopped() => {}
            _ => {
                let row = AppVersionRecord::started(key, app_key.container_name(), now);
                self.store.put_version(&row)?;
            }
        }
        Ok(())
    }

    async fn on_app_close(&self, key: &VersionKey) -> ManagerResult<()> {
        let app_key = key.app_key();
        let Some(mut app) = self.store.get_app(&app_key)? else {
            return Ok(());
        };
        self.record_stopped(key)?;
        if !self.discovery.running_versions(&app_key).await.is_empty() {
            return Ok(());
        }
        if app.status == AppStatus::Active {
            app.status = AppStatus::Inactive;
            app.last_seen = epoch_secs();
            self.store.put_app(&app)?;
            info!(app = %app_key, version = %key.version, "no version running, app inactive");
        }
        Ok(())
    }

    fn record_stopped(&self, key: &VersionKey) -> ManagerResult<()> {
        let now = epoch_secs();
        let mut row = match self.store.get_version(key)? {
            Some(row) => row,
            None => AppVersionRecord::started(key, key.app_key().container_name(), now),
        };
        if !row.is_stopped() {
            row.mark_stopped(now);
            self.store.put_version(&row)?;
            debug!(version = %key, stop_time = now, "version stop recorded");
        }
        Ok(())
    }

    /// Register an app. Retrying with the same creator returns the existing row.
    pub async fn create(&self, req: CreateRequest) -> ManagerResult<AppRecord> {
        let key = AppKey::new(req.user.as_str(), req.app.as_str())?;
        let created_by = req
            .created_by
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| key.user.clone());
        let _lease = self.guards.try_acquire(&key)?;
        let ws = self.workspace.app(&key);

        if let Some(existing) = self.store.get_app(&key)? {
            if existing.created_by != created_by {
                return Err(ManagerError::AlreadyExists(key.to_string()));
            }
            ws.ensure_skeleton()
                .map_err(|e| ManagerError::from(e).context("create: workspace"))?;
            debug!(app = %key, "create retried by same creator");
            return Ok(existing);
        }

        let apps = self.store.list_apps()?;
        let users: HashSet<&str> = apps
            .iter()
            .map(|a| a.user.as_str())
            .chain([key.user.as_str()])
            .collect();
        self.license
            .check_quota(apps.len() as u64 + 1, users.len() as u64)?;

        ws.ensure_skeleton()
            .map_err(|e| ManagerError::from(e).context("create: workspace"))?;
        let mut record = AppRecord::new(&key, created_by, epoch_secs());
        record.env = req.env;
        record.volumes = req.volumes;
        self.store.put_app(&record)?;
        info!(
            app = %key,
            created_by = %record.created_by,
            external_source = req.source_provided_externally,
            "app created"
        );
        Ok(record)
    }

    /// Build, start, and promote a new version, then retire the old ones
    /// in the background.
    pub async fn update(self: &Arc<Self>, req: UpdateRequest) -> ManagerResult<UpdateHandle> {
        let key = AppKey::new(req.user.as_str(), req.app.as_str())?;
        let lease = self.guards.try_acquire(&key)?;
        let app = self
            .store
            .get_app(&key)?
            .ok_or_else(|| ManagerError::NotFound(key.to_string()))?;
        let ws = self.workspace.app(&key);

        let outcome = self
            .builder
            .build(&ws, &key, req.source_dir.as_deref(), &req.build_opts)
            .await
            .map_err(|e| ManagerError::from(e).context("update: build"))?;
        let new = key.with_version(outcome.version);

        let container_id = match self.bring_up(&app, &ws, &new, &outcome).await {
            Ok(id) => id,
            Err(e) => {
                self.roll_back(&ws, &key, &outcome);
                return Err(e.context("update"));
            }
        };

        self.promote(&key, &new, container_id)
            .await
            .map_err(|e| e.context("update: promote"))?;

        let retiring: Vec<Version> = self
            .discovery
            .running_versions(&key)
            .await
            .into_iter()
            .filter(|v| *v != new.version)
            .collect();
        let retirement = self.spawn_retirement(lease, key, retiring.clone(), req.context);
        Ok(UpdateHandle {
            version: new.version,
            previous: outcome.previous,
            retiring,
            retirement,
        })
    }

    /// Start or exec the new version and wait until discovery sees it.
    async fn bring_up(
        &self,
        app: &AppRecord,
        ws: &AppWorkspace,
        new: &VersionKey,
        outcome: &BuildOutcome,
    ) -> ManagerResult<String> {
        let pending = self.startups.register(new.clone()).map_err(|e| {
            ManagerError::InProgress(format!("startup of {new}: {e}")).context("await startup")
        })?;
        if self.discovery.is_running(new).await {
            debug!(version = %new, "already running");
            return Ok(new.app_key().container_name());
        }
        let container_id = self
            .launch(app, ws, &outcome.binary_name)
            .await
            .map_err(|e| e.context("start container"))?;

        let after = self.timeouts.app_startup;
        pending.wait(after).await.map_err(|_| {
            ManagerError::Timeout {
                what: format!("startup of {new}"),
                after,
            }
            .context("await startup")
        })?;
        info!(version = %new, "new version reported running");
        Ok(container_id)
    }

    async fn launch(&self, app: &AppRecord, ws: &AppWorkspace, binary_name: &str) -> ManagerResult<String> {
        let name = app.key().container_name();
        let after = self.timeouts.container_start;
        let op = async {
            if !self.actuator.exists(&name).await? {
                let spec = self.container_spec(app, ws, &name);
                let id = self.actuator.create_with_mount_and_command(&spec).await?;
                self.actuator.start(&name).await?;
                info!(container = %name, %id, image = %spec.image, "container created and started");
                Ok::<_, ContainerError>(id)
            } else if !self.actuator.is_running(&name).await? {
                self.actuator.start(&name).await?;
                info!(container = %name, "container restarted");
                Ok(name.clone())
            } else {
                let binary = format!(
                    "{}/workplace/bin/releases/{binary_name}",
                    self.container.mount_path.trim_end_matches('/')
                );
                self.actuator
                    .exec_detached(&name, std::slice::from_ref(&binary))
                    .await?;
                info!(container = %name, %binary, "new binary launched in running container");
                Ok(name.clone())
            }
        };
        match tokio::time::timeout(after, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ManagerError::Timeout {
                what: format!("container {name}"),
                after,
            }),
        }
    }

    fn container_spec(&self, app: &AppRecord, ws: &AppWorkspace, name: &str) -> ContainerSpec {
        let mut env = self.container.environment.clone();
        let mut app_env: Vec<_> = app.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        app_env.sort();
        env.extend(app_env);
        env.push(format!("APP_USER={}", app.user));
        env.push(format!("APP_NAME={}", app.app));
        ContainerSpec {
            image: self.container.image.clone(),
            name: name.to_string(),
            host_path: ws.root().to_path_buf(),
            container_path: self.container.mount_path.clone(),
            command: self.container.command.clone(),
            env,
        }
    }

    /// Point the workspace back at the version that was current before a
    /// failed update. The new binary stays in `releases/`.
    fn roll_back(&self, ws: &AppWorkspace, key: &AppKey, outcome: &BuildOutcome) {
        let Some(previous) = outcome.previous else {
            return;
        };
        if previous == outcome.version {
            return;
        }
        match self.builder.rollback(ws, &key.with_version(previous)) {
            Ok(()) => warn!(app = %key, failed = %outcome.version, current = %previous, "update rolled back"),
            Err(e) => warn!(app = %key, error = %e, "rollback failed"),
        }
    }

    async fn promote(&self, key: &AppKey, new: &VersionKey, container_id: String) -> ManagerResult<()> {
        let now = epoch_secs();
        let mut app = self
            .store
            .get_app(key)?
            .ok_or_else(|| ManagerError::NotFound(key.to_string()))?;
        app.current_version = Some(new.version);
        app.status = AppStatus::Active;
        app.last_seen = now;
        self.store.put_app(&app)?;

        match self.store.get_version(new)? {
            Some(mut row) if !row.is_stopped() => {
                row.last_seen = now;
                self.store.put_version(&row)?;
            }
            _ => self
                .store
                .put_version(&AppVersionRecord::started(new, container_id, now))?,
        }

        if let Err(e) = self.discovery.refresh_current_version(key).await {
            warn!(app = %key, error = %e, "metadata reread failed, using promoted version");
            self.discovery.set_current_version(key, Some(new.version)).await;
        }
        self.events.publish(RuntimeEvent::AppPromoted {
            key: key.clone(),
            version: new.version,
        });
        info!(app = %key, version = %new.version, "version promoted");
        Ok(())
    }

    fn spawn_retirement(
        self: &Arc<Self>,
        lease: AppLease,
        key: AppKey,
        retiring: Vec<Version>,
        context: RequestContext,
    ) -> JoinHandle<Vec<DrainReport>> {
        let manager = Arc::clone(self);
        let policy = DrainPolicy::from_timeouts(&self.timeouts);
        tokio::spawn(async move {
            let _lease = lease;
            let drains = retiring
                .iter()
                .map(|v| manager.retire(key.with_version(*v), policy, &context));
            join_all(drains).await
        })
    }

    /// Drain one version: notice, QPS gate, shutdown, close wait, record.
    pub async fn retire(&self, key: VersionKey, policy: DrainPolicy, context: &RequestContext) -> DrainReport {
        let mut drain = Drain::new(key.clone(), policy);

        let notice = json!({"type": "onAppUpdate"});
        if let Err(e) = self
            .bus
            .publish_json(&subjects::runtime_status(&key), context.headers(), &notice)
            .await
        {
            warn!(version = %key, error = %e, "drain notice failed");
        }
        drain.notified(Instant::now());

        let mut tick = interval_at(Instant::now() + policy.check_interval, policy.check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stopped_early = false;
        loop {
            tick.tick().await;
            if !self.discovery.is_running(&key).await {
                stopped_early = true;
                break;
            }
            let safe = self.qps.is_safe_to_shutdown(&key).await;
            if drain.observe(safe, Instant::now()) != DrainStep::Wait {
                break;
            }
        }

        if stopped_early {
            debug!(version = %key, "version stopped while draining");
            drain.closed();
        } else {
            self.shut_down(&mut drain, context).await;
        }
        if let Err(e) = self.record_stopped(&key) {
            warn!(version = %key, error = %e, "failed to record stop");
        }
        DrainReport {
            version: key.version,
            forced: drain.was_forced(),
            phase: drain.phase,
        }
    }

    async fn shut_down(&self, drain: &mut Drain, context: &RequestContext) {
        let key = drain.key.clone();
        let pending = match self.closes.register(key.clone()) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(version = %key, error = %e, "close waiter unavailable");
                None
            }
        };
        let command = json!({"type": "shutdown"});
        if let Err(e) = self
            .bus
            .publish_json(&subjects::app_status(&key), context.headers(), &command)
            .await
        {
            warn!(version = %key, error = %e, "shutdown command failed");
        }
        info!(version = %key, forced = drain.was_forced(), trace_id = %context.trace_id, "shutdown sent");

        let Some(pending) = pending else {
            drain.close_timed_out();
            return;
        };
        if !self.discovery.is_running(&key).await {
            drain.closed();
            return;
        }
        match pending.wait(drain.policy.shutdown_timeout).await {
            Ok(()) => drain.closed(),
            Err(_) => drain.close_timed_out(),
        }
    }

    /// Retire everything and remove all traces of an app. Deleting a
    /// missing app succeeds and returns `false`.
    pub async fn delete(&self, req: DeleteRequest) -> ManagerResult<bool> {
        let key = AppKey::new(req.user.as_str(), req.app.as_str())?;
        let _lease = self.guards.try_acquire(&key)?;

        let running = self.discovery.running_versions(&key).await;
        if !running.is_empty() {
            let policy = DrainPolicy::from_timeouts(&self.timeouts)
                .with_max_duration(self.timeouts.delete_drain_max_duration);
            let drains = running
                .iter()
                .map(|v| self.retire(key.with_version(*v), policy, &req.context));
            let reports = join_all(drains).await;
            debug!(app = %key, retired = reports.len(), "versions drained for delete");
        }

        let name = key.container_name();
        match self.actuator.stop(&name, DEFAULT_STOP_TIMEOUT).await {
            Ok(()) | Err(ContainerError::NotFound(_)) => {}
            Err(e) => return Err(ManagerError::from(e).context("delete: stop container")),
        }
        self.actuator
            .remove(&name, true)
            .await
            .map_err(|e| ManagerError::from(e).context("delete: remove container"))?;
        let removed_dir = self
            .workspace
            .app(&key)
            .remove()
            .map_err(|e| ManagerError::from(e).context("delete: remove workspace"))?;
        let (existed, versions) = self
            .store
            .delete_app(&key)
            .map_err(|e| ManagerError::from(e).context("delete: rows"))?;
        self.discovery.forget(&key).await;
        self.qps.forget_app(&key).await;

        info!(app = %key, existed, versions, removed_dir, "app deleted");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appgrid_bus::MemoryBus;
    use appgrid_container::MockActuator;
    use appgrid_workspace::StubToolchain;
    use std::time::Duration;

    fn manager(dir: &std::path::Path) -> (Arc<AppManager>, Arc<LicenseGate>) {
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let events = EventDispatcher::new();
        let workspace = Workspace::new(dir);
        let discovery = Arc::new(DiscoveryService::new(
            Arc::clone(&bus),
            events.clone(),
            workspace.clone(),
            "host-a",
        ));
        let builder = Builder::new(
            Arc::new(StubToolchain::new()),
            "linux/amd64".parse().unwrap(),
            "{user}_{app}_{version}",
        )
        .unwrap();
        let license = Arc::new(LicenseGate::new(Arc::clone(&bus), None));
        let deps = ManagerDeps {
            bus,
            actuator: Arc::new(MockActuator::new()),
            store: StateStore::open_in_memory().unwrap(),
            workspace,
            builder: Arc::new(builder),
            discovery,
            qps: Arc::new(QpsTracker::new(Duration::from_secs(60), 0.1, 1000)),
            license: Arc::clone(&license),
            events,
        };
        (
            Arc::new(AppManager::new(
                deps,
                ContainerConfig::default(),
                TimeoutsConfig::default(),
            )),
            license,
        )
    }

    fn create_req(user: &str, app: &str) -> CreateRequest {
        CreateRequest {
            user: user.to_string(),
            app: app.to_string(),
            ..CreateRequest::default()
        }
    }

    #[tokio::test]
    async fn create_writes_inactive_row_and_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(dir.path());
        let record = mgr.create(create_req("alice", "todo")).await.unwrap();
        assert_eq!(record.status, AppStatus::Inactive);
        assert_eq!(record.current_version, None);
        assert_eq!(record.created_by, "alice");
        assert!(dir.path().join("alice/todo/code").is_dir());
    }

    #[tokio::test]
    async fn create_retry_by_same_creator_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(dir.path());
        let first = mgr.create(create_req("alice", "todo")).await.unwrap();
        let again = mgr.create(create_req("alice", "todo")).await.unwrap();
        assert_eq!(first, again);

        let mut other = create_req("alice", "todo");
        other.created_by = Some("mallory".to_string());
        assert!(matches!(
            mgr.create(other).await,
            Err(ManagerError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_bad_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(dir.path());
        let err = mgr.create(create_req("../etc", "todo")).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn create_enforces_app_quota() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, license) = manager(dir.path());
        let mut capped = appgrid_license::License::community();
        capped.edition = "team".to_string();
        capped.max_apps = Some(1);
        license.install(capped);

        mgr.create(create_req("alice", "todo")).await.unwrap();
        let err = mgr.create(create_req("alice", "blog")).await.unwrap_err();
        assert!(matches!(err, ManagerError::Quota(_)));
        assert!(mgr.store().get_app(&AppKey::new("alice", "blog").unwrap()).unwrap().is_none());
    }

    #[tokio::test]
    async fn update_of_unknown_app_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(dir.path());
        let req = UpdateRequest {
            user: "alice".to_string(),
            app: "ghost".to_string(),
            ..UpdateRequest::default()
        };
        let err = mgr.update(req).await.err().unwrap();
        assert!(matches!(err, ManagerError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_of_missing_app_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(dir.path());
        let req = DeleteRequest {
            user: "alice".to_string(),
            app: "ghost".to_string(),
            context: RequestContext::new(),
        };
        assert!(!mgr.delete(req.clone()).await.unwrap());
        assert!(!mgr.delete(req).await.unwrap());
    }

    #[tokio::test]
    async fn close_of_last_version_marks_app_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(dir.path());
        mgr.create(create_req("alice", "todo")).await.unwrap();
        let key = AppKey::new("alice", "todo").unwrap();
        let mut app = mgr.store().get_app(&key).unwrap().unwrap();
        app.current_version = Some(Version::FIRST);
        app.status = AppStatus::Active;
        mgr.store().put_app(&app).unwrap();
        let vkey = key.with_version(Version::FIRST);
        mgr.store()
            .put_version(&AppVersionRecord::started(&vkey, "alice-todo", 10))
            .unwrap();

        mgr.on_event(RuntimeEvent::AppClose { key: vkey.clone() }).await;

        let app = mgr.store().get_app(&key).unwrap().unwrap();
        assert_eq!(app.status, AppStatus::Inactive);
        assert!(mgr.store().get_version(&vkey).unwrap().unwrap().is_stopped());

        mgr.on_event(RuntimeEvent::AppStartup {
            key: vkey.clone(),
            start_time: 20,
        })
        .await;
        let app = mgr.store().get_app(&key).unwrap().unwrap();
        assert_eq!(app.status, AppStatus::Active);
        assert!(!mgr.store().get_version(&vkey).unwrap().unwrap().is_stopped());
    }
}
