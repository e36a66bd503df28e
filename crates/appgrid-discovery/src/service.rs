//! The discovery service.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use appgrid_bus::{BusHeaders, BusMessage, MessageBus, headers};
use appgrid_core::config::TimeoutsConfig;
use appgrid_core::{AppKey, EventDispatcher, RuntimeEvent, Version, VersionKey, epoch_secs, subjects};
use appgrid_workspace::{VersionMetadata, Workspace};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DiscoveryResult;
use crate::protocol::{
    DiscoveryProbe, DiscoveryResponse, STATUS_RUNNING, STATUS_STOPPED, StatusNotice, StatusNoticeKind,
};

/// Stale, non-running versions are forgotten after this many windows.
const PRUNE_WINDOWS: u64 = 10;

#[derive(Debug, Clone)]
struct VersionEntry {
    status: String,
    start_time: u64,
    last_seen: u64,
    runtime_id: String,
    /// Whether the last transition reported was into `running`.
    running: bool,
}

impl VersionEntry {
    fn is_live(&self, now: u64, window: Duration) -> bool {
        self.status == STATUS_RUNNING && now.saturating_sub(self.last_seen) < window.as_secs()
    }

    /// Live and not yet expired by a sweep.
    fn counts_as_running(&self, now: u64, window: Duration) -> bool {
        self.running && self.is_live(now, window)
    }
}

#[derive(Debug, Default)]
struct AppEntry {
    current_version: Option<Version>,
    versions: BTreeMap<Version, VersionEntry>,
}

/// Copy of one version's discovery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionView {
    pub version: Version,
    pub status: String,
    pub running: bool,
    pub start_time: u64,
    pub last_seen: u64,
    pub runtime_id: String,
}

/// Copy of one app's discovery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSnapshot {
    pub user: String,
    pub app: String,
    pub current_version: Option<Version>,
    pub versions: Vec<VersionView>,
}

pub struct DiscoveryService {
    bus: Arc<dyn MessageBus>,
    events: EventDispatcher,
    workspace: Workspace,
    runtime_id: String,
    probe_timeout: Duration,
    interval: Duration,
    liveness_window: Duration,
    apps: RwLock<HashMap<AppKey, AppEntry>>,
}

impl DiscoveryService {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        events: EventDispatcher,
        workspace: Workspace,
        runtime_id: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            events,
            workspace,
            runtime_id: runtime_id.into(),
            probe_timeout: Duration::from_secs(5),
            interval: Duration::from_secs(60),
            liveness_window: Duration::from_secs(150),
            apps: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: &TimeoutsConfig) -> Self {
        self.probe_timeout = timeouts.discovery_probe;
        self.interval = timeouts.discovery_interval;
        self.liveness_window = timeouts.liveness_window;
        self
    }

    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    /// Subscribe, send the first probe, and spawn the probe/sweep loop.
    pub async fn start(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> DiscoveryResult<JoinHandle<()>> {
        let mut responses = self.bus.subscribe(subjects::DISCOVERY_RESPONSE_WILDCARD).await?;
        let mut statuses = self.bus.subscribe(subjects::RUNTIME_STATUS_WILDCARD).await?;
        if let Err(e) = self.probe().await {
            warn!(error = %e, "initial discovery probe failed");
        }
        info!(
            runtime_id = %self.runtime_id,
            interval = ?self.interval,
            window = ?self.liveness_window,
            "discovery started"
        );

        let svc = self;
        Ok(tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut probe_tick = tokio::time::interval_at(start + svc.interval, svc.interval);
            let sweep_period = (svc.liveness_window / 5).max(Duration::from_secs(1));
            let mut sweep_tick = tokio::time::interval_at(start + sweep_period, sweep_period);
            loop {
                tokio::select! {
                    Some(msg) = responses.next() => svc.handle_response(&msg).await,
                    Some(msg) = statuses.next() => svc.handle_status(&msg).await,
                    _ = probe_tick.tick() => {
                        if let Err(e) = svc.probe().await {
                            warn!(error = %e, "discovery probe failed, retrying next tick");
                        }
                    }
                    _ = sweep_tick.tick() => svc.sweep().await,
                    _ = shutdown.changed() => {
                        debug!("discovery loop shutting down");
                        break;
                    }
                }
            }
        }))
    }

    /// Broadcast one probe. Instances answer on this runtime's response subject.
    pub async fn probe(&self) -> DiscoveryResult<()> {
        let probe = DiscoveryProbe {
            runtime_id: self.runtime_id.clone(),
            timestamp: epoch_secs(),
            timeout_seconds: self.probe_timeout.as_secs(),
        };
        let mut h = BusHeaders::new();
        h.insert(headers::TRACE_ID, format!("discovery-{}", probe.timestamp));
        let msg = BusMessage::json(subjects::DISCOVERY_PROBE, &probe)?
            .with_reply(subjects::discovery_response(&self.runtime_id))
            .with_headers(h);
        self.bus.publish(msg).await?;
        debug!(runtime_id = %self.runtime_id, "discovery probe sent");
        Ok(())
    }

    pub async fn handle_response(&self, msg: &BusMessage) {
        let response: DiscoveryResponse = match msg.decode() {
            Ok(r) => r,
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "undecodable discovery response");
                return;
            }
        };
        let key = match response
            .version
            .parse::<Version>()
            .map_err(|e| e.to_string())
            .and_then(|v| {
                VersionKey::new(response.user.as_str(), response.app.as_str(), v)
                    .map_err(|e| e.to_string())
            }) {
            Ok(k) => k,
            Err(reason) => {
                warn!(subject = %msg.subject, %reason, "invalid discovery response");
                return;
            }
        };
        self.observe_at(
            &key,
            &response.status,
            response.start_time,
            &response.runtime_id,
            epoch_secs(),
        )
        .await;
    }

    pub async fn handle_status(&self, msg: &BusMessage) {
        let Some((user, app, version)) = subjects::parse_version_suffix(&msg.subject, "runtime.status")
        else {
            warn!(subject = %msg.subject, "malformed status subject");
            return;
        };
        let key = match version
            .parse::<Version>()
            .and_then(|v| VersionKey::new(user, app, v))
        {
            Ok(k) => k,
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "invalid status subject");
                return;
            }
        };
        let notice: StatusNotice = match msg.decode() {
            Ok(n) => n,
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "undecodable status notice");
                return;
            }
        };
        let now = epoch_secs();
        let runtime_id = notice.runtime_id.unwrap_or_default();
        match notice.kind {
            StatusNoticeKind::Startup => {
                let start = notice.start_time.unwrap_or(now);
                self.observe_at(&key, STATUS_RUNNING, start, &runtime_id, now).await;
            }
            StatusNoticeKind::Close => {
                self.observe_at(&key, STATUS_STOPPED, 0, &runtime_id, now).await;
            }
            StatusNoticeKind::OnAppUpdate => {
                debug!(%key, "drain notice observed");
            }
        }
    }

    /// Record a report about `key` made at `now`.
    pub async fn observe_at(
        &self,
        key: &VersionKey,
        status: &str,
        start_time: u64,
        runtime_id: &str,
        now: u64,
    ) {
        let window = self.liveness_window;
        let event = {
            let mut apps = self.apps.write().await;
            let app = apps.entry(key.app_key()).or_default();
            let entry = app.versions.entry(key.version).or_insert_with(|| VersionEntry {
                status: String::new(),
                start_time,
                last_seen: now,
                runtime_id: String::new(),
                running: false,
            });
            entry.status = status.to_string();
            entry.last_seen = now;
            if start_time > 0 {
                entry.start_time = start_time;
            }
            if !runtime_id.is_empty() {
                entry.runtime_id = runtime_id.to_string();
            }
            let live = entry.is_live(now, window);
            transition(key, entry, live)
        };
        if let Some(event) = event {
            self.events.publish(event);
        }
    }

    pub async fn sweep(&self) {
        self.sweep_at(epoch_secs()).await;
    }

    /// Expire versions whose last report is older than the liveness window.
    pub async fn sweep_at(&self, now: u64) {
        let window = self.liveness_window;
        let prune_after = window.as_secs().saturating_mul(PRUNE_WINDOWS);
        let mut events = Vec::new();
        {
            let mut apps = self.apps.write().await;
            for (app_key, app) in apps.iter_mut() {
                for (version, entry) in app.versions.iter_mut() {
                    let live = entry.is_live(now, window);
                    if let Some(e) = transition(&app_key.with_version(*version), entry, live) {
                        events.push(e);
                    }
                }
                app.versions
                    .retain(|_, e| e.running || now.saturating_sub(e.last_seen) < prune_after);
            }
            apps.retain(|_, app| !app.versions.is_empty() || app.current_version.is_some());
        }
        for event in events {
            if let RuntimeEvent::AppClose { key } = &event {
                info!(%key, "version no longer reporting, marked not running");
            }
            self.events.publish(event);
        }
    }

    pub async fn is_running(&self, key: &VersionKey) -> bool {
        let now = epoch_secs();
        let apps = self.apps.read().await;
        apps.get(&key.app_key())
            .and_then(|a| a.versions.get(&key.version))
            .is_some_and(|e| e.counts_as_running(now, self.liveness_window))
    }

    /// Versions of the app currently considered running, oldest first.
    pub async fn running_versions(&self, key: &AppKey) -> Vec<Version> {
        let now = epoch_secs();
        let apps = self.apps.read().await;
        apps.get(key)
            .map(|a| {
                a.versions
                    .iter()
                    .filter(|(_, e)| e.counts_as_running(now, self.liveness_window))
                    .map(|(v, _)| *v)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The version the router should address, as last refreshed.
    pub async fn current_version(&self, key: &AppKey) -> Option<Version> {
        self.apps.read().await.get(key).and_then(|a| a.current_version)
    }

    pub async fn set_current_version(&self, key: &AppKey, version: Option<Version>) {
        let mut apps = self.apps.write().await;
        apps.entry(key.clone()).or_default().current_version = version;
    }

    /// Re-read `version.json` and adopt its `current_version`.
    pub async fn refresh_current_version(&self, key: &AppKey) -> DiscoveryResult<Option<Version>> {
        let meta = VersionMetadata::read(&self.workspace.app(key))?;
        let current = meta.map(|m| m.current_version);
        self.set_current_version(key, current).await;
        debug!(app = %key, version = ?current, "current version refreshed");
        Ok(current)
    }

    /// Drop everything known about an app.
    pub async fn forget(&self, key: &AppKey) {
        self.apps.write().await.remove(key);
    }

    pub async fn app_snapshot(&self, key: &AppKey) -> Option<AppSnapshot> {
        let now = epoch_secs();
        let apps = self.apps.read().await;
        apps.get(key).map(|a| snapshot_of(key, a, now, self.liveness_window))
    }

    pub async fn snapshot(&self) -> Vec<AppSnapshot> {
        let now = epoch_secs();
        let apps = self.apps.read().await;
        let mut out: Vec<AppSnapshot> = apps
            .iter()
            .map(|(k, a)| snapshot_of(k, a, now, self.liveness_window))
            .collect();
        out.sort_by(|a, b| (&a.user, &a.app).cmp(&(&b.user, &b.app)));
        out
    }
}

fn transition(key: &VersionKey, entry: &mut VersionEntry, live: bool) -> Option<RuntimeEvent> {
    if live == entry.running {
        return None;
    }
    entry.running = live;
    if live {
        info!(%key, start_time = entry.start_time, "version running");
        Some(RuntimeEvent::AppStartup {
            key: key.clone(),
            start_time: entry.start_time,
        })
    } else {
        info!(%key, status = %entry.status, "version stopped");
        Some(RuntimeEvent::AppClose { key: key.clone() })
    }
}

fn snapshot_of(key: &AppKey, app: &AppEntry, now: u64, window: Duration) -> AppSnapshot {
    AppSnapshot {
        user: key.user.clone(),
        app: key.app.clone(),
        current_version: app.current_version,
        versions: app
            .versions
            .iter()
            .map(|(v, e)| VersionView {
                version: *v,
                status: e.status.clone(),
                running: e.counts_as_running(now, window),
                start_time: e.start_time,
                last_seen: e.last_seen,
                runtime_id: e.runtime_id.clone(),
            })
            .collect(),
    }
}
