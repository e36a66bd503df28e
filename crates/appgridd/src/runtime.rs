//! Runtime assembly.
//!
//! Every subsystem is constructed here, in dependency order, and handed
//! its collaborators explicitly. [`Runtime::start`] wires the bus
//! subscription table and spawns the background loops; all of them stop
//! when the shared shutdown channel flips.

use std::sync::Arc;

use anyhow::Context;
use appgrid_bus::{MemoryBus, MessageBus, NatsBus};
use appgrid_container::{ContainerActuator, DockerCli, MockActuator};
use appgrid_core::{EventDispatcher, RuntimeConfig};
use appgrid_discovery::DiscoveryService;
use appgrid_gateway::{AppDispatcher, BlacklistListener, GatewayState, TokenBlacklist};
use appgrid_license::LicenseGate;
use appgrid_manager::{AppManager, BusHandlers, ManagerDeps};
use appgrid_qps::QpsTracker;
use appgrid_state::StateStore;
use appgrid_workspace::{Builder, GoToolchain, StubToolchain, Toolchain, Workspace};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How the daemon reaches its external collaborators.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Use the in-process broker instead of NATS.
    pub memory_bus: bool,
    /// Use the in-memory actuator instead of the docker CLI.
    pub mock_containers: bool,
}

/// The external parts a runtime is assembled from.
pub struct RuntimeParts {
    pub bus: Arc<dyn MessageBus>,
    pub actuator: Arc<dyn ContainerActuator>,
    pub store: StateStore,
    pub toolchain: Arc<dyn Toolchain>,
}

impl RuntimeParts {
    /// Connect to the collaborators named by `config`.
    pub async fn connect(config: &RuntimeConfig, options: RuntimeOptions) -> anyhow::Result<Self> {
        let bus: Arc<dyn MessageBus> = if options.memory_bus {
            info!("using in-process message bus");
            Arc::new(MemoryBus::new())
        } else {
            let bus = NatsBus::connect(&config.nats.url)
                .await
                .with_context(|| format!("connect to NATS at {}", config.nats.url))?;
            Arc::new(bus)
        };
        let actuator: Arc<dyn ContainerActuator> = if options.mock_containers {
            info!("using mock container actuator");
            Arc::new(MockActuator::new())
        } else {
            Arc::new(DockerCli::default().with_command_timeout(config.timeouts.container_start))
        };
        let store = StateStore::open(&config.state.path)
            .with_context(|| format!("open state store {}", config.state.path.display()))?;
        Ok(Self {
            bus,
            actuator,
            store,
            toolchain: toolchain(&config.build.toolchain)?,
        })
    }
}

fn toolchain(name: &str) -> anyhow::Result<Arc<dyn Toolchain>> {
    match name {
        "go" => Ok(Arc::new(GoToolchain::default())),
        "stub" => Ok(Arc::new(StubToolchain::new())),
        other => anyhow::bail!("unknown build.toolchain {other:?}, expected \"go\" or \"stub\""),
    }
}

pub struct Runtime {
    pub config: RuntimeConfig,
    pub bus: Arc<dyn MessageBus>,
    pub events: EventDispatcher,
    pub store: StateStore,
    pub workspace: Workspace,
    pub discovery: Arc<DiscoveryService>,
    pub qps: Arc<QpsTracker>,
    pub blacklist: Arc<TokenBlacklist>,
    pub license: Arc<LicenseGate>,
    pub manager: Arc<AppManager>,
    pub dispatcher: Arc<AppDispatcher>,
    pub gateway: GatewayState,
}

impl Runtime {
    pub fn assemble(config: RuntimeConfig, parts: RuntimeParts) -> anyhow::Result<Self> {
        let events = EventDispatcher::new();
        let workspace = Workspace::new(&config.base_path);

        let discovery = Arc::new(
            DiscoveryService::new(
                Arc::clone(&parts.bus),
                events.clone(),
                workspace.clone(),
                config.runtime_id.clone(),
            )
            .with_timeouts(&config.timeouts),
        );
        let qps = Arc::new(QpsTracker::from_config(&config.qps, config.timeouts.qps_sweep));
        let blacklist = Arc::new(TokenBlacklist::new());
        let license = Arc::new(
            LicenseGate::from_config(Arc::clone(&parts.bus), config.license.encryption_key.as_deref())
                .context("license.encryption_key")?,
        );
        let builder = Builder::from_config(&config.build, parts.toolchain).context("build config")?;

        let manager = Arc::new(AppManager::new(
            ManagerDeps {
                bus: Arc::clone(&parts.bus),
                actuator: parts.actuator,
                store: parts.store.clone(),
                workspace: workspace.clone(),
                builder: Arc::new(builder),
                discovery: Arc::clone(&discovery),
                qps: Arc::clone(&qps),
                license: Arc::clone(&license),
                events: events.clone(),
            },
            config.container.clone(),
            config.timeouts.clone(),
        ));

        let dispatcher = Arc::new(AppDispatcher::new(
            Arc::clone(&parts.bus),
            Arc::clone(&discovery),
            workspace.clone(),
            Arc::clone(&qps),
            config.timeouts.app_invoke,
        ));
        let gateway = GatewayState::from_config(&config, Arc::clone(&blacklist), Arc::clone(&dispatcher))
            .context("gateway config")?;

        info!(
            runtime_id = %config.runtime_id,
            base_path = %config.base_path.display(),
            edition = %license.edition(),
            "runtime assembled"
        );
        Ok(Self {
            config,
            bus: parts.bus,
            events,
            store: parts.store,
            workspace,
            discovery,
            qps,
            blacklist,
            license,
            manager,
            dispatcher,
            gateway,
        })
    }

    /// Subscribe every handler and spawn the background loops.
    ///
    /// Returns once all subscriptions are live.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let mut tasks = Vec::new();

        // Waiters listen before anything can publish into them.
        tasks.push(self.manager.start_event_listener(shutdown.clone()));
        tasks.push(
            Arc::clone(&self.dispatcher)
                .start_reply_listener(shutdown.clone())
                .await
                .context("subscribe app replies")?,
        );
        tasks.push(
            Arc::clone(&self.discovery)
                .start(shutdown.clone())
                .await
                .context("start discovery")?,
        );
        tasks.push(
            BlacklistListener::new(
                Arc::clone(&self.bus),
                Arc::clone(&self.blacklist),
                self.config.jwt.token_ttl,
            )
            .start(shutdown.clone())
            .await
            .context("subscribe token events")?,
        );
        tasks.push(
            Arc::clone(&self.license)
                .listen(shutdown.clone())
                .await
                .context("subscribe license pushes")?,
        );
        let handlers = Arc::new(BusHandlers::new(Arc::clone(&self.bus), Arc::clone(&self.manager)));
        tasks.extend(
            handlers
                .start(shutdown.clone())
                .await
                .context("subscribe manager subjects")?,
        );

        let seeded = self.manager.restore().await.context("restore app state")?;

        let blacklist = Arc::clone(&self.blacklist);
        let period = self.config.timeouts.blacklist_sweep;
        let rx = shutdown.clone();
        tasks.push(tokio::spawn(async move { blacklist.run_sweeper(period, rx).await }));

        let qps = Arc::clone(&self.qps);
        let rx = shutdown.clone();
        tasks.push(tokio::spawn(async move { qps.run(rx).await }));

        if self.config.license.encryption_key.is_some() {
            let license = Arc::clone(&self.license);
            let timeout = self.config.timeouts.bus_request;
            tasks.push(tokio::spawn(async move {
                if let Err(e) = license.refresh(timeout).await {
                    warn!(error = %e, "license refresh failed, running as {}", license.edition());
                }
            }));
        }

        info!(tasks = tasks.len(), seeded, "runtime started");
        Ok(tasks)
    }
}
