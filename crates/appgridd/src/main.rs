//! appgridd — the AppGrid runtime daemon.
//!
//! # Usage
//!
//! ```text
//! appgridd run --config /etc/appgrid/runtime.toml
//! appgridd config > runtime.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use appgrid_core::RuntimeConfig;
use appgridd::{HealthState, Runtime, RuntimeOptions, RuntimeParts, health_router};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "appgridd", about = "AppGrid runtime daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the runtime until interrupted.
    Run {
        /// Runtime configuration file (TOML).
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Use an in-process message bus instead of NATS.
        #[arg(long)]
        memory_bus: bool,

        /// Use an in-memory container actuator instead of docker.
        #[arg(long)]
        mock_containers: bool,
    },
    /// Print the default configuration.
    Config,
    /// Parse and validate a configuration file.
    Check {
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            memory_bus,
            mock_containers,
        } => {
            let config = load_config(config)?;
            run(
                config,
                RuntimeOptions {
                    memory_bus,
                    mock_containers,
                },
            )
            .await
        }
        Command::Config => {
            print!("{}", RuntimeConfig::default().to_toml_string()?);
            Ok(())
        }
        Command::Check { config } => {
            let config = load_config(Some(config))?;
            info!(runtime_id = %config.runtime_id, routes = config.routes.len(), "configuration ok");
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,appgridd=debug,appgrid_manager=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::from_file(&path).with_context(|| format!("load {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(config: RuntimeConfig, options: RuntimeOptions) -> anyhow::Result<()> {
    info!(runtime_id = %config.runtime_id, "AppGrid runtime starting");

    std::fs::create_dir_all(&config.base_path)
        .with_context(|| format!("create base path {}", config.base_path.display()))?;
    if let Some(parent) = config.state.path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // ── Assemble subsystems ────────────────────────────────────

    let parts = RuntimeParts::connect(&config, options).await?;
    let runtime = Runtime::assemble(config, parts)?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let tasks = runtime.start(shutdown_rx.clone()).await?;

    // ── Start HTTP servers ─────────────────────────────────────

    let config = &runtime.config;
    let gateway_addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .with_context(|| format!("gateway address {}:{}", config.gateway.host, config.gateway.port))?;
    let health_addr = SocketAddr::new(gateway_addr.ip(), config.health.port);

    let mut gateway = tokio::spawn(appgrid_gateway::serve(
        appgrid_gateway::build_router(runtime.gateway.clone()),
        gateway_addr,
        shutdown_rx.clone(),
    ));

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("bind health port {health_addr}"))?;
    info!(addr = %health_addr, "health server listening");
    let health_state = HealthState::from_runtime(&runtime);
    let mut health_shutdown = shutdown_rx.clone();
    let health = tokio::spawn(async move {
        axum::serve(health_listener, health_router(health_state))
            .with_graceful_shutdown(async move {
                let _ = health_shutdown.changed().await;
            })
            .await
    });

    // Graceful shutdown on Ctrl-C, or when the gateway exits on its own.
    let gateway_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
            }
            let _ = shutdown_tx.send(true);
            (&mut gateway).await
        }
        result = &mut gateway => {
            let _ = shutdown_tx.send(true);
            result
        }
    };
    let failed = match gateway_result {
        Ok(Err(e)) => Some(anyhow::Error::new(e).context("gateway server failed")),
        Err(e) => Some(anyhow::Error::new(e).context("gateway task panicked")),
        Ok(Ok(())) => None,
    };

    if let Ok(Err(e)) = health.await {
        error!(error = %e, "health server failed");
    }
    for task in tasks {
        let _ = task.await;
    }

    info!("AppGrid runtime stopped");
    match failed {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
