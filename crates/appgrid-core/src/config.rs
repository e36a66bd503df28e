//! Runtime configuration tree.
//!
//! Loaded from a TOML file. Every section has defaults so a minimal
//! file only needs the values that differ (usually `jwt.secret`,
//! `nats.url`, and `routes`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{parse_duration, serde_str};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root of all per-app workspaces (`<base>/<user>/<app>/`).
    pub base_path: PathBuf,
    /// Identifier of this runtime host in discovery probes.
    pub runtime_id: String,
    pub state: StateConfig,
    pub container: ContainerConfig,
    pub build: BuildConfig,
    pub timeouts: TimeoutsConfig,
    pub qps: QpsConfig,
    pub routes: Vec<RouteConfig>,
    pub gateway: GatewayConfig,
    pub nats: NatsConfig,
    pub jwt: JwtConfig,
    pub license: LicenseConfig,
    pub health: HealthConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/var/lib/appgrid/apps"),
            runtime_id: "local".to_string(),
            state: StateConfig::default(),
            container: ContainerConfig::default(),
            build: BuildConfig::default(),
            timeouts: TimeoutsConfig::default(),
            qps: QpsConfig::default(),
            routes: Vec::new(),
            gateway: GatewayConfig::default(),
            nats: NatsConfig::default(),
            jwt: JwtConfig::default(),
            license: LicenseConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/appgrid/appgrid.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: String,
    /// Entry command; runs the binary behind the `bin/app` symlink.
    pub command: Vec<String>,
    /// Extra `KEY=VALUE` entries added to every container.
    pub environment: Vec<String>,
    /// Where the app workspace root is mounted inside the container.
    pub mount_path: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "appgrid/runtime:latest".to_string(),
            command: vec!["/workspace/workplace/bin/app".to_string()],
            environment: Vec::new(),
            mount_path: "/workspace".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Cross-compile target as `<os>/<arch>`.
    pub platform: String,
    /// Binary name with `{user}`, `{app}`, `{version}` placeholders.
    pub binary_name_format: String,
    /// Toolchain executable.
    pub toolchain: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            platform: "linux/amd64".to_string(),
            binary_name_format: "{user}_{app}_{version}".to_string(),
            toolchain: "go".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    #[serde(with = "serde_str")]
    pub bus_request: Duration,
    #[serde(with = "serde_str")]
    pub app_invoke: Duration,
    #[serde(with = "serde_str")]
    pub container_start: Duration,
    #[serde(with = "serde_str")]
    pub app_startup: Duration,
    #[serde(with = "serde_str")]
    pub app_shutdown: Duration,
    #[serde(with = "serde_str")]
    pub discovery_probe: Duration,
    #[serde(with = "serde_str")]
    pub discovery_interval: Duration,
    #[serde(with = "serde_str")]
    pub liveness_window: Duration,
    #[serde(with = "serde_str")]
    pub blacklist_sweep: Duration,
    #[serde(with = "serde_str")]
    pub qps_sweep: Duration,
    #[serde(with = "serde_str")]
    pub drain_check_interval: Duration,
    pub drain_confirm_samples: u32,
    #[serde(with = "serde_str")]
    pub drain_max_duration: Duration,
    #[serde(with = "serde_str")]
    pub delete_drain_max_duration: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            bus_request: Duration::from_secs(30),
            app_invoke: Duration::from_secs(300),
            container_start: Duration::from_secs(60),
            app_startup: Duration::from_secs(60),
            app_shutdown: Duration::from_secs(30),
            discovery_probe: Duration::from_secs(5),
            discovery_interval: Duration::from_secs(60),
            liveness_window: Duration::from_secs(150),
            blacklist_sweep: Duration::from_secs(3600),
            qps_sweep: Duration::from_secs(60),
            drain_check_interval: Duration::from_secs(5),
            drain_confirm_samples: 3,
            drain_max_duration: Duration::from_secs(300),
            delete_drain_max_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QpsConfig {
    #[serde(with = "serde_str")]
    pub window: Duration,
    /// Requests per second below which a version may be shut down.
    pub threshold: f64,
    /// Upper bound on timestamps kept per version.
    pub max_samples: usize,
}

impl Default for QpsConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            threshold: 0.1,
            max_samples: 100_000,
        }
    }
}

/// Load-balancing strategy for multi-target routes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    Weighted,
    LeastConnections,
    IpHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// URL path prefix, e.g. `/api/v1/hr`.
    pub path: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,
    /// Replacement for the matched prefix on the outbound request.
    #[serde(default)]
    pub rewrite_path: Option<String>,
    /// Per-route timeout override, e.g. `"10s"`.
    #[serde(default)]
    pub timeout: Option<String>,
    /// Skip authentication for this route.
    #[serde(default)]
    pub public: bool,
}

impl RouteConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.as_deref().and_then(parse_duration)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// CIDRs whose callers may authenticate with `X-Request-User` alone.
    pub trusted_networks: Vec<String>,
    /// Origins allowed by CORS; `*` allows any.
    pub allowed_origins: Vec<String>,
    #[serde(with = "serde_str")]
    pub default_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            trusted_networks: Vec::new(),
            allowed_origins: vec!["*".to_string()],
            default_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    /// Blacklist expiry applied when a revocation event carries none.
    #[serde(with = "serde_str")]
    pub token_ttl: Duration,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Hex-encoded 32-byte AES-256-GCM key.
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { port: 8081 }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> CoreResult<()> {
        for (i, route) in self.routes.iter().enumerate() {
            if !route.path.starts_with('/') {
                return Err(CoreError::ConfigValue {
                    key: format!("routes[{i}].path"),
                    reason: format!("{:?} must start with '/'", route.path),
                });
            }
            if route.timeout.is_some() && route.timeout().is_none() {
                return Err(CoreError::ConfigValue {
                    key: format!("routes[{i}].timeout"),
                    reason: format!("unparseable duration {:?}", route.timeout),
                });
            }
            if route.strategy == LoadBalanceStrategy::Weighted
                && route.targets.iter().all(|t| t.weight == 0)
            {
                return Err(CoreError::ConfigValue {
                    key: format!("routes[{i}].targets"),
                    reason: "weighted route needs at least one non-zero weight".to_string(),
                });
            }
        }
        if self.timeouts.drain_confirm_samples == 0 {
            return Err(CoreError::ConfigValue {
                key: "timeouts.drain_confirm_samples".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.qps.window.is_zero() {
            return Err(CoreError::ConfigValue {
                key: "qps.window".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
