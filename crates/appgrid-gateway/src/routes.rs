//! Route table and per-route load balancing.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use appgrid_core::config::{LoadBalanceStrategy, RouteConfig};
use axum::http::Uri;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

/// A backend a route may forward to.
#[derive(Debug)]
pub struct Target {
    pub url: String,
    scheme: String,
    authority: String,
    base_path: String,
    weight: u32,
    active: Arc<AtomicUsize>,
}

impl Target {
    fn parse(url: &str, weight: u32) -> GatewayResult<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| GatewayError::Config(format!("target {url:?}: {e}")))?;
        let scheme = uri.scheme_str().unwrap_or_default().to_string();
        if scheme != "http" {
            return Err(GatewayError::Config(format!(
                "target {url:?}: only http targets are supported"
            )));
        }
        let authority = uri
            .authority()
            .map(|a| a.to_string())
            .ok_or_else(|| GatewayError::Config(format!("target {url:?}: missing host")))?;
        Ok(Self {
            url: url.to_string(),
            scheme,
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
            weight,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Requests currently in flight to this target.
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// A chosen target. Counts as in flight until dropped.
#[derive(Debug)]
pub struct Selected {
    pub index: usize,
    pub scheme: String,
    pub authority: String,
    pub base_path: String,
    lease: Arc<AtomicUsize>,
}

impl Selected {
    /// Absolute outbound URI for an already-rewritten path and query.
    pub fn uri(&self, path_and_query: &str) -> GatewayResult<Uri> {
        format!("{}://{}{}{}", self.scheme, self.authority, self.base_path, path_and_query)
            .parse()
            .map_err(|e| GatewayError::BadRequest(format!("outbound uri: {e}")))
    }
}

impl Drop for Selected {
    fn drop(&mut self) {
        self.lease.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct Route {
    pub path: String,
    pub service_name: Option<String>,
    pub strategy: LoadBalanceStrategy,
    pub rewrite_path: Option<String>,
    pub timeout: Option<Duration>,
    pub public: bool,
    targets: Vec<Target>,
    cursor: AtomicUsize,
}

impl Route {
    fn from_config(cfg: &RouteConfig) -> GatewayResult<Self> {
        if cfg.targets.is_empty() {
            return Err(GatewayError::Config(format!("route {} has no targets", cfg.path)));
        }
        let targets = cfg
            .targets
            .iter()
            .map(|t| Target::parse(&t.url, t.weight))
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(Self {
            path: normalize(&cfg.path),
            service_name: cfg.service_name.clone(),
            strategy: cfg.strategy,
            rewrite_path: cfg.rewrite_path.clone(),
            timeout: cfg.timeout(),
            public: cfg.public,
            targets,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn matches(&self, path: &str) -> bool {
        prefix_matches(&self.path, path)
    }

    /// Pick a target according to the route's strategy.
    pub fn select(&self, client: Option<IpAddr>) -> Selected {
        let index = match self.strategy {
            LoadBalanceStrategy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % self.targets.len(),
            LoadBalanceStrategy::Weighted => self.pick_weighted(),
            LoadBalanceStrategy::LeastConnections => self
                .targets
                .iter()
                .enumerate()
                .min_by_key(|(_, t)| t.in_flight())
                .map(|(i, _)| i)
                .unwrap_or(0),
            LoadBalanceStrategy::IpHash => match client {
                Some(ip) => {
                    let digest = Sha256::digest(ip.to_canonical().to_string().as_bytes());
                    let mut head = [0u8; 8];
                    head.copy_from_slice(&digest[..8]);
                    (u64::from_be_bytes(head) % self.targets.len() as u64) as usize
                }
                None => 0,
            },
        };
        let target = &self.targets[index];
        target.active.fetch_add(1, Ordering::Relaxed);
        Selected {
            index,
            scheme: target.scheme.clone(),
            authority: target.authority.clone(),
            base_path: target.base_path.clone(),
            lease: target.active.clone(),
        }
    }

    fn pick_weighted(&self) -> usize {
        let total: u64 = self.targets.iter().map(|t| u64::from(t.weight)).sum();
        if total == 0 {
            return 0;
        }
        let mut slot = self.cursor.fetch_add(1, Ordering::Relaxed) as u64 % total;
        for (i, t) in self.targets.iter().enumerate() {
            let w = u64::from(t.weight);
            if slot < w {
                return i;
            }
            slot -= w;
        }
        0
    }

    /// Outbound path for an inbound one, applying `rewrite_path`.
    pub fn outbound_path(&self, path: &str) -> String {
        let Some(rewrite) = &self.rewrite_path else {
            return path.to_string();
        };
        let rest = if self.path == "/" {
            path
        } else {
            path.get(self.path.len()..).unwrap_or_default()
        };
        let joined = format!("{}{}", rewrite.trim_end_matches('/'), rest);
        if joined.is_empty() {
            "/".to_string()
        } else if !joined.starts_with('/') {
            format!("/{joined}")
        } else {
            joined
        }
    }
}

/// Specific routes plus at most one catch-all.
#[derive(Debug, Default)]
pub struct RouteTable {
    specific: Vec<Route>,
    catch_all: Option<Route>,
}

impl RouteTable {
    pub fn from_config(configs: &[RouteConfig]) -> GatewayResult<Self> {
        let mut routes = configs
            .iter()
            .map(Route::from_config)
            .collect::<GatewayResult<Vec<_>>>()?;
        routes.sort_by(|a, b| a.path.len().cmp(&b.path.len()).then_with(|| a.path.cmp(&b.path)));
        if let Some(dup) = routes.windows(2).find(|w| w[0].path == w[1].path) {
            return Err(GatewayError::Config(format!("duplicate route {}", dup[0].path)));
        }

        let is_candidate: Vec<bool> = routes
            .iter()
            .map(|r| routes.iter().any(|o| o.path != r.path && prefix_matches(&r.path, &o.path)))
            .collect();

        let mut specific = Vec::new();
        let mut catch_all: Option<Route> = None;
        for (route, candidate) in routes.into_iter().zip(is_candidate) {
            if !candidate {
                specific.push(route);
            } else if catch_all.is_none() {
                debug!(path = %route.path, "catch-all route");
                catch_all = Some(route);
            } else {
                warn!(path = %route.path, "additional catch-all route ignored");
            }
        }
        specific.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Ok(Self { specific, catch_all })
    }

    /// The route serving `path`, if any.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.specific
            .iter()
            .find(|r| r.matches(path))
            .or_else(|| self.catch_all.as_ref().filter(|r| r.matches(path)))
    }

    pub fn catch_all(&self) -> Option<&Route> {
        self.catch_all.as_ref()
    }

    pub fn specific(&self) -> &[Route] {
        &self.specific
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Segment-aware prefix test: `/api` matches `/api` and `/api/x`, not `/apix`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
