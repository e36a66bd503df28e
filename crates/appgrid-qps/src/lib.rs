//! QPS tracker — sliding-window request rates per app version.
//!
//! The gateway records one sample per dispatched request; the manager
//! polls `is_safe_to_shutdown` while draining a retiring version.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use appgrid_core::config::QpsConfig;
use appgrid_core::{AppKey, VersionKey};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Keys whose window has been empty for this many windows are evicted.
const EVICT_WINDOWS: u32 = 2;

/// Request timestamps for one version.
#[derive(Debug, Default)]
struct Samples {
    hits: VecDeque<Instant>,
    last_hit: Option<Instant>,
}

impl Samples {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.hits.front() {
            if now.saturating_duration_since(*front) > window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct QpsTracker {
    window: Duration,
    threshold: f64,
    max_samples: usize,
    sweep_interval: Duration,
    records: RwLock<HashMap<VersionKey, Arc<Mutex<Samples>>>>,
}

impl QpsTracker {
    pub fn new(window: Duration, threshold: f64, max_samples: usize) -> Self {
        Self {
            window,
            threshold,
            max_samples: max_samples.max(1),
            sweep_interval: window,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &QpsConfig, sweep_interval: Duration) -> Self {
        let mut tracker = Self::new(config.window, config.threshold, config.max_samples);
        tracker.sweep_interval = sweep_interval;
        tracker
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Record one request against `key` at the current instant.
    pub async fn record(&self, key: &VersionKey) {
        let samples = self.samples_for(key).await;
        let now = Instant::now();
        let mut s = samples.lock().await;
        if s.hits.len() >= self.max_samples {
            s.hits.pop_front();
        }
        s.hits.push_back(now);
        s.last_hit = Some(now);
    }

    /// Requests per second over the trailing window.
    pub async fn qps(&self, key: &VersionKey) -> f64 {
        let samples = {
            let records = self.records.read().await;
            match records.get(key) {
                Some(s) => s.clone(),
                None => return 0.0,
            }
        };
        let now = Instant::now();
        let mut s = samples.lock().await;
        s.prune(now, self.window);
        s.hits.len() as f64 / self.window.as_secs_f64()
    }

    pub async fn is_safe_to_shutdown(&self, key: &VersionKey) -> bool {
        self.qps(key).await < self.threshold
    }

    /// Drop keys that have seen no request for two windows. Returns the
    /// number evicted.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let idle_after = self.window * EVICT_WINDOWS;
        let mut records = self.records.write().await;
        let before = records.len();
        let mut keep = HashMap::with_capacity(before);
        for (key, samples) in records.drain() {
            let idle = {
                let mut s = samples.lock().await;
                s.prune(now, self.window);
                s.hits.is_empty()
                    && s.last_hit
                        .is_none_or(|t| now.saturating_duration_since(t) >= idle_after)
            };
            if !idle {
                keep.insert(key, samples);
            }
        }
        *records = keep;
        let evicted = before - records.len();
        if evicted > 0 {
            debug!(evicted, remaining = records.len(), "qps records swept");
        }
        evicted
    }

    /// Forget every version of an app.
    pub async fn forget_app(&self, app: &AppKey) {
        self.records
            .write()
            .await
            .retain(|k, _| k.user != app.user || k.app != app.app);
    }

    /// Number of versions currently tracked.
    pub async fn tracked(&self) -> usize {
        self.records.read().await.len()
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            window_secs = self.window.as_secs(),
            sweep_secs = self.sweep_interval.as_secs(),
            "qps tracker started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    info!("qps tracker shutting down");
                    break;
                }
            }
        }
    }

    async fn samples_for(&self, key: &VersionKey) -> Arc<Mutex<Samples>> {
        if let Some(s) = self.records.read().await.get(key) {
            return s.clone();
        }
        self.records
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }
}
