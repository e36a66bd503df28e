//! Drain controller for a retiring version.
//!
//! A drain moves through its phases as QPS samples come in. The caller
//! owns the clock and the I/O; [`Drain`] only decides when shutdown may
//! be sent: after `confirm_samples` consecutive safe samples, or
//! unconditionally once `max_duration` has elapsed since the notice.

use std::time::Duration;

use appgrid_core::VersionKey;
use appgrid_core::config::TimeoutsConfig;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Current phase of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainPhase {
    /// The cooperative `onAppUpdate` notice has not gone out yet.
    Notifying,
    /// Sampling QPS; `consecutive` safe samples so far.
    Observing { consecutive: u32 },
    /// Shutdown published, waiting for the close report.
    ShutdownSent { forced: bool },
    /// The version reported close.
    Retired,
    Forced { reason: String },
}

/// What the caller should do after feeding a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    /// Sample again after `check_interval`.
    Wait,
    Shutdown,
    /// The cap elapsed while traffic was still above threshold.
    ForceShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub check_interval: Duration,
    pub confirm_samples: u32,
    pub max_duration: Duration,
    /// How long to wait for the close report after shutdown.
    pub shutdown_timeout: Duration,
}

impl DrainPolicy {
    pub fn from_timeouts(t: &TimeoutsConfig) -> Self {
        Self {
            check_interval: t.drain_check_interval,
            confirm_samples: t.drain_confirm_samples.max(1),
            max_duration: t.drain_max_duration,
            shutdown_timeout: t.app_shutdown,
        }
    }

    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.max_duration = max;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Drain {
    pub key: VersionKey,
    pub phase: DrainPhase,
    pub policy: DrainPolicy,
    pub started_at: Option<Instant>,
}

impl Drain {
    pub fn new(key: VersionKey, policy: DrainPolicy) -> Self {
        Self {
            key,
            phase: DrainPhase::Notifying,
            policy,
            started_at: None,
        }
    }

    /// The notice went out; start the cap clock.
    pub fn notified(&mut self, now: Instant) {
        if self.phase != DrainPhase::Notifying {
            return;
        }
        self.started_at = Some(now);
        self.phase = DrainPhase::Observing { consecutive: 0 };
        info!(version = %self.key, "draining");
    }

    /// Feed one QPS sample.
    pub fn observe(&mut self, safe: bool, now: Instant) -> DrainStep {
        let DrainPhase::Observing { consecutive } = self.phase else {
            return DrainStep::Wait;
        };
        let consecutive = if safe { consecutive + 1 } else { 0 };
        if consecutive >= self.policy.confirm_samples {
            self.phase = DrainPhase::ShutdownSent { forced: false };
            debug!(version = %self.key, samples = consecutive, "drain confirmed");
            return DrainStep::Shutdown;
        }
        let elapsed = self
            .started_at
            .map(|s| now.saturating_duration_since(s))
            .unwrap_or_default();
        if elapsed >= self.policy.max_duration {
            self.phase = DrainPhase::ShutdownSent { forced: true };
            warn!(
                version = %self.key,
                elapsed_ms = elapsed.as_millis() as u64,
                "drain cap reached with traffic still above threshold, forcing shutdown"
            );
            return DrainStep::ForceShutdown;
        }
        self.phase = DrainPhase::Observing { consecutive };
        DrainStep::Wait
    }

    /// The version reported close.
    pub fn closed(&mut self) {
        self.phase = match &self.phase {
            DrainPhase::ShutdownSent { forced: true } => DrainPhase::Forced {
                reason: "drain cap reached".to_string(),
            },
            _ => DrainPhase::Retired,
        };
        info!(version = %self.key, phase = ?self.phase, "version retired");
    }

    /// No close report arrived within `shutdown_timeout`.
    pub fn close_timed_out(&mut self) {
        self.phase = DrainPhase::Forced {
            reason: format!("no close report within {:?}", self.policy.shutdown_timeout),
        };
        warn!(version = %self.key, "no close report, proceeding");
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, DrainPhase::Retired | DrainPhase::Forced { .. })
    }

    pub fn was_forced(&self) -> bool {
        matches!(
            self.phase,
            DrainPhase::Forced { .. } | DrainPhase::ShutdownSent { forced: true }
        )
    }
}
