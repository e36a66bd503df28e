//! Revoked-token set.
//!
//! The HR service revokes tokens by SHA-256 hash; plaintext tokens are
//! only ever seen here at validation time.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use appgrid_bus::{BusMessage, MessageBus};
use appgrid_core::{epoch_secs, subjects};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Hex SHA-256 of a plaintext token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Default)]
pub struct TokenBlacklist {
    entries: RwLock<HashMap<String, u64>>,
}

impl TokenBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blacklisted(&self, token: &str) -> bool {
        self.is_hash_blacklisted_at(&hash_token(token), epoch_secs())
    }

    /// True while `now < expiry`. An expired entry is dropped on lookup.
    pub fn is_hash_blacklisted_at(&self, hash: &str, now: u64) -> bool {
        let expiry = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(hash) {
                Some(e) => *e,
                None => return false,
            }
        };
        if now < expiry {
            return true;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(hash).is_some_and(|e| now >= *e) {
            entries.remove(hash);
        }
        false
    }

    pub fn add_by_hash(&self, hash: impl Into<String>, expiry: u64) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(hash.into(), expiry);
    }

    pub fn remove_by_hash(&self, hash: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(hash).is_some()
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(epoch_secs())
    }

    /// Remove entries with `now > expiry`.
    pub fn sweep_at(&self, now: u64) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, expiry| now <= *expiry);
        before - entries.len()
    }

    /// Periodic sweep until shutdown.
    pub async fn run_sweeper(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    let removed = self.sweep();
                    if removed > 0 {
                        debug!(removed, remaining = self.len(), "blacklist swept");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

/// Body of `hr.token.invalidate` and `hr.token.remove_blacklist`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRevocation {
    #[serde(default)]
    pub user_id: serde_json::Value,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Feeds revocation events into a [`TokenBlacklist`].
pub struct BlacklistListener {
    bus: Arc<dyn MessageBus>,
    blacklist: Arc<TokenBlacklist>,
    token_ttl: Duration,
}

impl BlacklistListener {
    pub fn new(bus: Arc<dyn MessageBus>, blacklist: Arc<TokenBlacklist>, token_ttl: Duration) -> Self {
        Self {
            bus,
            blacklist,
            token_ttl,
        }
    }

    pub fn handle_invalidate(&self, msg: &BusMessage) {
        let Some(event) = decode(msg) else { return };
        let issued = if event.timestamp == 0 {
            epoch_secs()
        } else {
            event.timestamp
        };
        let expiry = event
            .expires_at
            .unwrap_or_else(|| issued.saturating_add(self.token_ttl.as_secs()));
        for hash in &event.tokens {
            self.blacklist.add_by_hash(hash.as_str(), expiry);
        }
        info!(
            user_id = %event.user_id,
            username = event.username.as_deref().unwrap_or(""),
            reason = event.reason.as_deref().unwrap_or(""),
            tokens = event.tokens.len(),
            expiry,
            "tokens revoked"
        );
    }

    pub fn handle_remove(&self, msg: &BusMessage) {
        let Some(event) = decode(msg) else { return };
        let removed = event
            .tokens
            .iter()
            .filter(|h| self.blacklist.remove_by_hash(h))
            .count();
        info!(user_id = %event.user_id, removed, "tokens restored");
    }

    /// Subscribe to both revocation subjects and process them until shutdown.
    pub async fn start(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, appgrid_bus::BusError> {
        let mut invalidate = self.bus.subscribe(subjects::TOKEN_INVALIDATE).await?;
        let mut remove = self.bus.subscribe(subjects::TOKEN_REMOVE_BLACKLIST).await?;
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = invalidate.next() => self.handle_invalidate(&msg),
                    Some(msg) = remove.next() => self.handle_remove(&msg),
                    _ = shutdown.changed() => break,
                    else => break,
                }
            }
        }))
    }
}

fn decode(msg: &BusMessage) -> Option<TokenRevocation> {
    match msg.decode() {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(subject = %msg.subject, error = %e, "undecodable revocation event");
            None
        }
    }
}
