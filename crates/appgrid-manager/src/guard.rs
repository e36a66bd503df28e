//! Per-app mutual exclusion for update and delete.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use appgrid_core::AppKey;

use crate::error::{ManagerError, ManagerResult};

#[derive(Clone, Default)]
pub struct AppGuards {
    busy: Arc<Mutex<HashSet<AppKey>>>,
}

impl AppGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or fail with [`ManagerError::InProgress`] if it is held.
    pub fn try_acquire(&self, key: &AppKey) -> ManagerResult<AppLease> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(key.clone()) {
            return Err(ManagerError::InProgress(key.to_string()));
        }
        Ok(AppLease {
            key: key.clone(),
            busy: Arc::clone(&self.busy),
        })
    }

    pub fn is_busy(&self, key: &AppKey) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Held for the lifetime of an operation; released on drop.
pub struct AppLease {
    key: AppKey,
    busy: Arc<Mutex<HashSet<AppKey>>>,
}

impl AppLease {
    pub fn key(&self) -> &AppKey {
        &self.key
    }
}

impl Drop for AppLease {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let guards = AppGuards::new();
        let key = AppKey::new("alice", "todo").unwrap();
        let lease = guards.try_acquire(&key).unwrap();
        assert!(matches!(guards.try_acquire(&key), Err(ManagerError::InProgress(_))));
        assert!(guards.is_busy(&key));
        drop(lease);
        assert!(guards.try_acquire(&key).is_ok());
    }

    #[test]
    fn different_apps_do_not_contend() {
        let guards = AppGuards::new();
        let _a = guards.try_acquire(&AppKey::new("alice", "todo").unwrap()).unwrap();
        assert!(guards.try_acquire(&AppKey::new("alice", "blog").unwrap()).is_ok());
    }
}
