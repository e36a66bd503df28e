//! Named single-slot rendezvous.
//!
//! A caller registers interest in a key and then blocks on its slot; a
//! notifier delivers at most one value into that slot without blocking.
//! The slot belongs to the [`Pending`] guard and is removed when the
//! guard is dropped, so an entry never outlives its waiter regardless of
//! how the wait ends.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::message::BusMessage;

/// Waiter keyed by trace id, fed by replies on `app.function_server.*.*.*`.
pub type ResponseWaiter = Rendezvous<String, BusMessage>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaiterError {
    #[error("a waiter for {0} is already registered")]
    Duplicate(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("waiter slot closed")]
    Closed,
}

type Slots<K, T> = Arc<RwLock<HashMap<K, mpsc::Sender<T>>>>;

pub struct Rendezvous<K, T> {
    slots: Slots<K, T>,
}

impl<K, T> Clone for Rendezvous<K, T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, T> Default for Rendezvous<K, T>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Rendezvous<K, T>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Claim the slot for `key`. Fails if someone already holds it.
    pub fn register(&self, key: K) -> Result<Pending<K, T>, WaiterError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(&key) {
            return Err(WaiterError::Duplicate(key.to_string()));
        }
        let (tx, rx) = mpsc::channel(1);
        slots.insert(key.clone(), tx);
        trace!(%key, "waiter registered");
        Ok(Pending {
            key,
            rx,
            slots: Arc::clone(&self.slots),
        })
    }

    /// Register and wait in one step.
    pub async fn wait(&self, key: K, timeout: Duration) -> Result<T, WaiterError> {
        self.register(key)?.wait(timeout).await
    }

    /// Deliver `value` to the waiter for `key` without blocking.
    ///
    /// Returns `false` when nobody is waiting or the slot is already full;
    /// the value is dropped in that case.
    pub fn notify(&self, key: &K, value: T) -> bool {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        match slots.get(key) {
            Some(tx) => tx.try_send(value).is_ok(),
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A claimed slot. Dropping it releases the key.
pub struct Pending<K, T>
where
    K: Eq + Hash,
{
    key: K,
    rx: mpsc::Receiver<T>,
    slots: Slots<K, T>,
}

impl<K, T> Pending<K, T>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Block until a value arrives or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Result<T, WaiterError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(WaiterError::Closed),
            Err(_) => Err(WaiterError::Timeout(timeout)),
        }
    }
}

impl<K, T> Drop for Pending<K, T>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(&self.key);
    }
}
