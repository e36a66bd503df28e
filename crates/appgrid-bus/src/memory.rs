//! In-process broker.
//!
//! Implements the subset of broker semantics the runtime relies on:
//! token wildcards (`*`, `>`), queue groups with one delivery per group,
//! and request/reply over private inbox subjects. A request with nobody
//! listening fails fast with [`BusError::NoResponders`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::bus::{MessageBus, SUBSCRIPTION_CAPACITY, Subscription};
use crate::error::{BusError, BusResult};
use crate::message::BusMessage;

struct Subscriber {
    pattern: String,
    group: Option<String>,
    tx: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct Broker {
    subscribers: Vec<Subscriber>,
    /// Round-robin cursor per `(pattern, group)`.
    cursors: HashMap<(String, String), usize>,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    broker: Arc<Mutex<Broker>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions whose pattern matches `subject`.
    pub fn interest(&self, subject: &str) -> usize {
        let broker = self.broker.lock().unwrap_or_else(PoisonError::into_inner);
        broker
            .subscribers
            .iter()
            .filter(|s| !s.tx.is_closed() && subject_matches(&s.pattern, subject))
            .count()
    }

    fn add(&self, pattern: &str, group: Option<&str>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let mut broker = self.broker.lock().unwrap_or_else(PoisonError::into_inner);
        broker.subscribers.push(Subscriber {
            pattern: pattern.to_string(),
            group: group.map(str::to_string),
            tx,
        });
        Subscription::new(pattern, rx)
    }

    /// Route one message. Returns how many subscribers received it.
    fn deliver(&self, message: BusMessage) -> usize {
        let mut broker = self.broker.lock().unwrap_or_else(PoisonError::into_inner);
        broker.subscribers.retain(|s| !s.tx.is_closed());

        let mut targets: Vec<usize> = Vec::new();
        let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for (i, sub) in broker.subscribers.iter().enumerate() {
            if !subject_matches(&sub.pattern, &message.subject) {
                continue;
            }
            match &sub.group {
                Some(g) => groups
                    .entry((sub.pattern.clone(), g.clone()))
                    .or_default()
                    .push(i),
                None => targets.push(i),
            }
        }
        for (key, members) in groups {
            let cursor = broker.cursors.entry(key).or_insert(0);
            targets.push(members[*cursor % members.len()]);
            *cursor = cursor.wrapping_add(1);
        }

        let mut delivered = 0;
        for i in targets {
            let sub = &broker.subscribers[i];
            match sub.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subject = %message.subject, pattern = %sub.pattern, "slow subscriber, message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        trace!(subject = %message.subject, delivered, "memory bus delivery");
        delivered
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, message: BusMessage) -> BusResult<()> {
        self.deliver(message);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> BusResult<Subscription> {
        Ok(self.add(subject, None))
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> BusResult<Subscription> {
        Ok(self.add(subject, Some(group)))
    }

    async fn request(&self, message: BusMessage, timeout: Duration) -> BusResult<BusMessage> {
        let subject = message.subject.clone();
        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4().simple());
        let mut replies = self.add(&inbox, None);

        if self.deliver(message.with_reply(inbox)) == 0 {
            return Err(BusError::NoResponders(subject));
        }
        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => reply.into_result(),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout {
                subject,
                after: timeout,
            }),
        }
    }
}

/// Broker-style subject matching.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut p = pattern.split('.');
    let mut s = subject.split('.');
    loop {
        match (p.next(), s.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(a), Some(b)) if a == b => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
