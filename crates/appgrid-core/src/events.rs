//! In-process event dispatcher.
//!
//! Services publish typed lifecycle events here instead of holding
//! references to each other. Discovery publishes `AppStartup` /
//! `AppClose`; the manager publishes `AppPromoted`; anyone interested
//! subscribes by topic.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use crate::ids::{AppKey, Version, VersionKey};

/// A lifecycle event inside one runtime process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A version transitioned into `running`.
    AppStartup { key: VersionKey, start_time: u64 },
    /// A version transitioned out of `running`.
    AppClose { key: VersionKey },
    /// A version became the app's current version.
    AppPromoted { key: AppKey, version: Version },
}

impl RuntimeEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            RuntimeEvent::AppStartup { .. } => EventTopic::Startup,
            RuntimeEvent::AppClose { .. } => EventTopic::Close,
            RuntimeEvent::AppPromoted { .. } => EventTopic::Promoted,
        }
    }
}

/// Topic used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Startup,
    Close,
    Promoted,
}

struct Subscriber {
    topics: Vec<EventTopic>,
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

/// Fan-out dispatcher. Cheap to clone.
///
/// Each subscriber has its own unbounded queue: a slow consumer falls
/// behind but sees every event.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event. Returns the number of subscribers reached.
    pub fn publish(&self, event: RuntimeEvent) -> usize {
        let topic = event.topic();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| !s.tx.is_closed());
        let mut reached = 0;
        for s in subscribers.iter().filter(|s| s.topics.contains(&topic)) {
            if s.tx.send(event.clone()).is_ok() {
                reached += 1;
            }
        }
        trace!(?topic, reached, "event published");
        reached
    }

    /// Subscribe to the given topics.
    pub fn subscribe(&self, topics: &[EventTopic]) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                topics: topics.to_vec(),
                tx,
            });
        EventSubscription { rx }
    }
}

/// A topic-filtered receiver.
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<RuntimeEvent>,
}

impl EventSubscription {
    /// Next matching event, or `None` once every dispatcher handle is gone.
    pub async fn recv(&mut self) -> Option<RuntimeEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vkey() -> VersionKey {
        VersionKey::new("alice", "todo", Version::FIRST).unwrap()
    }

    #[tokio::test]
    async fn subscribers_receive_matching_topics_only() {
        let events = EventDispatcher::new();
        let mut closes = events.subscribe(&[EventTopic::Close]);

        events.publish(RuntimeEvent::AppStartup {
            key: vkey(),
            start_time: 10,
        });
        events.publish(RuntimeEvent::AppClose { key: vkey() });

        assert_eq!(closes.recv().await, Some(RuntimeEvent::AppClose { key: vkey() }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let events = EventDispatcher::new();
        assert_eq!(events.publish(RuntimeEvent::AppClose { key: vkey() }), 0);
    }

    #[tokio::test]
    async fn recv_ends_when_dispatcher_dropped() {
        let events = EventDispatcher::new();
        let mut sub = events.subscribe(&[EventTopic::Startup]);
        drop(events);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn burst_before_first_recv_is_delivered_in_full() {
        let events = EventDispatcher::new();
        let mut sub = events.subscribe(&[EventTopic::Startup, EventTopic::Close]);
        for i in 0..3000u64 {
            events.publish(RuntimeEvent::AppStartup {
                key: vkey(),
                start_time: i,
            });
        }
        events.publish(RuntimeEvent::AppClose { key: vkey() });

        for i in 0..3000u64 {
            assert_eq!(
                sub.recv().await,
                Some(RuntimeEvent::AppStartup {
                    key: vkey(),
                    start_time: i
                })
            );
        }
        assert_eq!(sub.recv().await, Some(RuntimeEvent::AppClose { key: vkey() }));
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let events = EventDispatcher::new();
        let sub = events.subscribe(&[EventTopic::Close]);
        assert_eq!(events.publish(RuntimeEvent::AppClose { key: vkey() }), 1);
        drop(sub);
        assert_eq!(events.publish(RuntimeEvent::AppClose { key: vkey() }), 0);
    }
}
