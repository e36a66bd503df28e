//! NATS-backed bus.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::{MessageBus, SUBSCRIPTION_CAPACITY, Subscription};
use crate::error::{BusError, BusResult};
use crate::message::{BusHeaders, BusMessage, headers};

/// One process-wide connection to a NATS server. Cheap to clone.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = async_nats::ConnectOptions::new()
            .name("appgridd")
            .request_timeout(None)
            .connect(url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        info!(%url, "connected to message bus");
        Ok(Self { client })
    }

    /// Flush buffered publishes.
    pub async fn flush(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Connect(e.to_string()))
    }

    fn forward(subject: &str, mut subscriber: async_nats::Subscriber) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let pattern = subject.to_string();
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                if tx.send(from_nats(message)).await.is_err() {
                    break;
                }
            }
            debug!(%pattern, "nats subscription ended");
        });
        Subscription::new(subject, rx)
    }
}

fn to_nats_headers(src: &BusHeaders) -> async_nats::HeaderMap {
    let mut map = async_nats::HeaderMap::new();
    for (name, value) in src.iter() {
        map.insert(name, value);
    }
    map
}

fn from_nats(message: async_nats::Message) -> BusMessage {
    let mut out = BusHeaders::new();
    if let Some(map) = message.headers.as_ref() {
        for name in headers::KNOWN {
            if let Some(value) = map.get(*name) {
                out.insert(*name, value.as_str());
            }
        }
    }
    BusMessage {
        subject: message.subject.to_string(),
        reply: message.reply.map(|r| r.to_string()),
        headers: out,
        payload: message.payload,
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, message: BusMessage) -> BusResult<()> {
        let headers = to_nats_headers(&message.headers);
        let subject = message.subject;
        let result = match message.reply {
            Some(reply) => {
                self.client
                    .publish_with_reply_and_headers(subject.clone(), reply, headers, message.payload)
                    .await
            }
            None => {
                self.client
                    .publish_with_headers(subject.clone(), headers, message.payload)
                    .await
            }
        };
        result.map_err(|e| BusError::Publish {
            subject,
            reason: e.to_string(),
        })
    }

    async fn subscribe(&self, subject: &str) -> BusResult<Subscription> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        debug!(%subject, "subscribed");
        Ok(Self::forward(subject, subscriber))
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> BusResult<Subscription> {
        let subscriber = self
            .client
            .queue_subscribe(subject.to_string(), group.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;
        debug!(%subject, %group, "queue subscribed");
        Ok(Self::forward(subject, subscriber))
    }

    async fn request(&self, message: BusMessage, timeout: Duration) -> BusResult<BusMessage> {
        let subject = message.subject.clone();
        let headers = to_nats_headers(&message.headers);
        let pending = self
            .client
            .request_with_headers(subject.clone(), headers, message.payload);

        let reply = match tokio::time::timeout(timeout, pending).await {
            Err(_) => {
                return Err(BusError::Timeout {
                    subject,
                    after: timeout,
                });
            }
            Ok(Err(e)) => {
                return Err(match e.kind() {
                    async_nats::RequestErrorKind::TimedOut => BusError::Timeout {
                        subject,
                        after: timeout,
                    },
                    async_nats::RequestErrorKind::NoResponders => BusError::NoResponders(subject),
                    _ => BusError::Request {
                        subject,
                        reason: e.to_string(),
                    },
                });
            }
            Ok(Ok(reply)) => reply,
        };
        from_nats(reply).into_result()
    }
}
