//! The bus abstraction.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::{BusError, BusResult};
use crate::message::{BusHeaders, BusMessage, ReplyStatus};

/// Capacity of every subscription's delivery queue.
pub(crate) const SUBSCRIPTION_CAPACITY: usize = 1024;

/// Subject-addressed broker client. One instance is shared process-wide.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Fire-and-forget publish. `message.reply` is forwarded if set.
    async fn publish(&self, message: BusMessage) -> BusResult<()>;

    /// Subscribe to a subject pattern (`*` = one token, `>` = the rest).
    async fn subscribe(&self, subject: &str) -> BusResult<Subscription>;

    /// Subscribe as a member of `group`; each message reaches one member.
    async fn queue_subscribe(&self, subject: &str, group: &str) -> BusResult<Subscription>;

    /// Publish and await one reply.
    ///
    /// A reply with a non-zero status code is returned as
    /// [`BusError::Remote`]; expiry is [`BusError::Timeout`].
    async fn request(&self, message: BusMessage, timeout: Duration) -> BusResult<BusMessage>;
}

/// A stream of messages delivered to one subscriber.
pub struct Subscription {
    subject: String,
    rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, rx: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            subject: subject.into(),
            rx,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the bus side is gone.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

/// Convenience operations available on every bus.
#[async_trait]
pub trait BusExt: MessageBus {
    async fn publish_json<T: Serialize + Sync>(
        &self,
        subject: &str,
        headers: BusHeaders,
        body: &T,
    ) -> BusResult<()> {
        self.publish(BusMessage::json(subject, body)?.with_headers(headers))
            .await
    }

    /// JSON request/reply.
    async fn request_json<Req, Resp>(
        &self,
        subject: &str,
        headers: BusHeaders,
        body: &Req,
        timeout: Duration,
    ) -> BusResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let reply = self
            .request(BusMessage::json(subject, body)?.with_headers(headers), timeout)
            .await?;
        reply.decode()
    }

    /// Answer `request` on its reply subject, copying its identity headers
    /// and attaching `status`.
    async fn respond(
        &self,
        request: &BusMessage,
        status: ReplyStatus,
        payload: Bytes,
    ) -> BusResult<()> {
        let reply = request
            .reply
            .clone()
            .ok_or_else(|| BusError::NoReplySubject(request.subject.clone()))?;
        let mut headers = request.headers.identity();
        headers.set_status(&status);
        self.publish(BusMessage::new(reply, payload).with_headers(headers))
            .await
    }
}

impl<B: MessageBus + ?Sized> BusExt for B {}
