//! Bus dispatch for `/api/v1/run/{user}/{app}/...`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use appgrid_bus::{BusHeaders, BusMessage, MessageBus, ResponseWaiter, WaiterError, headers};
use appgrid_core::{AppKey, Version, subjects};
use appgrid_discovery::DiscoveryService;
use appgrid_qps::QpsTracker;
use appgrid_workspace::{VersionMetadata, Workspace};
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

/// One inbound invocation.
#[derive(Debug, Clone)]
pub struct AppCall {
    pub key: AppKey,
    pub router_path: String,
    pub method: String,
    pub trace_id: String,
    pub user: Option<String>,
    pub body: Bytes,
}

pub struct AppDispatcher {
    bus: Arc<dyn MessageBus>,
    waiter: ResponseWaiter,
    /// Reply subject each in-flight trace id was dispatched with.
    reply_subjects: Mutex<HashMap<String, String>>,
    discovery: Arc<DiscoveryService>,
    workspace: Workspace,
    qps: Arc<QpsTracker>,
    timeout: Duration,
}

impl AppDispatcher {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        discovery: Arc<DiscoveryService>,
        workspace: Workspace,
        qps: Arc<QpsTracker>,
        timeout: Duration,
    ) -> Self {
        Self {
            bus,
            waiter: ResponseWaiter::new(),
            reply_subjects: Mutex::new(HashMap::new()),
            discovery,
            workspace,
            qps,
            timeout,
        }
    }

    pub fn waiter(&self) -> &ResponseWaiter {
        &self.waiter
    }

    /// Current version: discovery first, then on-disk metadata for apps
    /// discovery has not seen.
    pub async fn resolve_version(&self, key: &AppKey) -> GatewayResult<Version> {
        if let Some(v) = self.discovery.current_version(key).await {
            return Ok(v);
        }
        let meta = VersionMetadata::read(&self.workspace.app(key))
            .map_err(|e| GatewayError::Backend(e.to_string()))?;
        meta.map(|m| m.current_version)
            .ok_or_else(|| GatewayError::NotFound(format!("app {key} has no deployed version")))
    }

    /// Publish the call and wait for the app's reply.
    pub async fn dispatch(&self, call: AppCall) -> GatewayResult<BusMessage> {
        let version = self.resolve_version(&call.key).await?;
        let vkey = call.key.with_version(version);
        self.qps.record(&vkey).await;

        let pending = self.waiter.register(call.trace_id.clone()).map_err(|e| match e {
            WaiterError::Duplicate(id) => GatewayError::Conflict(format!("trace id {id} already in flight")),
            other => GatewayError::Backend(other.to_string()),
        })?;
        let reply_subject = subjects::function_server(&vkey);
        let _expected = ExpectedReply::register(&self.reply_subjects, &call.trace_id, reply_subject.clone());

        let mut h = BusHeaders::new();
        h.insert(headers::TRACE_ID, call.trace_id.as_str());
        h.insert(headers::ROUTER_PATH, call.router_path.as_str());
        h.insert(headers::REQUEST_METHOD, call.method.as_str());
        if let Some(user) = &call.user {
            h.insert(headers::REQUEST_USER, user.as_str());
        }
        let msg = BusMessage::new(subjects::app_invoke(&vkey), call.body)
            .with_reply(reply_subject)
            .with_headers(h);
        self.bus
            .publish(msg)
            .await
            .map_err(|e| GatewayError::Backend(e.to_string()))?;
        debug!(version = %vkey, trace_id = %call.trace_id, path = %call.router_path, "dispatched to app");

        let reply = pending.wait(self.timeout).await.map_err(|e| match e {
            WaiterError::Timeout(after) => GatewayError::Timeout(after),
            other => GatewayError::Backend(other.to_string()),
        })?;
        let status = reply.status();
        if !status.is_ok() {
            return Err(GatewayError::Backend(format!(
                "app replied {}: {}",
                status.code, status.message
            )));
        }
        Ok(reply)
    }

    /// Route one reply to its waiter. Returns whether anyone was waiting.
    pub fn accept_reply(&self, msg: BusMessage) -> bool {
        let Some(trace_id) = msg.headers.trace_id().map(str::to_string) else {
            warn!(subject = %msg.subject, "reply without trace id dropped");
            return false;
        };
        let expected = self
            .reply_subjects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&trace_id)
            .cloned();
        match expected {
            Some(subject) if subject == msg.subject => {}
            Some(subject) => {
                warn!(%trace_id, got = %msg.subject, expected = %subject, "reply from wrong app version dropped");
                return false;
            }
            None => {
                debug!(%trace_id, "reply with no waiter dropped");
                return false;
            }
        }
        let delivered = self.waiter.notify(&trace_id, msg);
        if !delivered {
            debug!(%trace_id, "reply with no waiter dropped");
        }
        delivered
    }

    /// Subscribe once to all function-server replies.
    pub async fn start_reply_listener(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, appgrid_bus::BusError> {
        let mut replies = self.bus.subscribe(subjects::FUNCTION_SERVER_WILDCARD).await?;
        let dispatcher = self;
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = replies.next() => {
                        let Some(msg) = msg else { break };
                        dispatcher.accept_reply(msg);
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }))
    }
}

/// Registration of an expected reply subject, removed on drop.
struct ExpectedReply<'a> {
    map: &'a Mutex<HashMap<String, String>>,
    trace_id: String,
}

impl<'a> ExpectedReply<'a> {
    fn register(map: &'a Mutex<HashMap<String, String>>, trace_id: &str, subject: String) -> Self {
        map.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(trace_id.to_string(), subject);
        Self {
            map,
            trace_id: trace_id.to_string(),
        }
    }
}

impl Drop for ExpectedReply<'_> {
    fn drop(&mut self) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.trace_id);
    }
}
