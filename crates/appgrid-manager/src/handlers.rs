//! Bus-facing entry points of the manager.
//!
//! Every manager subject is a queue-group subscription so a request is
//! handled by exactly one runtime. Each message is handled on its own
//! task; a long update never delays a delete of another app.

use std::sync::Arc;

use appgrid_bus::{BusError, BusExt, BusMessage, MessageBus, ReplyStatus, Subscription};
use appgrid_core::{AppKey, subjects};
use appgrid_workspace::files;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::guard::AppLease;
use crate::manager::AppManager;
use crate::protocol::*;

/// Subjects served by [`BusHandlers`].
pub const SUBJECTS: &[&str] = &[
    subjects::APP_CREATE,
    subjects::APP_UPDATE,
    subjects::APP_DELETE,
    subjects::READ_DIRECTORY_FILES,
    subjects::BATCH_WRITE_FILES,
    subjects::BATCH_CREATE_DIRECTORY_TREE,
    subjects::UPDATE_SERVICE_TREE,
];

pub struct BusHandlers {
    bus: Arc<dyn MessageBus>,
    manager: Arc<AppManager>,
}

impl BusHandlers {
    pub fn new(bus: Arc<dyn MessageBus>, manager: Arc<AppManager>) -> Self {
        Self { bus, manager }
    }

    /// Subscribe to every manager subject. Returns once all subscriptions
    /// are live.
    pub async fn start(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, BusError> {
        let mut tasks = Vec::with_capacity(SUBJECTS.len());
        for subject in SUBJECTS {
            let sub = self
                .bus
                .queue_subscribe(subject, subjects::MANAGER_QUEUE_GROUP)
                .await?;
            tasks.push(tokio::spawn(Arc::clone(&self).serve(sub, shutdown.clone())));
        }
        info!(subjects = SUBJECTS.len(), "manager handlers listening");
        Ok(tasks)
    }

    async fn serve(self: Arc<Self>, mut sub: Subscription, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                msg = sub.next() => match msg {
                    Some(msg) => {
                        let handlers = Arc::clone(&self);
                        tokio::spawn(async move { handlers.handle(msg).await });
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!(subject = sub.subject(), "manager handler stopped");
    }

    /// Run one request and answer it.
    pub async fn handle(&self, msg: BusMessage) {
        let result = self.dispatch(&msg).await;
        let (status, reply) = match result {
            Ok(reply) => (ReplyStatus::ok(), reply),
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "manager request failed");
                let status = ReplyStatus::error(e.kind().code(), e.to_string());
                (status, ManagerReply::error(e.to_string()))
            }
        };
        if msg.reply.is_none() {
            return;
        }
        let payload = match serde_json::to_vec(&reply) {
            Ok(p) => Bytes::from(p),
            Err(e) => {
                warn!(error = %e, "failed to encode manager reply");
                return;
            }
        };
        if let Err(e) = self.bus.respond(&msg, status, payload).await {
            warn!(subject = %msg.subject, error = %e, "failed to send manager reply");
        }
    }

    async fn dispatch(&self, msg: &BusMessage) -> ManagerResult<ManagerReply> {
        match msg.subject.as_str() {
            subjects::APP_CREATE => {
                let mut req: CreateRequest = decode(msg)?;
                if req.created_by.is_none() {
                    req.created_by = msg.headers.request_user().map(str::to_string);
                }
                let record = self.manager.create(req).await?;
                Ok(ManagerReply::ok().with_version(record.current_version))
            }
            subjects::APP_UPDATE => {
                let mut req: UpdateRequest = decode(msg)?;
                req.context = RequestContext::from_headers(&msg.headers);
                let handle = self.manager.update(req).await?;
                Ok(ManagerReply::ok().with_version(Some(handle.version)))
            }
            subjects::APP_DELETE => {
                let mut req: DeleteRequest = decode(msg)?;
                req.context = RequestContext::from_headers(&msg.headers);
                self.manager.delete(req).await?;
                Ok(ManagerReply::ok())
            }
            subjects::READ_DIRECTORY_FILES => {
                let req: ReadDirectoryRequest = decode(msg)?;
                let ws = self.existing_workspace(&req.user, &req.app)?;
                let found = files::read_directory_files(&ws, &req.path)?;
                Ok(ManagerReply {
                    count: Some(found.len()),
                    files: Some(found),
                    ..ManagerReply::ok()
                })
            }
            subjects::BATCH_WRITE_FILES => {
                let req: BatchWriteRequest = decode(msg)?;
                let (ws, _lease) = self.leased_workspace(&req.user, &req.app)?;
                let written = files::batch_write_files(&ws, &req.files)?;
                Ok(ManagerReply {
                    count: Some(written),
                    ..ManagerReply::ok()
                })
            }
            subjects::BATCH_CREATE_DIRECTORY_TREE => {
                let req: BatchCreateDirectoryRequest = decode(msg)?;
                let (ws, _lease) = self.leased_workspace(&req.user, &req.app)?;
                let created = files::batch_create_directory_tree(&ws, &req.dirs)?;
                Ok(ManagerReply {
                    count: Some(created),
                    ..ManagerReply::ok()
                })
            }
            subjects::UPDATE_SERVICE_TREE => {
                let req: ServiceTreeRequest = decode(msg)?;
                let (ws, _lease) = self.leased_workspace(&req.user, &req.app)?;
                files::update_service_tree(&ws, &req.tree)?;
                Ok(ManagerReply::ok())
            }
            other => Err(ManagerError::Validation(format!("unhandled subject {other}"))),
        }
    }

    fn existing_workspace(&self, user: &str, app: &str) -> ManagerResult<appgrid_workspace::AppWorkspace> {
        let key = AppKey::new(user, app)?;
        let ws = self.manager.workspace().app(&key);
        if !ws.exists() {
            return Err(ManagerError::NotFound(key.to_string()));
        }
        Ok(ws)
    }

    /// Workspace edits exclude a concurrent update or delete of the app.
    fn leased_workspace(&self, user: &str, app: &str) -> ManagerResult<(appgrid_workspace::AppWorkspace, AppLease)> {
        let ws = self.existing_workspace(user, app)?;
        let lease = self.manager.lease(&AppKey::new(user, app)?)?;
        Ok((ws, lease))
    }
}

fn decode<T: DeserializeOwned>(msg: &BusMessage) -> ManagerResult<T> {
    msg.decode()
        .map_err(|e| ManagerError::Validation(format!("malformed request: {e}")))
}
