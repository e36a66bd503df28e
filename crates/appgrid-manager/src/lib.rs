//! appgrid-manager — create, update, and delete tenant apps.
//!
//! An update builds the next version, starts it next to the running one,
//! waits for discovery to report it, and promotes it. Old versions are
//! then drained in the background: a cooperative `onAppUpdate` notice,
//! QPS sampling until the version has been quiet for several checks (or
//! a cap elapses), a `shutdown` command, and a wait for its close report.
//!
//! At most one update, delete, or workspace edit runs per app; a second
//! one fails with [`ManagerError::InProgress`] before doing any work.

pub mod drain;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod manager;
pub mod protocol;

pub use drain::{Drain, DrainPhase, DrainPolicy, DrainStep};
pub use error::{ErrorKind, ManagerError, ManagerResult};
pub use guard::{AppGuards, AppLease};
pub use handlers::BusHandlers;
pub use manager::{AppManager, DrainReport, ManagerDeps, UpdateHandle};
pub use protocol::{
    BatchCreateDirectoryRequest, BatchWriteRequest, CreateRequest, DeleteRequest, ManagerReply,
    ReadDirectoryRequest, RequestContext, ServiceTreeRequest, UpdateRequest,
};
