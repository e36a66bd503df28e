//! appgrid-discovery — who is running what, across runtime hosts.
//!
//! The service broadcasts a probe on `ai-agent-os.runtime.discovery`;
//! every app instance answers on `ai-agent-os.runtime.discovery.response.*`
//! with its identity and status. Instances also announce startup and
//! close on `runtime.status.<user>.<app>.<version>`. A version counts as
//! running while its last report says `running` and is younger than the
//! liveness window. Transitions are published as
//! [`RuntimeEvent::AppStartup`] / [`RuntimeEvent::AppClose`].
//!
//! [`RuntimeEvent::AppStartup`]: appgrid_core::RuntimeEvent::AppStartup
//! [`RuntimeEvent::AppClose`]: appgrid_core::RuntimeEvent::AppClose

pub mod error;
pub mod protocol;
pub mod service;

pub use error::{DiscoveryError, DiscoveryResult};
pub use protocol::{DiscoveryProbe, DiscoveryResponse, StatusNotice, StatusNoticeKind};
pub use service::{AppSnapshot, DiscoveryService, VersionView};
