//! appgridd — the AppGrid runtime daemon.
//!
//! Assembles every subsystem into one process:
//! - State store (redb)
//! - Message bus (NATS or in-process)
//! - Container actuator (docker CLI or mock)
//! - Workspace, builder, discovery, QPS tracker
//! - App manager and its bus handlers
//! - License gate and token blacklist
//! - HTTP gateway plus an operator health port

pub mod health;
pub mod runtime;

pub use health::{HealthState, health_router};
pub use runtime::{Runtime, RuntimeOptions, RuntimeParts};
