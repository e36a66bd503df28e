//! appgrid-state — persistent app and version rows.
//!
//! Backed by [redb](https://docs.rs/redb). Rows are JSON-serialized into
//! `&[u8]` value columns; keys are `{user}/{app}` for apps and
//! `{user}/{app}:{version}` for versions so one app's history is a
//! prefix scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and is shared by the manager and the daemon's health API.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
