//! appgrid-core — shared vocabulary for the AppGrid runtime.
//!
//! Everything that more than one subsystem has to agree on lives here:
//! application identities, the `v<N>` version scheme, bus subject
//! conventions, the runtime configuration tree, and the in-process
//! event dispatcher that replaces direct callbacks between services.

pub mod config;
pub mod duration;
pub mod error;
pub mod events;
pub mod ids;
pub mod subjects;

pub use config::RuntimeConfig;
pub use duration::parse_duration;
pub use error::{CoreError, CoreResult};
pub use events::{EventDispatcher, EventSubscription, EventTopic, RuntimeEvent};
pub use ids::{AppKey, Version, VersionKey, validate_identifier};

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
