//! appgrid-container — the container actuator seam.
//!
//! The runtime treats the container engine as an opaque actuator: it can
//! create a named container with one bind mount and an entry command,
//! start/stop/remove it, and run commands inside it. [`DockerCli`] drives
//! the `docker` binary; [`MockActuator`] keeps everything in memory and
//! broadcasts what happened so tests can simulate app processes.

pub mod actuator;
pub mod docker;
pub mod error;
pub mod mock;

pub use actuator::{ContainerActuator, ContainerSpec, DEFAULT_STOP_TIMEOUT};
pub use docker::DockerCli;
pub use error::{ContainerError, ContainerResult};
pub use mock::{MockActuator, MockEvent};
