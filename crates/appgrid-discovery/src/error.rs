use appgrid_bus::BusError;
use thiserror::Error;

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery bus error: {0}")]
    Bus(#[from] BusError),

    #[error("failed to read app metadata: {0}")]
    Workspace(#[from] appgrid_workspace::WorkspaceError),
}
