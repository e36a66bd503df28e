use appgrid_bus::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("invalid license key: {0}")]
    InvalidKey(String),

    #[error("no license key configured")]
    NoKey,

    #[error("license payload is not base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("license payload too short ({0} bytes)")]
    TooShort(usize),

    #[error("license payload failed to decrypt")]
    Decrypt,

    #[error("license body invalid: {0}")]
    Body(#[from] serde_json::Error),

    #[error("{0}")]
    Bus(#[from] BusError),
}

pub type LicenseResult<T> = Result<T, LicenseError>;

/// A create call would exceed a licensed cap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{resource} quota exceeded: {requested} > {limit}")]
pub struct QuotaError {
    pub resource: &'static str,
    pub limit: u32,
    pub requested: u64,
}
