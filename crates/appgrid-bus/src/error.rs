//! Bus error types.

use std::time::Duration;

use thiserror::Error;

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    #[error("failed to connect to bus: {0}")]
    Connect(String),

    #[error("publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("subscribe to {subject} failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("request to {subject} failed: {reason}")]
    Request { subject: String, reason: String },

    #[error("request to {subject} timed out after {after:?}")]
    Timeout { subject: String, after: Duration },

    #[error("no responders on {0}")]
    NoResponders(String),

    /// The responder answered with a non-zero status code.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("message on {0} has no reply subject")]
    NoReplySubject(String),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("subscription closed")]
    Closed,
}

impl BusError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout { .. })
    }
}
