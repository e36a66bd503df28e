//! appgrid-license — the feature gate.
//!
//! A license arrives as `base64(nonce || ciphertext)` sealed with a
//! pre-shared AES-256-GCM key, either pushed on `license.key.push` or
//! fetched with a request on `license.key.request`. Until a valid,
//! unexpired license is installed every check answers as the community
//! edition.

pub mod cipher;
pub mod error;
pub mod gate;
pub mod license;

pub use cipher::LicenseKey;
pub use error::{LicenseError, LicenseResult, QuotaError};
pub use gate::LicenseGate;
pub use license::{COMMUNITY_EDITION, License};
