use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const COMMUNITY_EDITION: &str = "community";

/// Decrypted license body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub edition: String,
    /// Unix seconds. Zero means no expiry.
    #[serde(default)]
    pub expires_at: u64,
    #[serde(default)]
    pub features: HashMap<String, bool>,
    /// `None` or zero means unlimited.
    #[serde(default)]
    pub max_apps: Option<u32>,
    #[serde(default)]
    pub max_users: Option<u32>,
}

impl License {
    /// The edition in effect when no license is loaded.
    pub fn community() -> Self {
        Self {
            edition: COMMUNITY_EDITION.to_string(),
            expires_at: 0,
            features: HashMap::new(),
            max_apps: None,
            max_users: None,
        }
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at != 0 && now >= self.expires_at
    }

    pub fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

pub(crate) fn cap(limit: Option<u32>) -> Option<u32> {
    limit.filter(|l| *l > 0)
}
