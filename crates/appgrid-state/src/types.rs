//! Persisted row types.

use std::collections::HashMap;

use appgrid_core::{AppKey, Version, VersionKey};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an app row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Inactive,
    Active,
}

/// One tenant application.
///
/// `current_version` is `None` until the first successful update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub user: String,
    pub app: String,
    pub current_version: Option<Version>,
    pub status: AppStatus,
    pub created_by: String,
    pub created_at: u64,
    pub last_seen: u64,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
}

impl AppRecord {
    pub fn new(key: &AppKey, created_by: impl Into<String>, now: u64) -> Self {
        Self {
            user: key.user.clone(),
            app: key.app.clone(),
            current_version: None,
            status: AppStatus::Inactive,
            created_by: created_by.into(),
            created_at: now,
            last_seen: now,
            env: HashMap::new(),
            volumes: Vec::new(),
        }
    }

    pub fn key(&self) -> AppKey {
        AppKey {
            user: self.user.clone(),
            app: self.app.clone(),
        }
    }

    pub fn table_key(&self) -> String {
        app_table_key(&self.key())
    }
}

/// One compiled artifact that has been started at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppVersionRecord {
    pub user: String,
    pub app: String,
    pub version: Version,
    pub container_id: String,
    pub process_id: Option<u32>,
    pub start_time: u64,
    pub stop_time: Option<u64>,
    pub last_seen: u64,
}

impl AppVersionRecord {
    pub fn started(key: &VersionKey, container_id: impl Into<String>, start_time: u64) -> Self {
        Self {
            user: key.user.clone(),
            app: key.app.clone(),
            version: key.version,
            container_id: container_id.into(),
            process_id: None,
            start_time,
            stop_time: None,
            last_seen: start_time,
        }
    }

    pub fn key(&self) -> VersionKey {
        VersionKey {
            user: self.user.clone(),
            app: self.app.clone(),
            version: self.version,
        }
    }

    pub fn table_key(&self) -> String {
        version_table_key(&self.key())
    }

    /// Record a stop. Never moves `stop_time` before `start_time`.
    pub fn mark_stopped(&mut self, now: u64) {
        let stop = now.max(self.start_time);
        self.stop_time = Some(stop);
        self.last_seen = self.last_seen.max(stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_time.is_some()
    }
}

pub fn app_table_key(key: &AppKey) -> String {
    format!("{}/{}", key.user, key.app)
}

pub fn version_table_key(key: &VersionKey) -> String {
    format!("{}/{}:{}", key.user, key.app, key.version)
}

pub(crate) fn version_prefix(key: &AppKey) -> String {
    format!("{}/{}:", key.user, key.app)
}
