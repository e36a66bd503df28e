//! Request and reply payloads of the manager's bus subjects.

use std::collections::HashMap;
use std::path::PathBuf;

use appgrid_bus::{BusHeaders, headers};
use appgrid_core::Version;
use appgrid_workspace::{BuildOptions, FileContent, FileWrite};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub user: String,
    pub app: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    /// The source tree is written by someone else (file subjects, git).
    #[serde(default)]
    pub source_provided_externally: bool,
    /// Defaults to `user`.
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub user: String,
    pub app: String,
    /// Defaults to the workspace's `code/` directory.
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub build_opts: BuildOptions,
    #[serde(skip)]
    pub context: RequestContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub user: String,
    pub app: String,
    #[serde(skip)]
    pub context: RequestContext,
}

/// Trace id and caller of a request, carried onto the control messages
/// it causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub trace_id: String,
    pub user: Option<String>,
}

impl RequestContext {
    /// A fresh trace with no caller.
    pub fn new() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            user: None,
        }
    }

    /// Identity of an inbound message. A missing trace id starts a new one.
    pub fn from_headers(h: &BusHeaders) -> Self {
        Self {
            trace_id: h
                .trace_id()
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user: h.request_user().map(str::to_string),
        }
    }

    pub fn headers(&self) -> BusHeaders {
        let mut h = BusHeaders::new();
        h.insert(headers::TRACE_ID, self.trace_id.as_str());
        if let Some(user) = &self.user {
            h.insert(headers::REQUEST_USER, user.as_str());
        }
        h
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirectoryRequest {
    pub user: String,
    pub app: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWriteRequest {
    pub user: String,
    pub app: String,
    pub files: Vec<FileWrite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreateDirectoryRequest {
    pub user: String,
    pub app: String,
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTreeRequest {
    pub user: String,
    pub app: String,
    pub tree: serde_json::Value,
}

/// Reply body for every manager subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileContent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl ManagerReply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: Option<Version>) -> Self {
        self.version = version;
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}
