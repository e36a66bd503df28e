//! Wire payloads.

use serde::{Deserialize, Serialize};

/// Status string app instances report while serving.
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_STOPPED: &str = "stopped";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryProbe {
    pub runtime_id: String,
    pub timestamp: u64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub user: String,
    pub app: String,
    pub version: String,
    pub status: String,
    #[serde(default)]
    pub start_time: u64,
    #[serde(default)]
    pub runtime_id: String,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusNoticeKind {
    #[serde(rename = "startup")]
    Startup,
    #[serde(rename = "close")]
    Close,
    /// Cooperative drain notice sent by the manager.
    #[serde(rename = "onAppUpdate")]
    OnAppUpdate,
}

/// Payload on `runtime.status.<user>.<app>.<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotice {
    #[serde(rename = "type")]
    pub kind: StatusNoticeKind,
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub runtime_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_type_names() {
        let n: StatusNotice = serde_json::from_str(r#"{"type":"onAppUpdate"}"#).unwrap();
        assert_eq!(n.kind, StatusNoticeKind::OnAppUpdate);
        let n: StatusNotice =
            serde_json::from_str(r#"{"type":"startup","start_time":12}"#).unwrap();
        assert_eq!(n.kind, StatusNoticeKind::Startup);
        assert_eq!(n.start_time, Some(12));
    }

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let r: DiscoveryResponse = serde_json::from_str(
            r#"{"user":"alice","app":"todo","version":"v1","status":"running"}"#,
        )
        .unwrap();
        assert_eq!(r.start_time, 0);
        assert!(r.runtime_id.is_empty());
    }
}
