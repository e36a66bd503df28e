//! Bus subject conventions.
//!
//! All subjects are case-sensitive, `.`-separated strings. Builders take
//! validated identities so a user or app name can never inject an extra
//! subject token.

use crate::ids::VersionKey;

pub const APP_CREATE: &str = "app_runtime.app.create";
pub const APP_UPDATE: &str = "app_runtime.app.update";
pub const APP_DELETE: &str = "app_server.app_runtime.delete";

pub const READ_DIRECTORY_FILES: &str = "app_runtime.app.read_directory_files";
pub const BATCH_WRITE_FILES: &str = "app_runtime.app.batch_write_files";
pub const BATCH_CREATE_DIRECTORY_TREE: &str = "app_runtime.app.batch_create_directory_tree";
pub const UPDATE_SERVICE_TREE: &str = "app_runtime.app.update_service_tree";

/// Queue group shared by every manager instance.
pub const MANAGER_QUEUE_GROUP: &str = "app_runtime";

pub const DISCOVERY_PROBE: &str = "ai-agent-os.runtime.discovery";
pub const DISCOVERY_RESPONSE_PREFIX: &str = "ai-agent-os.runtime.discovery.response";
pub const DISCOVERY_RESPONSE_WILDCARD: &str = "ai-agent-os.runtime.discovery.response.*";

pub const RUNTIME_STATUS_WILDCARD: &str = "runtime.status.*.*.*";
pub const FUNCTION_SERVER_WILDCARD: &str = "app.function_server.*.*.*";

pub const TOKEN_INVALIDATE: &str = "hr.token.invalidate";
pub const TOKEN_REMOVE_BLACKLIST: &str = "hr.token.remove_blacklist";

pub const LICENSE_PUSH: &str = "license.key.push";
pub const LICENSE_REQUEST: &str = "license.key.request";

/// Router → app instance request subject.
pub fn app_invoke(key: &VersionKey) -> String {
    format!("app_runtime.app.{}.{}.{}", key.user, key.app, key.version)
}

/// App instance → router reply subject.
pub fn function_server(key: &VersionKey) -> String {
    format!("app.function_server.{}.{}.{}", key.user, key.app, key.version)
}

/// App instance → manager lifecycle notices.
pub fn runtime_status(key: &VersionKey) -> String {
    format!("runtime.status.{}.{}.{}", key.user, key.app, key.version)
}

/// Manager → app instance commands (shutdown).
pub fn app_status(key: &VersionKey) -> String {
    format!("app.status.{}.{}.{}", key.user, key.app, key.version)
}

/// Discovery response subject for one runtime host.
pub fn discovery_response(runtime_id: &str) -> String {
    format!("{DISCOVERY_RESPONSE_PREFIX}.{runtime_id}")
}

/// Split the trailing `<user>.<app>.<version>` tokens off a subject.
///
/// Returns `None` unless the subject starts with `prefix.` and has
/// exactly three tokens after it.
pub fn parse_version_suffix<'a>(subject: &'a str, prefix: &str) -> Option<(&'a str, &'a str, &'a str)> {
    let rest = subject.strip_prefix(prefix)?.strip_prefix('.')?;
    let mut parts = rest.split('.');
    let user = parts.next()?;
    let app = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some() || user.is_empty() || app.is_empty() || version.is_empty() {
        return None;
    }
    Some((user, app, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{Version, VersionKey};

    fn key() -> VersionKey {
        VersionKey::new("alice", "todo", Version::FIRST).unwrap()
    }

    #[test]
    fn per_version_subjects() {
        let k = key();
        assert_eq!(app_invoke(&k), "app_runtime.app.alice.todo.v1");
        assert_eq!(function_server(&k), "app.function_server.alice.todo.v1");
        assert_eq!(runtime_status(&k), "runtime.status.alice.todo.v1");
        assert_eq!(app_status(&k), "app.status.alice.todo.v1");
    }

    #[test]
    fn parse_suffix_round_trips_builders() {
        let subject = runtime_status(&key());
        assert_eq!(
            parse_version_suffix(&subject, "runtime.status"),
            Some(("alice", "todo", "v1"))
        );
    }

    #[test]
    fn parse_suffix_rejects_wrong_shape() {
        assert_eq!(parse_version_suffix("runtime.status.alice.todo", "runtime.status"), None);
        assert_eq!(parse_version_suffix("runtime.status.a.b.c.d", "runtime.status"), None);
        assert_eq!(parse_version_suffix("app.status.a.b.c", "runtime.status"), None);
    }
}
