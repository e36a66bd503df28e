//! redb table definitions.

use redb::TableDefinition;

/// App rows keyed by `{user}/{app}`.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// Version rows keyed by `{user}/{app}:{version}`.
pub const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("app_versions");
