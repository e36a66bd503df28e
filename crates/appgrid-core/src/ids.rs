//! Application identities and the `v<N>` version scheme.
//!
//! User and app names travel through bus subjects (`.`-separated),
//! container names (`<user>-<app>`), and filesystem paths, so they are
//! restricted to `[A-Za-z0-9_-]` at construction time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

const MAX_IDENTIFIER_LEN: usize = 64;

/// Validate a user or app identifier.
pub fn validate_identifier(field: &'static str, value: &str) -> CoreResult<()> {
    if value.is_empty() {
        return Err(CoreError::Validation {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(CoreError::Validation {
            field,
            reason: format!("longer than {MAX_IDENTIFIER_LEN} characters"),
        });
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(CoreError::Validation {
            field,
            reason: format!("illegal character {bad:?}"),
        });
    }
    Ok(())
}

/// Identity of a tenant application: the `(user, app)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppKey {
    pub user: String,
    pub app: String,
}

impl AppKey {
    /// Build a validated key.
    pub fn new(user: impl Into<String>, app: impl Into<String>) -> CoreResult<Self> {
        let user = user.into();
        let app = app.into();
        validate_identifier("user", &user)?;
        validate_identifier("app", &app)?;
        Ok(Self { user, app })
    }

    /// Container name for this app: `<user>-<app>`.
    pub fn container_name(&self) -> String {
        format!("{}-{}", self.user, self.app)
    }

    /// Attach a version.
    pub fn with_version(&self, version: Version) -> VersionKey {
        VersionKey {
            user: self.user.clone(),
            app: self.app.clone(),
            version,
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user, self.app)
    }
}

/// Identity of one compiled artifact of an app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub user: String,
    pub app: String,
    pub version: Version,
}

impl VersionKey {
    pub fn new(user: impl Into<String>, app: impl Into<String>, version: Version) -> CoreResult<Self> {
        let key = AppKey::new(user, app)?;
        Ok(key.with_version(version))
    }

    pub fn app_key(&self) -> AppKey {
        AppKey {
            user: self.user.clone(),
            app: self.app.clone(),
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user, self.app, self.version)
    }
}

/// A monotonically increasing version identifier, printed as `v<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(u32);

impl Version {
    /// The first version of any app.
    pub const FIRST: Version = Version(1);

    pub fn new(n: u32) -> CoreResult<Self> {
        if n == 0 {
            return Err(CoreError::InvalidVersion("v0".to_string()));
        }
        Ok(Self(n))
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('v')
            .ok_or_else(|| CoreError::InvalidVersion(s.to_string()))?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoreError::InvalidVersion(s.to_string()));
        }
        let n: u32 = digits
            .parse()
            .map_err(|_| CoreError::InvalidVersion(s.to_string()))?;
        Version::new(n).map_err(|_| CoreError::InvalidVersion(s.to_string()))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
