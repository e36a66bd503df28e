//! Version allocation and the build/commit sequence.
//!
//! A build runs in this order:
//!
//! 1. digest the source tree; if it matches the digest recorded for
//!    `latest_version` and that binary is still on disk, reuse it
//! 2. otherwise allocate `v<N+1>` over the releases already present
//! 3. compile into a temp file in `releases/` and rename it into place
//! 4. rewrite `version.json` and `current_version.txt`
//! 5. swap the `bin/app` symlink (the commit point)
//!
//! Any failure before step 5 leaves the previous symlink and older
//! binaries exactly as they were.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use appgrid_core::config::BuildConfig;
use appgrid_core::{AppKey, Version, VersionKey};
use regex::Regex;
use tracing::{info, warn};

use crate::digest::source_digest;
use crate::error::{WorkspaceError, WorkspaceResult};
use crate::layout::AppWorkspace;
use crate::metadata::VersionMetadata;
use crate::toolchain::{BuildOptions, BuildRequest, Platform, Toolchain};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub version: Version,
    pub binary_name: String,
    pub binary_path: PathBuf,
    /// `current_version` before this build.
    pub previous: Option<Version>,
    /// The source matched an already-built version; nothing was compiled.
    pub reused: bool,
}

pub struct Builder {
    toolchain: Arc<dyn Toolchain>,
    platform: Platform,
    binary_name_format: String,
}

impl Builder {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        platform: Platform,
        binary_name_format: impl Into<String>,
    ) -> WorkspaceResult<Self> {
        let binary_name_format = binary_name_format.into();
        if !binary_name_format.contains("{version}") {
            return Err(WorkspaceError::InvalidPath {
                path: binary_name_format,
                reason: "binary name format must contain {version}".to_string(),
            });
        }
        if binary_name_format.contains('/') {
            return Err(WorkspaceError::InvalidPath {
                path: binary_name_format,
                reason: "binary name format must not contain '/'".to_string(),
            });
        }
        Ok(Self {
            toolchain,
            platform,
            binary_name_format,
        })
    }

    pub fn from_config(config: &BuildConfig, toolchain: Arc<dyn Toolchain>) -> WorkspaceResult<Self> {
        Self::new(toolchain, config.platform.parse()?, config.binary_name_format.clone())
    }

    pub fn toolchain_name(&self) -> &str {
        self.toolchain.name()
    }

    pub fn binary_name(&self, key: &VersionKey) -> String {
        self.binary_name_format
            .replace("{user}", &key.user)
            .replace("{app}", &key.app)
            .replace("{version}", &key.version.to_string())
    }

    fn release_pattern(&self, key: &AppKey) -> WorkspaceResult<Regex> {
        let pattern = regex::escape(&self.binary_name_format)
            .replace(r"\{user\}", &regex::escape(&key.user))
            .replace(r"\{app\}", &regex::escape(&key.app))
            .replace(r"\{version\}", r"v([0-9]+)");
        Regex::new(&format!("^{pattern}$")).map_err(|e| WorkspaceError::InvalidPath {
            path: self.binary_name_format.clone(),
            reason: e.to_string(),
        })
    }

    /// Highest version with a binary in `releases/`.
    pub fn latest_release(&self, ws: &AppWorkspace, key: &AppKey) -> WorkspaceResult<Option<Version>> {
        let pattern = self.release_pattern(key)?;
        let latest = ws
            .release_names()?
            .iter()
            .filter_map(|name| pattern.captures(name))
            .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
            .filter_map(|n| Version::new(n).ok())
            .max();
        Ok(latest)
    }

    /// Build the app's source into the next version and commit it.
    pub async fn build(
        &self,
        ws: &AppWorkspace,
        key: &AppKey,
        source_dir: Option<&Path>,
        options: &BuildOptions,
    ) -> WorkspaceResult<BuildOutcome> {
        let source = source_dir.map(Path::to_path_buf).unwrap_or_else(|| ws.code_dir());
        if !source.is_dir() {
            return Err(WorkspaceError::SourceMissing(source));
        }
        ws.ensure_skeleton()?;

        let digest = source_digest(&source)?;
        let meta = VersionMetadata::read(ws)?;
        let previous = meta.as_ref().map(|m| m.current_version);

        if let Some(m) = &meta
            && m.source_digest.as_deref() == Some(digest.as_str())
        {
            let vkey = key.with_version(m.latest_version);
            let name = self.binary_name(&vkey);
            if ws.binary_path(&name).is_file() {
                info!(app = %key, version = %m.latest_version, "source unchanged, reusing built version");
                self.write_pointer(ws, &vkey, m.latest_version, Some(digest))?;
                return Ok(BuildOutcome {
                    version: m.latest_version,
                    binary_path: ws.binary_path(&name),
                    binary_name: name,
                    previous,
                    reused: true,
                });
            }
        }

        let on_disk = self.latest_release(ws, key)?;
        let recorded = meta.as_ref().map(|m| m.latest_version);
        let version = match on_disk.max(recorded) {
            Some(v) => v.next(),
            None => Version::FIRST,
        };
        let vkey = key.with_version(version);
        let name = self.binary_name(&vkey);
        let final_path = ws.binary_path(&name);
        let tmp_path = ws
            .releases_dir()
            .join(format!(".{name}.{}.partial", uuid::Uuid::new_v4().simple()));
        let tmp_abs = std::path::absolute(&tmp_path).map_err(WorkspaceError::io(&tmp_path))?;

        let platform = match &options.platform {
            Some(p) => p.parse()?,
            None => self.platform.clone(),
        };
        info!(app = %key, %version, toolchain = self.toolchain.name(), %platform, "building");
        let req = BuildRequest {
            key: &vkey,
            source_dir: &source,
            output: &tmp_abs,
            platform: &platform,
            options,
        };
        if let Err(e) = self.toolchain.build(&req).await {
            if tmp_abs.exists() {
                if let Err(rm) = fs::remove_file(&tmp_abs) {
                    warn!(path = %tmp_abs.display(), error = %rm, "failed to remove partial binary");
                }
            }
            return Err(e);
        }
        fs::rename(&tmp_abs, &final_path).map_err(WorkspaceError::io(&final_path))?;

        self.write_pointer(ws, &vkey, version, Some(digest))?;
        info!(app = %key, %version, binary = %name, "version committed");
        Ok(BuildOutcome {
            version,
            binary_name: name,
            binary_path: final_path,
            previous,
            reused: false,
        })
    }

    /// Point the workspace back at `to`, keeping `latest_version`.
    pub fn rollback(&self, ws: &AppWorkspace, to: &VersionKey) -> WorkspaceResult<()> {
        let meta = VersionMetadata::read(ws)?;
        let latest = meta.as_ref().map(|m| m.latest_version.max(to.version)).unwrap_or(to.version);
        let digest = meta.and_then(|m| m.source_digest);
        self.write_pointer(ws, to, latest, digest)?;
        warn!(app = %to.app_key(), version = %to.version, "workspace rolled back");
        Ok(())
    }

    fn write_pointer(
        &self,
        ws: &AppWorkspace,
        current: &VersionKey,
        latest: Version,
        digest: Option<String>,
    ) -> WorkspaceResult<()> {
        let name = self.binary_name(current);
        if !ws.binary_path(&name).is_file() {
            return Err(WorkspaceError::InvalidPath {
                path: name,
                reason: "release binary does not exist".to_string(),
            });
        }
        VersionMetadata {
            current_version: current.version,
            latest_version: latest.max(current.version),
            source_digest: digest,
        }
        .write(ws)?;
        repoint_symlink(ws, &name)
    }
}

/// Atomically swap `bin/app` to `releases/<binary_name>`.
fn repoint_symlink(ws: &AppWorkspace, binary_name: &str) -> WorkspaceResult<()> {
    let link = ws.symlink_path();
    let tmp = ws
        .bin_dir()
        .join(format!(".app.{}.tmp", uuid::Uuid::new_v4().simple()));
    let target = Path::new("releases").join(binary_name);
    std::os::unix::fs::symlink(&target, &tmp).map_err(WorkspaceError::io(&tmp))?;
    fs::rename(&tmp, &link).map_err(WorkspaceError::io(&link))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Workspace;
    use crate::metadata::read_current_version_txt;
    use crate::toolchain::StubToolchain;

    struct Fixture {
        _dir: tempfile::TempDir,
        ws: AppWorkspace,
        key: AppKey,
        stub: Arc<StubToolchain>,
        builder: Builder,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let key = AppKey::new("alice", "todo").unwrap();
        let ws = Workspace::new(dir.path()).app(&key);
        ws.ensure_skeleton().unwrap();
        fs::write(ws.code_dir().join("main.go"), "package main").unwrap();
        let stub = Arc::new(StubToolchain::new());
        let builder = Builder::new(
            stub.clone(),
            "linux/amd64".parse().unwrap(),
            "{user}_{app}_{version}",
        )
        .unwrap();
        Fixture {
            _dir: dir,
            ws,
            key,
            stub,
            builder,
        }
    }

    fn v(n: u32) -> Version {
        Version::new(n).unwrap()
    }

    #[tokio::test]
    async fn first_build_commits_v1() {
        let f = fixture();
        let out = f.builder.build(&f.ws, &f.key, None, &BuildOptions::default()).await.unwrap();

        assert_eq!(out.version, v(1));
        assert_eq!(out.previous, None);
        assert!(!out.reused);
        assert_eq!(f.ws.release_names().unwrap(), vec!["alice_todo_v1"]);
        assert_eq!(f.ws.symlink_target().unwrap().as_deref(), Some("alice_todo_v1"));
        let meta = VersionMetadata::read(&f.ws).unwrap().unwrap();
        assert_eq!(meta.current_version, v(1));
        assert_eq!(meta.latest_version, v(1));
        assert_eq!(read_current_version_txt(&f.ws), Some(v(1)));
    }

    #[tokio::test]
    async fn versions_increase_with_changed_source() {
        let f = fixture();
        let opts = BuildOptions::default();
        f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap();
        fs::write(f.ws.code_dir().join("main.go"), "package main // 2").unwrap();
        let second = f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap();

        assert_eq!(second.version, v(2));
        assert_eq!(second.previous, Some(v(1)));
        assert_eq!(f.ws.symlink_target().unwrap().as_deref(), Some("alice_todo_v2"));
        assert_eq!(f.ws.release_names().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unchanged_source_reuses_latest() {
        let f = fixture();
        let opts = BuildOptions::default();
        f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap();
        let retry = f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap();

        assert!(retry.reused);
        assert_eq!(retry.version, v(1));
        assert_eq!(f.stub.builds(), 1);
        assert_eq!(f.ws.release_names().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_build_leaves_current_untouched() {
        let f = fixture();
        let opts = BuildOptions::default();
        f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap();

        fs::write(f.ws.code_dir().join("main.go"), "broken").unwrap();
        f.stub.set_failing(true);
        let err = f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Build { .. }));

        assert_eq!(f.ws.symlink_target().unwrap().as_deref(), Some("alice_todo_v1"));
        assert_eq!(f.ws.release_names().unwrap(), vec!["alice_todo_v1"]);
        assert_eq!(
            VersionMetadata::read(&f.ws).unwrap().unwrap().current_version,
            v(1)
        );
    }

    #[tokio::test]
    async fn allocation_scans_existing_releases() {
        let f = fixture();
        fs::write(f.ws.binary_path("alice_todo_v9"), "old").unwrap();
        fs::write(f.ws.binary_path("alice_todo_v10"), "old").unwrap();
        fs::write(f.ws.binary_path("bob_todo_v99"), "other").unwrap();
        assert_eq!(f.builder.latest_release(&f.ws, &f.key).unwrap(), Some(v(10)));

        let out = f.builder.build(&f.ws, &f.key, None, &BuildOptions::default()).await.unwrap();
        assert_eq!(out.version, v(11));
    }

    #[tokio::test]
    async fn rollback_keeps_latest() {
        let f = fixture();
        let opts = BuildOptions::default();
        f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap();
        fs::write(f.ws.code_dir().join("main.go"), "package main // 2").unwrap();
        f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap();

        f.builder.rollback(&f.ws, &f.key.with_version(v(1))).unwrap();
        let meta = VersionMetadata::read(&f.ws).unwrap().unwrap();
        assert_eq!(meta.current_version, v(1));
        assert_eq!(meta.latest_version, v(2));
        assert_eq!(f.ws.symlink_target().unwrap().as_deref(), Some("alice_todo_v1"));

        let retry = f.builder.build(&f.ws, &f.key, None, &opts).await.unwrap();
        assert!(retry.reused);
        assert_eq!(retry.version, v(2));
        assert_eq!(retry.previous, Some(v(1)));
    }

    #[tokio::test]
    async fn missing_source_dir() {
        let f = fixture();
        let err = f
            .builder
            .build(&f.ws, &f.key, Some(Path::new("/definitely/not/here")), &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::SourceMissing(_)));
    }

    #[test]
    fn format_must_contain_version() {
        let stub = Arc::new(StubToolchain::new());
        assert!(Builder::new(stub, "linux/amd64".parse().unwrap(), "{user}_{app}").is_err());
    }
}
