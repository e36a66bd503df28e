//! Compiler toolchains.
//!
//! [`GoToolchain`] cross-compiles with `go build`, injecting the app's
//! identity as link-time constants. [`StubToolchain`] writes a placeholder
//! executable instead; it is used by tests and by development setups
//! without a Go installation.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use appgrid_core::VersionKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{WorkspaceError, WorkspaceResult};

/// Cross-compile target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl FromStr for Platform {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('/') => {
                Ok(Self {
                    os: os.to_string(),
                    arch: arch.to_string(),
                })
            }
            _ => Err(WorkspaceError::Platform(s.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Caller-supplied build knobs (the `build_opts` of an update request).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Overrides the configured `<os>/<arch>`.
    pub platform: Option<String>,
    pub tags: Vec<String>,
    /// Extra `-ldflags` entries appended after the identity constants.
    pub ldflags: Vec<String>,
    pub env: HashMap<String, String>,
}

pub struct BuildRequest<'a> {
    pub key: &'a VersionKey,
    pub source_dir: &'a Path,
    pub output: &'a Path,
    pub platform: &'a Platform,
    pub options: &'a BuildOptions,
}

#[async_trait]
pub trait Toolchain: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Compile `source_dir` into `output`.
    async fn build(&self, req: &BuildRequest<'_>) -> WorkspaceResult<()>;
}

pub struct GoToolchain {
    binary: PathBuf,
}

impl Default for GoToolchain {
    fn default() -> Self {
        Self::new("go")
    }
}

impl GoToolchain {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(req: &BuildRequest<'_>) -> Vec<String> {
        let mut ldflags = vec![
            format!("-X main.AppUser={}", req.key.user),
            format!("-X main.AppName={}", req.key.app),
            format!("-X main.AppVersion={}", req.key.version),
        ];
        ldflags.extend(req.options.ldflags.iter().cloned());

        let mut args = vec![
            "build".to_string(),
            "-trimpath".to_string(),
            "-o".to_string(),
            req.output.display().to_string(),
            "-ldflags".to_string(),
            ldflags.join(" "),
        ];
        if !req.options.tags.is_empty() {
            args.push("-tags".to_string());
            args.push(req.options.tags.join(","));
        }
        args.push(".".to_string());
        args
    }
}

#[async_trait]
impl Toolchain for GoToolchain {
    fn name(&self) -> &str {
        "go"
    }

    async fn build(&self, req: &BuildRequest<'_>) -> WorkspaceResult<()> {
        let args = Self::args(req);
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .current_dir(req.source_dir)
            .env("GOOS", &req.platform.os)
            .env("GOARCH", &req.platform.arch)
            .env("CGO_ENABLED", "0")
            .envs(&req.options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(key = %req.key, ?args, "running go build");

        let output = cmd.output().await.map_err(|e| {
            WorkspaceError::Toolchain(format!("failed to run {}: {e}", self.binary.display()))
        })?;
        if !output.status.success() {
            return Err(WorkspaceError::Build {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(key = %req.key, platform = %req.platform, "go build succeeded");
        Ok(())
    }
}

/// Writes a small shell script in place of a real binary.
#[derive(Default)]
pub struct StubToolchain {
    failing: AtomicBool,
    builds: AtomicUsize,
}

impl StubToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent builds fail with a compiler-style error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of build attempts so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Toolchain for StubToolchain {
    fn name(&self) -> &str {
        "stub"
    }

    async fn build(&self, req: &BuildRequest<'_>) -> WorkspaceResult<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkspaceError::Build {
                code: Some(2),
                stderr: "./main.go:1:1: stub compile error".to_string(),
            });
        }
        let script = format!(
            "#!/bin/sh\n# appgrid stub build of {} for {}\nexec sleep infinity\n",
            req.key, req.platform
        );
        fs::write(req.output, script).map_err(WorkspaceError::io(req.output))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(req.output, fs::Permissions::from_mode(0o755))
                .map_err(WorkspaceError::io(req.output))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appgrid_core::Version;

    #[test]
    fn platform_parsing() {
        let p: Platform = "linux/arm64".parse().unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.arch, "arm64");
        assert!("linux".parse::<Platform>().is_err());
        assert!("/amd64".parse::<Platform>().is_err());
        assert!("a/b/c".parse::<Platform>().is_err());
    }

    #[test]
    fn go_args_inject_identity() {
        let key = VersionKey::new("alice", "todo", Version::new(3).unwrap()).unwrap();
        let platform: Platform = "linux/amd64".parse().unwrap();
        let options = BuildOptions {
            tags: vec!["netgo".to_string()],
            ..Default::default()
        };
        let req = BuildRequest {
            key: &key,
            source_dir: Path::new("/src"),
            output: Path::new("/out/alice_todo_v3"),
            platform: &platform,
            options: &options,
        };
        let args = GoToolchain::args(&req);
        assert_eq!(args[0], "build");
        assert!(args.contains(&"/out/alice_todo_v3".to_string()));
        let ldflags = &args[args.iter().position(|a| a == "-ldflags").unwrap() + 1];
        assert!(ldflags.contains("-X main.AppUser=alice"));
        assert!(ldflags.contains("-X main.AppVersion=v3"));
        assert!(args.contains(&"netgo".to_string()));
        assert_eq!(args.last().unwrap(), ".");
    }

    #[tokio::test]
    async fn stub_writes_executable_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let key = VersionKey::new("alice", "todo", Version::FIRST).unwrap();
        let platform: Platform = "linux/amd64".parse().unwrap();
        let options = BuildOptions::default();
        let output = dir.path().join("bin");
        let stub = StubToolchain::new();
        let req = BuildRequest {
            key: &key,
            source_dir: dir.path(),
            output: &output,
            platform: &platform,
            options: &options,
        };
        stub.build(&req).await.unwrap();
        assert!(output.is_file());
        assert_eq!(stub.builds(), 1);

        stub.set_failing(true);
        assert!(matches!(stub.build(&req).await, Err(WorkspaceError::Build { .. })));
        assert_eq!(stub.builds(), 2);
    }
}
