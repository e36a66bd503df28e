//! On-disk layout of app workspaces.

use std::fs;
use std::path::{Path, PathBuf};

use appgrid_core::AppKey;
use tracing::{debug, info};

use crate::error::{WorkspaceError, WorkspaceResult};

/// Root of all app workspaces.
#[derive(Debug, Clone)]
pub struct Workspace {
    base: PathBuf,
}

impl Workspace {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn app(&self, key: &AppKey) -> AppWorkspace {
        AppWorkspace {
            root: self.base.join(&key.user).join(&key.app),
        }
    }
}

/// The workspace of one app, rooted at `<base>/<user>/<app>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppWorkspace {
    root: PathBuf,
}

impl AppWorkspace {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn code_dir(&self) -> PathBuf {
        self.root.join("code")
    }

    pub fn workplace_dir(&self) -> PathBuf {
        self.root.join("workplace")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.workplace_dir().join("bin")
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.bin_dir().join("releases")
    }

    /// `workplace/bin/app`, the symlink the container executes.
    pub fn symlink_path(&self) -> PathBuf {
        self.bin_dir().join("app")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.workplace_dir().join("metadata")
    }

    pub fn version_json_path(&self) -> PathBuf {
        self.metadata_dir().join("version.json")
    }

    pub fn current_version_txt_path(&self) -> PathBuf {
        self.metadata_dir().join("current_version.txt")
    }

    pub fn service_tree_path(&self) -> PathBuf {
        self.code_dir().join("service_tree.json")
    }

    pub fn binary_path(&self, binary_name: &str) -> PathBuf {
        self.releases_dir().join(binary_name)
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Create the directory skeleton. Existing directories are left alone.
    pub fn ensure_skeleton(&self) -> WorkspaceResult<()> {
        for dir in [self.code_dir(), self.releases_dir(), self.metadata_dir()] {
            fs::create_dir_all(&dir).map_err(WorkspaceError::io(&dir))?;
        }
        debug!(root = %self.root.display(), "workspace skeleton ready");
        Ok(())
    }

    /// Remove the whole workspace. Returns `false` if it was already gone.
    pub fn remove(&self) -> WorkspaceResult<bool> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                info!(root = %self.root.display(), "workspace removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(WorkspaceError::Io {
                path: self.root.clone(),
                source: e,
            }),
        }
    }

    /// File name the `bin/app` symlink points at, if it exists.
    pub fn symlink_target(&self) -> WorkspaceResult<Option<String>> {
        let link = self.symlink_path();
        match fs::read_link(&link) {
            Ok(target) => Ok(target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WorkspaceError::Io {
                path: link,
                source: e,
            }),
        }
    }

    /// File names currently in `releases/`.
    pub fn release_names(&self) -> WorkspaceResult<Vec<String>> {
        let dir = self.releases_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkspaceError::Io { path: dir, source: e }),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(WorkspaceError::io(&dir))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
