//! appgrid-workspace — per-app directory layout and the builder.
//!
//! Every app owns `<base>/<user>/<app>/`:
//!
//! ```text
//! code/                                   source tree
//! workplace/bin/releases/<user>_<app>_vN  compiled binaries
//! workplace/bin/app                       symlink -> releases/<current>
//! workplace/metadata/version.json         {"current_version", "latest_version"}
//! workplace/metadata/current_version.txt  "vK"
//! ```
//!
//! The [`Builder`] advances a version by writing the binary, rewriting
//! the metadata, and finally repointing the symlink. The symlink rename is
//! the commit point.

pub mod builder;
pub mod digest;
pub mod error;
pub mod files;
pub mod layout;
pub mod metadata;
pub mod toolchain;

pub use builder::{BuildOutcome, Builder};
pub use error::{WorkspaceError, WorkspaceResult};
pub use files::{FileContent, FileWrite};
pub use layout::{AppWorkspace, Workspace};
pub use metadata::VersionMetadata;
pub use toolchain::{BuildOptions, BuildRequest, GoToolchain, Platform, StubToolchain, Toolchain};
