// SPDX-License-Identifier: GPL-3.0-only

//! Interchangeable ways of talking to btrfs
//!
//! [`CommandBackend`] shells out to the `btrfs` tool, [`NativeBackend`] goes
//! through libbtrfsutil. One of them is picked when the registry is built.

mod command;
mod native;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use subvol_sys::CommandRunner;
use subvol_types::Subvolume;

use crate::error::{BtrfsError, Result};

pub use command::CommandBackend;
pub use native::NativeBackend;

/// Id and parent of a subvolume looked up by path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubvolumeInfo {
    pub id: u64,
    pub parent_id: u64,
}

/// Subvolume operations needed by the registry and the restore engine
pub trait SubvolumeBackend: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    /// Every subvolume below the root subvolume mounted at `mountpoint`
    ///
    /// Names are relative to `mountpoint`. Sizes are left empty; they come
    /// from quota groups.
    fn list(&self, mountpoint: &Path, filesystem_uuid: &str) -> Result<Vec<Subvolume>>;

    /// Id and parent of the subvolume at `path`
    fn info(&self, path: &Path) -> Result<SubvolumeInfo>;

    fn create_snapshot(&self, source: &Path, dest: &Path, readonly: bool) -> Result<()>;

    fn delete(&self, path: &Path) -> Result<()>;

    /// Move a subvolume; renames are the only step assumed to be atomic
    fn rename(&self, source: &Path, target: &Path) -> Result<()> {
        subvol_sys::rename_subvolume(source, target).map_err(|e| BtrfsError::RenameFailure {
            source_path: source.to_path_buf(),
            target_path: target.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Which [`SubvolumeBackend`] to construct
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Parse the output of the `btrfs` tool
    Command,
    /// Call libbtrfsutil, listing through the `btrfs` tool when its iterator fails
    #[default]
    Native,
}

/// Build the backend selected by `kind`
pub fn build(kind: BackendKind, runner: Arc<dyn CommandRunner>) -> Box<dyn SubvolumeBackend> {
    match kind {
        BackendKind::Command => Box::new(CommandBackend::new(runner)),
        BackendKind::Native => Box::new(NativeBackend::new(runner)),
    }
}
