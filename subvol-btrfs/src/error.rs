// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use subvol_sys::SysError;
use thiserror::Error;

/// Error types for BTRFS operations
#[derive(Error, Debug)]
pub enum BtrfsError {
    #[error("Filesystem not found: {0}")]
    FilesystemNotFound(String),

    #[error("Subvolume not found: {0}")]
    SubvolumeNotFound(String),

    #[error("Failed to mount the root subvolume of {uuid}: {reason}")]
    MountFailure { uuid: String, reason: String },

    #[error("Parent chain of subvolume {0} never reaches the filesystem root")]
    CorruptHierarchy(u64),

    #[error("Not a snapper snapshot: {0}")]
    NotASnapshot(String),

    #[error("Failed to rename {} to {}: {reason}", source_path.display(), target_path.display())]
    RenameFailure {
        source_path: PathBuf,
        target_path: PathBuf,
        reason: String,
    },

    #[error("Failed to snapshot {} to {}: {reason}", source_path.display(), target_path.display())]
    SnapshotCreateFailure {
        source_path: PathBuf,
        target_path: PathBuf,
        reason: String,
    },

    #[error("BTRFS operation failed: {0}")]
    OperationFailed(String),

    #[error("Snapper failed: {0}")]
    Snapper(String),

    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for BTRFS operations
pub type Result<T> = std::result::Result<T, BtrfsError>;
