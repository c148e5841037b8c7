// SPDX-License-Identifier: GPL-3.0-only

//! Plain filesystem operations on subvolume paths

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::unistd::{Gid, Uid};

use crate::Result;

/// Rename a subvolume, replacing an empty directory left at `target`
///
/// A snapshot contains an empty directory wherever the source had a nested
/// subvolume, so moving a nested subvolume back into place first has to drop
/// that placeholder.
pub fn rename_subvolume(source: &Path, target: &Path) -> Result<()> {
    if target.is_dir() {
        // Only succeeds for an empty directory; anything else makes the rename fail below
        let _ = fs::remove_dir(target);
    }

    tracing::info!("Renaming {} to {}", source.display(), target.display());
    fs::rename(source, target)?;
    Ok(())
}

/// Copy a file out of a snapshot, keeping its owner and permissions
pub fn restore_file(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_file(dest)?;
    }
    fs::copy(source, dest)?;

    let metadata = fs::metadata(source)?;
    if let Err(e) = nix::unistd::chown(
        dest,
        Some(Uid::from_raw(metadata.uid())),
        Some(Gid::from_raw(metadata.gid())),
    ) {
        tracing::warn!("Failed to reset ownership of restored file {}: {}", dest.display(), e);
    }
    fs::set_permissions(dest, metadata.permissions())?;

    Ok(())
}
