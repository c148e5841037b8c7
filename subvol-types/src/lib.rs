// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for btrfs subvolume management
//!
//! These models are shared by the whole stack:
//!
//! - **subvol-sys**: parses tool output into these types
//! - **subvol-btrfs**: the registry, snapshot catalog and restore engine own them
//! - **subvol-helper**: serializes them as JSON for callers

pub mod filesystem;
pub mod restore;
pub mod snapper;
pub mod subvolume;

pub use filesystem::{Filesystem, FilesystemUsage};
pub use restore::{RestoreFailure, RestoreResult};
pub use snapper::{SnapperSnapshot, SnapperSubvolume};
pub use subvolume::{BTRFS_ROOT_ID, Subvolume, SubvolumeMap};
