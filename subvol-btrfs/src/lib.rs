// SPDX-License-Identifier: GPL-3.0-only

//! Btrfs subvolume inventory and snapshot restore
//!
//! [`VolumeRegistry`] loads filesystems and their subvolumes through a
//! [`SubvolumeBackend`], [`SnapshotCatalog`] adds what snapper knows about
//! them, and [`RestoreEngine`] swaps a subvolume with one of its snapshots.

pub mod backend;
pub mod error;
pub mod index;
pub mod maintenance;
pub mod registry;
pub mod resolver;
pub mod restore;
pub mod snapper;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendKind, CommandBackend, NativeBackend, SubvolumeBackend, SubvolumeInfo};
pub use error::{BtrfsError, Result};
pub use index::SubvolumeIndex;
pub use maintenance::MaintenanceTask;
pub use registry::VolumeRegistry;
pub use resolver::{SnapshotTargetResolver, TargetMapping, find_snapshot_subvolume, is_snapper};
pub use restore::{RestoreEngine, RestoreState, backup_name};
pub use snapper::{SnapperConfig, SnapshotCatalog};
