// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;
use std::sync::Arc;

use btrfsutil::qgroup::QgroupInherit;
use btrfsutil::subvolume::{DeleteFlags, SnapshotFlags, Subvolume as BtrfsSubvol, SubvolumeIterator};
use chrono::DateTime;
use subvol_sys::CommandRunner;
use subvol_types::Subvolume;
use uuid::Uuid;

use super::{CommandBackend, SubvolumeBackend, SubvolumeInfo};
use crate::error::{BtrfsError, Result};

/// Backend calling libbtrfsutil directly
///
/// The subvolume iterator fails with "Could not statfs" when started through
/// pkexec, so listings fall back to the `btrfs` tool.
pub struct NativeBackend {
    fallback: CommandBackend,
}

impl NativeBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            fallback: CommandBackend::new(runner),
        }
    }

    fn open(path: &Path) -> Result<BtrfsSubvol> {
        BtrfsSubvol::try_from(path)
            .map_err(|e| BtrfsError::SubvolumeNotFound(format!("{}: {}", path.display(), e)))
    }

    fn iterate(mountpoint: &Path, filesystem_uuid: &str) -> Result<Vec<Subvolume>> {
        let iteration_failed = |e: btrfsutil::error::LibError| {
            BtrfsError::OperationFailed(format!(
                "Failed to iterate subvolumes of {}: {}",
                mountpoint.display(),
                e
            ))
        };

        let root = Self::open(mountpoint)?;
        let iter = SubvolumeIterator::try_from(&root).map_err(iteration_failed)?;

        let mut subvolumes = Vec::new();
        for item in iter {
            // A partial listing would look like deleted subvolumes
            let subvol = item.map_err(iteration_failed)?;
            let info = subvol.info().map_err(iteration_failed)?;

            let path = subvol.path();
            let name = path
                .strip_prefix(mountpoint)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();

            subvolumes.push(Subvolume {
                id: info.id,
                parent_id: info.parent_id.unwrap_or(0),
                name,
                filesystem_uuid: filesystem_uuid.to_string(),
                uuid: parse_uuid(&info.uuid.to_string()),
                parent_uuid: info.parent_uuid.and_then(|u| parse_uuid(&u.to_string())),
                received_uuid: info.received_uuid.and_then(|u| parse_uuid(&u.to_string())),
                generation: info.generation,
                flags: info.flags,
                created_at: DateTime::from_timestamp(info.otime.timestamp(), 0),
                size: None,
                exclusive: None,
            });
        }

        Ok(subvolumes)
    }
}

impl SubvolumeBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "libbtrfsutil"
    }

    fn list(&self, mountpoint: &Path, filesystem_uuid: &str) -> Result<Vec<Subvolume>> {
        match Self::iterate(mountpoint, filesystem_uuid) {
            Ok(subvolumes) => {
                if subvolumes.is_empty() {
                    tracing::debug!("No subvolumes below {}", mountpoint.display());
                }
                Ok(subvolumes)
            }
            Err(e) => {
                tracing::warn!("{}, listing with {} instead", e, self.fallback.name());
                self.fallback.list(mountpoint, filesystem_uuid)
            }
        }
    }

    fn info(&self, path: &Path) -> Result<SubvolumeInfo> {
        let info = Self::open(path)?.info().map_err(|e| {
            BtrfsError::OperationFailed(format!(
                "Failed to get subvolume info for {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(SubvolumeInfo {
            id: info.id,
            parent_id: info.parent_id.unwrap_or(0),
        })
    }

    fn create_snapshot(&self, source: &Path, dest: &Path, readonly: bool) -> Result<()> {
        let source_subvol = Self::open(source)?;

        let mut flags = SnapshotFlags::empty();
        if readonly {
            flags |= SnapshotFlags::READ_ONLY;
        }

        source_subvol
            .snapshot(dest, flags, None::<QgroupInherit>)
            .map_err(|e| BtrfsError::SnapshotCreateFailure {
                source_path: source.to_path_buf(),
                target_path: dest.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        Self::open(path)?
            .delete(DeleteFlags::empty())
            .map_err(|e| {
                BtrfsError::OperationFailed(format!(
                    "Failed to delete subvolume at {}: {}",
                    path.display(),
                    e
                ))
            })?;

        Ok(())
    }
}

/// libbtrfsutil reports unset UUIDs as all zeros
fn parse_uuid(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value).ok().filter(|uuid| !uuid.is_nil())
}
