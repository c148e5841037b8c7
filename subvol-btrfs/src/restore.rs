// SPDX-License-Identifier: GPL-3.0-only

//! Replacing a live subvolume with one of its snapshots
//!
//! A restore moves the target aside as a backup, snapshots the source into
//! the target's place and moves nested subvolumes from the backup into the
//! new target. Only the first step is rolled back automatically: once the
//! new target exists, undoing it would throw away the restored data.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use subvol_types::{RestoreFailure, RestoreResult};

use crate::backend::SubvolumeBackend;
use crate::index::SubvolumeIndex;

const BACKUP_PREFIX: &str = "restore_backup_";

/// Progress of a restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestoreState {
    #[default]
    Idle,
    /// The target has been renamed to the backup name
    BackedUp,
    /// A writable snapshot of the source sits at the target name
    Snapshotted,
    /// Nested subvolumes were moved into the new target
    ChildrenMigrated,
}

/// Name the target is moved to while it is replaced
///
/// Slashes in nested target names are flattened so the backup always lands
/// next to the root subvolume's other entries.
pub fn backup_name(target_name: &str, now: DateTime<Local>) -> String {
    format!(
        "{}{}_{}",
        BACKUP_PREFIX,
        target_name.replace('/', "_"),
        now.format("%Y_%m_%d_%H_%M_%S_%3f")
    )
}

pub struct RestoreEngine<'a> {
    backend: &'a dyn SubvolumeBackend,
    index: &'a SubvolumeIndex<'a>,
    mountpoint: &'a Path,
    state: RestoreState,
}

impl<'a> RestoreEngine<'a> {
    /// `mountpoint` is where the root subvolume of the indexed filesystem is mounted
    pub fn new(
        backend: &'a dyn SubvolumeBackend,
        index: &'a SubvolumeIndex<'a>,
        mountpoint: &'a Path,
    ) -> Self {
        Self {
            backend,
            index,
            mountpoint,
            state: RestoreState::Idle,
        }
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    /// Replace subvolume `target_id` with a writable snapshot of `source_id`
    pub fn restore(&mut self, source_id: u64, target_id: u64) -> RestoreResult {
        self.restore_at(source_id, target_id, Local::now())
    }

    /// [`Self::restore`] with the time used for the backup name
    pub fn restore_at(
        &mut self,
        source_id: u64,
        target_id: u64,
        now: DateTime<Local>,
    ) -> RestoreResult {
        self.state = RestoreState::Idle;

        let (Some(source_name), Some(target_name)) = (
            self.index.subvol_name(source_id),
            self.index.subvol_name(target_id),
        ) else {
            let message = format!(
                "Failed to find subvolume names for source {} and target {}",
                source_id, target_id
            );
            tracing::error!("{}", message);
            return RestoreResult::failed(RestoreFailure::NotFound, "", message);
        };

        // Collected before anything moves, the index describes the old tree
        let children = self.index.nested_children(target_id);
        let source_inside_target = self.index.descendants(target_id).contains(&source_id);
        let backup = backup_name(target_name, now);

        tracing::info!(
            "Restoring '{}' from '{}', backing up to '{}'",
            target_name,
            source_name,
            backup
        );

        let target_path = self.path(target_name);
        let backup_path = self.path(&backup);

        if let Err(e) = self.backend.rename(&target_path, &backup_path) {
            let message = format!("Failed to make a backup of {}: {}", target_name, e);
            tracing::error!("{}", message);
            return RestoreResult::failed(RestoreFailure::Rename, "", message);
        }
        self.state = RestoreState::BackedUp;

        let source_path = if source_inside_target {
            self.path(&relocate(source_name, target_name, &backup))
        } else {
            self.path(source_name)
        };

        let snapshot_error = match self.backend.create_snapshot(&source_path, &target_path, false) {
            Ok(()) if self.backend.exists(&target_path) => None,
            Ok(()) => Some(format!("{} does not exist after the snapshot", target_name)),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = snapshot_error {
            return self.roll_back(target_name, &backup, &reason);
        }
        self.state = RestoreState::Snapshotted;

        for child in &children {
            let relative = &child[target_name.len()..];

            let from = self.path(&format!("{}{}", backup, relative));
            let to = self.path(&format!("{}{}", target_name, relative));
            if let Err(e) = self.backend.rename(&from, &to) {
                let message = format!(
                    "Failed to migrate the nested subvolume {} from {}: {}. \
                     The restore completed but the remaining nested subvolumes \
                     must be moved out of {} manually",
                    child, backup, e, backup
                );
                tracing::error!("{}", message);
                return RestoreResult::failed(RestoreFailure::ChildMigration, backup, message);
            }
            tracing::info!("Moved nested subvolume {}", child);
        }
        self.state = RestoreState::ChildrenMigrated;

        tracing::info!("Restored '{}', previous contents kept in '{}'", target_name, backup);
        RestoreResult::succeeded(backup)
    }

    fn roll_back(&mut self, target_name: &str, backup: &str, reason: &str) -> RestoreResult {
        tracing::error!("Snapshot into {} failed: {}", target_name, reason);

        match self.backend.rename(&self.path(backup), &self.path(target_name)) {
            Ok(()) => {
                self.state = RestoreState::Idle;
                RestoreResult::failed(
                    RestoreFailure::SnapshotCreate,
                    "",
                    format!(
                        "Failed to restore snapshot into {}: {}. The original subvolume was put back",
                        target_name, reason
                    ),
                )
            }
            Err(e) => {
                let message = format!(
                    "Failed to restore snapshot into {}: {}. Moving the backup back also \
                     failed ({}), the original contents are in {}",
                    target_name, reason, e, backup
                );
                tracing::error!("{}", message);
                RestoreResult::failed(RestoreFailure::SnapshotCreate, backup, message)
            }
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.mountpoint.join(name)
    }
}

/// Where `source` lives once `target` has been renamed to `backup`
fn relocate(source: &str, target: &str, backup: &str) -> String {
    match source.strip_prefix(target) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("{}{}", backup, rest),
        _ => source.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use chrono::TimeZone;
    use subvol_types::{Subvolume, SubvolumeMap};

    const MNT: &str = "/mnt/fs";

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).single().expect("valid time")
    }

    fn subvolumes(with_var: bool) -> SubvolumeMap {
        let mut subvols = vec![
            Subvolume::new(256, 5, "@"),
            Subvolume::new(260, 256, "@/.snapshots"),
            Subvolume::new(300, 260, "@/.snapshots/5/snapshot"),
        ];
        if with_var {
            subvols.push(Subvolume::new(258, 256, "@/var"));
        }
        subvols.into_iter().map(|subvol| (subvol.id, subvol)).collect()
    }

    fn backend_for(map: &SubvolumeMap) -> FakeBackend {
        let backend = FakeBackend::new(MNT);
        for subvol in map.values() {
            backend.add(&subvol.name, subvol.id, subvol.parent_id);
        }
        backend
    }

    #[test]
    fn backup_names_carry_the_timestamp() {
        assert_eq!(backup_name("@", now()), "restore_backup_@_2024_03_01_12_30_45_000");
        assert_eq!(
            backup_name("@/home", now()),
            "restore_backup_@_home_2024_03_01_12_30_45_000"
        );
    }

    #[test]
    fn relocates_sources_below_the_target() {
        assert_eq!(relocate("@/.snapshots/5/snapshot", "@", "bk"), "bk/.snapshots/5/snapshot");
        assert_eq!(relocate("@home/.snapshots/1/snapshot", "@", "bk"), "@home/.snapshots/1/snapshot");
        assert_eq!(relocate("@", "@", "bk"), "bk");
    }

    #[test]
    fn restore_swaps_target_with_snapshot() {
        let map = subvolumes(false);
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);
        let snapshot_contents = backend.id_of("@/.snapshots/5/snapshot");

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(300, 256, now());

        assert!(result.success, "{}", result.failure_message);
        assert_eq!(result.backup_name, "restore_backup_@_2024_03_01_12_30_45_000");
        assert_eq!(engine.state(), RestoreState::ChildrenMigrated);

        assert_eq!(backend.id_of(&result.backup_name), Some(256));
        assert_eq!(backend.snapshot_source_of("@"), snapshot_contents);
        // The snapshot container followed the restore into the new target
        assert!(backend.contains("@/.snapshots/5/snapshot"));
        assert!(!backend.contains(&format!("{}/.snapshots", result.backup_name)));
    }

    #[test]
    fn nested_subvolumes_move_into_the_new_target() {
        let map = subvolumes(true);
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(300, 256, now());

        assert!(result.success);
        assert_eq!(backend.id_of("@/var"), Some(258));
        assert!(!backend.contains(&format!("{}/var", result.backup_name)));
    }

    #[test]
    fn failed_child_migration_keeps_the_restore() {
        let map = subvolumes(true);
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);
        let backup = backup_name("@", now());
        backend.fail_rename_from(&format!("{}/var", backup));

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(300, 256, now());

        assert!(!result.success);
        assert_eq!(result.failure, Some(RestoreFailure::ChildMigration));
        assert_eq!(result.backup_name, backup);
        assert!(result.failure_message.contains(&backup));
        assert_eq!(engine.state(), RestoreState::Snapshotted);
        assert!(backend.contains(&format!("{}/var", backup)));
        assert!(backend.contains("@"));
    }

    #[test]
    fn failed_backup_rename_changes_nothing() {
        let map = subvolumes(true);
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);
        backend.fail_rename_from("@");
        let before = backend.snapshot();

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(300, 256, now());

        assert!(!result.success);
        assert_eq!(result.failure, Some(RestoreFailure::Rename));
        assert!(result.backup_name.is_empty());
        assert_eq!(engine.state(), RestoreState::Idle);
        assert_eq!(backend.snapshot(), before);
    }

    #[test]
    fn failed_snapshot_is_rolled_back() {
        let map = subvolumes(true);
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);
        backend.fail_snapshots();
        let before = backend.snapshot();

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(300, 256, now());

        assert!(!result.success);
        assert_eq!(result.failure, Some(RestoreFailure::SnapshotCreate));
        assert_eq!(engine.state(), RestoreState::Idle);
        assert_eq!(backend.snapshot(), before);
    }

    #[test]
    fn failed_rollback_points_at_the_backup() {
        let map = subvolumes(false);
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);
        let backup = backup_name("@", now());
        backend.fail_snapshots();
        backend.fail_rename_from(&backup);

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(300, 256, now());

        assert!(!result.success);
        assert_eq!(result.failure, Some(RestoreFailure::SnapshotCreate));
        assert_eq!(result.backup_name, backup);
        assert!(result.failure_message.contains(&backup));
        assert_eq!(engine.state(), RestoreState::BackedUp);
        assert_eq!(backend.id_of(&backup), Some(256));
        assert!(!backend.contains("@"));
    }

    #[test]
    fn sources_outside_the_target_stay_in_place() {
        let mut map = subvolumes(false);
        map.insert(257, Subvolume::new(257, 5, "@home"));
        map.insert(310, Subvolume::new(310, 257, "@home/.snapshots/1/snapshot"));
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(310, 256, now());

        assert!(result.success, "{}", result.failure_message);
        assert_eq!(backend.snapshot_source_of("@"), Some(310));
        assert!(backend.contains("@home/.snapshots/1/snapshot"));
    }

    #[test]
    fn missing_target_after_snapshot_is_rolled_back() {
        let map = subvolumes(false);
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);
        backend.lose_snapshots();
        let before = backend.snapshot();

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(300, 256, now());

        assert_eq!(result.failure, Some(RestoreFailure::SnapshotCreate));
        assert_eq!(backend.snapshot(), before);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let map = subvolumes(false);
        let index = SubvolumeIndex::new(&map, 1);
        let backend = backend_for(&map);

        let mut engine = RestoreEngine::new(&backend, &index, Path::new(MNT));
        let result = engine.restore_at(999, 256, now());

        assert_eq!(result.failure, Some(RestoreFailure::NotFound));
        assert!(backend.renames().is_empty());
    }
}
