// SPDX-License-Identifier: GPL-3.0-only

//! The set of btrfs filesystems on this machine and their subvolumes

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use subvol_sys::btrfs_tools::parse_filesystem_uuids;
use subvol_sys::mounts::{find_root_mount, parse_btrfs_mountpoints};
use subvol_sys::qgroup::parse_qgroup_show;
use subvol_sys::usage::parse_filesystem_usage;
use subvol_sys::{CommandRunner, MountOps, RunOptions};
use subvol_types::{Filesystem, FilesystemUsage, RestoreFailure, RestoreResult, SubvolumeMap};

use crate::backend::SubvolumeBackend;
use crate::error::{BtrfsError, Result};
use crate::index::SubvolumeIndex;
use crate::restore::RestoreEngine;

const BTRFS: &str = "btrfs";
const FINDMNT: &str = "findmnt";

/// Owns every loaded [`Filesystem`] and the mounts made to reach them
///
/// Root subvolumes that are not mounted anywhere get mounted below
/// `mount_path_root`; those mounts are detached again by
/// [`VolumeRegistry::unmount_all`] or when the registry is dropped.
pub struct VolumeRegistry {
    backend: Box<dyn SubvolumeBackend>,
    runner: Arc<dyn CommandRunner>,
    mounts: Box<dyn MountOps>,
    mount_path_root: PathBuf,
    filesystems: BTreeMap<String, Filesystem>,
    /// Bumped on every subvolume load, see [`SubvolumeIndex::epoch`]
    epochs: BTreeMap<String, u64>,
    temp_mounts: Vec<PathBuf>,
}

impl VolumeRegistry {
    pub fn new(
        backend: Box<dyn SubvolumeBackend>,
        runner: Arc<dyn CommandRunner>,
        mounts: Box<dyn MountOps>,
        mount_path_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            runner,
            mounts,
            mount_path_root: mount_path_root.into(),
            filesystems: BTreeMap::new(),
            epochs: BTreeMap::new(),
            temp_mounts: Vec::new(),
        }
    }

    pub fn backend(&self) -> &dyn SubvolumeBackend {
        self.backend.as_ref()
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// UUIDs of all btrfs filesystems known to the kernel
    pub fn list_filesystems(&self) -> Result<Vec<String>> {
        let output = self
            .runner
            .run_checked(BTRFS, &["filesystem", "show", "-m"])?;
        Ok(parse_filesystem_uuids(&output.output))
    }

    /// Where the root subvolume of `uuid` can be reached, mounting it if needed
    pub fn mount_root(&mut self, uuid: &str) -> Result<PathBuf> {
        let owned = self.mount_path_root.join(uuid);
        if self.temp_mounts.contains(&owned) {
            return Ok(owned);
        }

        let mounted = self.runner.run(
            FINDMNT,
            &["-lnO", "subvolid=5", "-o", "uuid,target"],
            RunOptions::default(),
        )?;
        if let Some(existing) = find_root_mount(&mounted.output, uuid) {
            return Ok(existing);
        }

        let mount_failure = |reason: String| BtrfsError::MountFailure {
            uuid: uuid.to_string(),
            reason,
        };

        fs::create_dir_all(&owned).map_err(|e| {
            mount_failure(format!("cannot create {}: {}", owned.display(), e))
        })?;
        if let Err(e) = self.mounts.mount_root(uuid, &owned) {
            if let Err(cleanup) = fs::remove_dir(&owned) {
                tracing::warn!("Failed to remove {}: {}", owned.display(), cleanup);
            }
            return Err(mount_failure(e.to_string()));
        }

        tracing::info!("Mounted root subvolume of {} at {}", uuid, owned.display());
        self.temp_mounts.push(owned.clone());
        Ok(owned)
    }

    /// Refresh every filesystem, its usage figures and its subvolumes
    ///
    /// A filesystem that cannot be mounted or listed is skipped with a
    /// warning, the others still load.
    pub fn load_volumes(&mut self) -> Result<()> {
        let uuids = self.list_filesystems()?;
        self.filesystems.retain(|uuid, _| uuids.contains(uuid));

        for uuid in &uuids {
            let mountpoint = match self.mount_root(uuid) {
                Ok(mountpoint) => mountpoint,
                Err(e) => {
                    tracing::warn!("Skipping filesystem {}: {}", uuid, e);
                    continue;
                }
            };

            let usage = self.read_usage(&mountpoint);
            let filesystem = self
                .filesystems
                .entry(uuid.clone())
                .or_insert_with(|| Filesystem::new(uuid.as_str(), mountpoint.as_path()));
            filesystem.mountpoint = mountpoint;
            filesystem.populated = true;
            filesystem.usage = usage;

            if let Err(e) = self.load_subvolumes(uuid) {
                tracing::warn!("Failed to load subvolumes of {}: {}", uuid, e);
            }
        }

        Ok(())
    }

    fn read_usage(&self, mountpoint: &Path) -> FilesystemUsage {
        let mountpoint = mountpoint.to_string_lossy().into_owned();
        match self.runner.run_checked(
            BTRFS,
            &["filesystem", "usage", "-b", mountpoint.as_str()],
        ) {
            Ok(output) => parse_filesystem_usage(&output.output),
            Err(e) => {
                tracing::warn!("No usage figures for {}: {}", mountpoint, e);
                FilesystemUsage::default()
            }
        }
    }

    /// Rebuild the subvolume map of one filesystem
    pub fn load_subvolumes(&mut self, uuid: &str) -> Result<()> {
        let mountpoint = self.loaded(uuid)?.mountpoint.clone();

        let mut subvolumes: SubvolumeMap = self
            .backend
            .list(&mountpoint, uuid)?
            .into_iter()
            .map(|subvol| (subvol.id, subvol))
            .collect();
        self.load_qgroups(&mountpoint, &mut subvolumes);

        tracing::debug!(
            "Loaded {} subvolumes of {} through {}",
            subvolumes.len(),
            uuid,
            self.backend.name()
        );

        if let Some(filesystem) = self.filesystems.get_mut(uuid) {
            filesystem.subvolumes = subvolumes;
        }
        *self.epochs.entry(uuid.to_string()).or_default() += 1;
        Ok(())
    }

    fn load_qgroups(&self, mountpoint: &Path, subvolumes: &mut SubvolumeMap) {
        if !self.is_quota_enabled(mountpoint) {
            tracing::debug!("Quota groups disabled on {}", mountpoint.display());
            return;
        }

        let mountpoint = mountpoint.to_string_lossy().into_owned();
        let output = match self.runner.run(
            BTRFS,
            &["qgroup", "show", "--raw", "--sync", mountpoint.as_str()],
            RunOptions::default(),
        ) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Failed to read quota groups of {}: {}", mountpoint, e);
                return;
            }
        };

        for (id, sizes) in parse_qgroup_show(&output.output) {
            if let Some(subvol) = subvolumes.get_mut(&id) {
                subvol.size = Some(sizes.referenced);
                subvol.exclusive = Some(sizes.exclusive);
            }
        }
    }

    /// `btrfs qgroup show` prints nothing on stdout while quotas are off
    pub fn is_quota_enabled(&self, mountpoint: &Path) -> bool {
        let mountpoint = mountpoint.to_string_lossy().into_owned();
        self.runner
            .run(BTRFS, &["qgroup", "show", mountpoint.as_str()], RunOptions::default())
            .map(|output| !output.output.is_empty())
            .unwrap_or(false)
    }

    pub fn set_quota_enabled(&self, mountpoint: &Path, enable: bool) -> Result<()> {
        let mountpoint = mountpoint.to_string_lossy().into_owned();
        let action = if enable { "enable" } else { "disable" };
        tracing::info!("Turning quota {} on {}", action, mountpoint);
        self.runner
            .run_checked(BTRFS, &["quota", action, mountpoint.as_str()])?;
        Ok(())
    }

    pub(crate) fn loaded(&self, uuid: &str) -> Result<&Filesystem> {
        self.filesystems
            .get(uuid)
            .filter(|filesystem| filesystem.populated)
            .ok_or_else(|| BtrfsError::FilesystemNotFound(uuid.to_string()))
    }

    pub fn filesystem(&self, uuid: &str) -> Option<&Filesystem> {
        self.filesystems.get(uuid)
    }

    pub fn filesystems(&self) -> impl Iterator<Item = &Filesystem> {
        self.filesystems.values()
    }

    pub fn filesystem_uuids(&self) -> Vec<String> {
        self.filesystems.keys().cloned().collect()
    }

    pub fn subvolumes(&self, uuid: &str) -> Option<&SubvolumeMap> {
        self.filesystems.get(uuid).map(|filesystem| &filesystem.subvolumes)
    }

    /// Tree queries over the current load of `uuid`
    pub fn index(&self, uuid: &str) -> Result<SubvolumeIndex<'_>> {
        let filesystem = self.loaded(uuid)?;
        let epoch = self.epochs.get(uuid).copied().unwrap_or_default();
        Ok(SubvolumeIndex::new(&filesystem.subvolumes, epoch))
    }

    pub fn children(&self, uuid: &str, parent_id: u64) -> Vec<String> {
        self.index(uuid)
            .map(|index| index.children(parent_id))
            .unwrap_or_default()
    }

    pub fn subvol_id(&self, uuid: &str, name: &str) -> Option<u64> {
        self.index(uuid).ok()?.subvol_id(name)
    }

    pub fn subvol_name(&self, uuid: &str, id: u64) -> Option<String> {
        self.index(uuid).ok()?.subvol_name(id).map(str::to_string)
    }

    pub fn subvol_parent(&self, uuid: &str, id: u64) -> Option<u64> {
        self.index(uuid).ok()?.parent(id)
    }

    pub fn top_parent(&self, uuid: &str, id: u64) -> Result<u64> {
        self.index(uuid)?.top_parent(id)
    }

    /// Parent id of the subvolume mounted or located at `path`
    pub fn subvol_parent_at(&self, path: &Path) -> Result<u64> {
        Ok(self.backend.info(path)?.parent_id)
    }

    /// Name within `uuid` of the subvolume at `path`
    pub fn subvolume_name_at(&self, uuid: &str, path: &Path) -> Result<String> {
        let info = self.backend.info(path)?;
        self.subvol_name(uuid, info.id)
            .ok_or_else(|| BtrfsError::SubvolumeNotFound(path.display().to_string()))
    }

    /// Delete subvolume `id` of `uuid`, false if it is unknown or deletion failed
    pub fn delete_subvol(&mut self, uuid: &str, id: u64) -> bool {
        let Some(name) = self.subvol_name(uuid, id) else {
            tracing::warn!("Cannot delete unknown subvolume {} of {}", id, uuid);
            return false;
        };
        let mountpoint = match self.mount_root(uuid) {
            Ok(mountpoint) => mountpoint,
            Err(e) => {
                tracing::warn!("Cannot delete {}: {}", name, e);
                return false;
            }
        };

        if let Err(e) = self.backend.delete(&mountpoint.join(&name)) {
            tracing::error!("Failed to delete subvolume {}: {}", name, e);
            return false;
        }

        tracing::info!("Deleted subvolume {} ({}) of {}", name, id, uuid);
        if let Some(filesystem) = self.filesystems.get_mut(uuid) {
            filesystem.subvolumes.remove(&id);
        }
        *self.epochs.entry(uuid.to_string()).or_default() += 1;
        true
    }

    /// Replace subvolume `target_id` with a writable snapshot of `source_id`
    ///
    /// The subvolumes of `uuid` are reloaded afterwards whatever the outcome.
    pub fn restore_subvol(&mut self, uuid: &str, source_id: u64, target_id: u64) -> RestoreResult {
        if self.loaded(uuid).is_err() {
            return RestoreResult::failed(
                RestoreFailure::NotFound,
                "",
                format!("Filesystem {} is not loaded", uuid),
            );
        }

        let mountpoint = match self.mount_root(uuid) {
            Ok(mountpoint) => mountpoint,
            Err(e) => {
                return RestoreResult::failed(RestoreFailure::Mount, "", e.to_string());
            }
        };

        let result = match self.index(uuid) {
            Ok(index) => {
                RestoreEngine::new(self.backend.as_ref(), &index, &mountpoint)
                    .restore(source_id, target_id)
            }
            Err(e) => RestoreResult::failed(RestoreFailure::NotFound, "", e.to_string()),
        };

        if let Err(e) = self.load_subvolumes(uuid) {
            tracing::warn!("Failed to reload subvolumes of {} after restore: {}", uuid, e);
        }

        result
    }

    /// Whether subvolume `subvol_id` of `uuid` is mounted somewhere
    pub fn is_mounted(&self, uuid: &str, subvol_id: u64) -> bool {
        let option = format!("subvolid={}", subvol_id);
        self.runner
            .run(
                FINDMNT,
                &["-nO", option.as_str(), "-o", "uuid"],
                RunOptions::default(),
            )
            // Every filesystem has its own subvolume 256, look at all of them
            .map(|output| output.lines().any(|line| line.trim() == uuid))
            .unwrap_or(false)
    }

    /// Mountpoints of btrfs filesystems, sorted
    pub fn list_mountpoints(&self) -> Result<Vec<PathBuf>> {
        let output = self
            .runner
            .run_checked(FINDMNT, &["--real", "-lno", "fstype,target"])?;
        Ok(parse_btrfs_mountpoints(&output.output))
    }

    /// Detach every mount made by this registry
    ///
    /// Failures are logged and skipped.
    pub fn unmount_all(&mut self) {
        for target in self.temp_mounts.drain(..) {
            if let Err(e) = self.mounts.detach(&target) {
                tracing::warn!("Failed to unmount {}: {}", target.display(), e);
                continue;
            }
            if let Err(e) = fs::remove_dir(&target) {
                tracing::warn!("Failed to remove {}: {}", target.display(), e);
            }
        }
    }
}

impl Drop for VolumeRegistry {
    fn drop(&mut self) {
        self.unmount_all();
    }
}
