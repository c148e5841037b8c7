// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;
use std::sync::Arc;

use subvol_sys::btrfs_tools::{parse_subvolume_ids, parse_subvolume_list, parse_subvolume_show};
use subvol_sys::{CommandRunner, RunOptions};
use subvol_types::Subvolume;

use super::{SubvolumeBackend, SubvolumeInfo};
use crate::error::{BtrfsError, Result};

const BTRFS: &str = "btrfs";

/// Backend driving the `btrfs` command line tool
pub struct CommandBackend {
    runner: Arc<dyn CommandRunner>,
}

impl CommandBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn btrfs(&self, args: &[&str]) -> Result<String> {
        let output = self.runner.run(BTRFS, args, RunOptions::merged())?;
        if !output.success() {
            return Err(BtrfsError::OperationFailed(format!(
                "btrfs {} failed: {}",
                args.join(" "),
                output.output
            )));
        }

        Ok(output.output)
    }
}

impl SubvolumeBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "btrfs-progs"
    }

    fn list(&self, mountpoint: &Path, filesystem_uuid: &str) -> Result<Vec<Subvolume>> {
        let mountpoint = mountpoint.to_string_lossy().into_owned();

        // stderr stays out of the listing so warnings cannot be mistaken for entries
        let output = self.runner.run(
            BTRFS,
            &["subvolume", "list", "-p", "-u", "-q", "-R", mountpoint.as_str()],
            RunOptions::default(),
        )?;
        if !output.success() {
            return Err(BtrfsError::OperationFailed(format!(
                "Failed to list subvolumes at {}: exit code {}",
                mountpoint, output.exit_code
            )));
        }
        let mut subvolumes = parse_subvolume_list(&output.output, filesystem_uuid);

        match self.runner.run(
            BTRFS,
            &["subvolume", "list", "-r", mountpoint.as_str()],
            RunOptions::default(),
        ) {
            Ok(read_only) if read_only.success() => {
                let ids = parse_subvolume_ids(&read_only.output);
                for subvol in subvolumes.iter_mut().filter(|s| ids.contains(&s.id)) {
                    subvol.flags |= 0x1;
                }
            }
            Ok(read_only) => {
                tracing::warn!("Could not list read-only subvolumes: {}", read_only.output)
            }
            Err(e) => tracing::warn!("Could not list read-only subvolumes: {}", e),
        }

        Ok(subvolumes)
    }

    fn info(&self, path: &Path) -> Result<SubvolumeInfo> {
        let path_str = path.to_string_lossy().into_owned();
        let output = self
            .btrfs(&["subvolume", "show", path_str.as_str()])
            .map_err(|e| BtrfsError::SubvolumeNotFound(format!("{}: {}", path.display(), e)))?;

        let show = parse_subvolume_show(&output).ok_or_else(|| {
            BtrfsError::SubvolumeNotFound(format!("{}: unexpected output", path.display()))
        })?;

        Ok(SubvolumeInfo {
            id: show.id,
            parent_id: show.parent_id,
        })
    }

    fn create_snapshot(&self, source: &Path, dest: &Path, readonly: bool) -> Result<()> {
        let source_str = source.to_string_lossy().into_owned();
        let dest_str = dest.to_string_lossy().into_owned();

        let mut args = vec!["subvolume", "snapshot"];
        if readonly {
            args.push("-r");
        }
        args.push(source_str.as_str());
        args.push(dest_str.as_str());

        self.btrfs(&args)
            .map_err(|e| BtrfsError::SnapshotCreateFailure {
                source_path: source.to_path_buf(),
                target_path: dest.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy().into_owned();
        self.btrfs(&["subvolume", "delete", path.as_str()])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    #[test]
    fn lists_and_marks_read_only_subvolumes() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "btrfs subvolume list -p -u -q -R /mnt/fs",
            "ID 256 gen 10 parent 5 top level 5 parent_uuid - received_uuid - uuid - path @\n\
ID 300 gen 12 parent 256 top level 256 parent_uuid - received_uuid - uuid - path @/.snapshots/1/snapshot\n",
        );
        runner.respond(
            "btrfs subvolume list -r /mnt/fs",
            "ID 300 gen 12 top level 256 path @/.snapshots/1/snapshot\n",
        );

        let backend = CommandBackend::new(runner.clone());
        let subvols = backend
            .list(Path::new("/mnt/fs"), "fs-uuid")
            .expect("listing should succeed");

        assert_eq!(subvols.len(), 2);
        assert!(!subvols[0].is_read_only());
        assert!(subvols[1].is_read_only());
    }

    #[test]
    fn snapshot_passes_read_only_flag() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("btrfs subvolume snapshot -r /mnt/a /mnt/b", "Create a snapshot");

        let backend = CommandBackend::new(runner.clone());
        backend
            .create_snapshot(Path::new("/mnt/a"), Path::new("/mnt/b"), true)
            .expect("snapshot should succeed");

        assert_eq!(runner.calls(), vec!["btrfs subvolume snapshot -r /mnt/a /mnt/b"]);
    }

    #[test]
    fn refused_snapshot_is_a_snapshot_failure() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail(
            "btrfs subvolume snapshot /mnt/a /mnt/b",
            1,
            "ERROR: target path already exists",
        );

        let backend = CommandBackend::new(runner);
        let err = backend
            .create_snapshot(Path::new("/mnt/a"), Path::new("/mnt/b"), false)
            .unwrap_err();
        assert!(matches!(err, BtrfsError::SnapshotCreateFailure { .. }));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn failed_command_becomes_error() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail("btrfs subvolume delete /mnt/x", 1, "ERROR: cannot delete");

        let backend = CommandBackend::new(runner);
        let err = backend.delete(Path::new("/mnt/x")).unwrap_err();
        assert!(err.to_string().contains("cannot delete"));
    }

    #[test]
    fn info_reads_subvolume_show() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "btrfs subvolume show /.snapshots",
            "@/.snapshots\n\tName: \t\t\t.snapshots\n\tSubvolume ID: \t\t260\n\tParent ID: \t\t256\n",
        );

        let backend = CommandBackend::new(runner);
        let info = backend.info(Path::new("/.snapshots")).expect("show should parse");
        assert_eq!(info, SubvolumeInfo { id: 260, parent_id: 256 });
    }
}
