// SPDX-License-Identifier: GPL-3.0-only

//! Mount discovery through `findmnt` and mounting of root subvolumes

use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};

use crate::{Result, SysError};

/// Mount options selecting the top-level subvolume
pub const ROOT_SUBVOL_OPTION: &str = "subvolid=5";

/// Mounting and detaching filesystems
pub trait MountOps: Send + Sync {
    /// Mount the root subvolume of the filesystem `uuid` at `target`
    fn mount_root(&self, uuid: &str, target: &Path) -> Result<()>;

    /// Lazily detach whatever is mounted at `target`
    fn detach(&self, target: &Path) -> Result<()>;
}

/// [`MountOps`] backed by mount(2) and umount2(2)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounts;

impl MountOps for SystemMounts {
    fn mount_root(&self, uuid: &str, target: &Path) -> Result<()> {
        let device = PathBuf::from("/dev/disk/by-uuid").join(uuid);
        tracing::info!("Mounting {} at {}", device.display(), target.display());

        nix::mount::mount(
            Some(device.as_path()),
            target,
            Some("btrfs"),
            MsFlags::empty(),
            Some(ROOT_SUBVOL_OPTION),
        )
        .map_err(|source| SysError::Mount {
            device: device.display().to_string(),
            target: target.to_path_buf(),
            source,
        })
    }

    fn detach(&self, target: &Path) -> Result<()> {
        tracing::info!("Detaching {}", target.display());

        nix::mount::umount2(target, MntFlags::MNT_DETACH).map_err(|source| SysError::Unmount {
            target: target.to_path_buf(),
            source,
        })
    }
}

/// Parse `findmnt -lnO subvolid=5 -o uuid,target` into `(uuid, target)` pairs
pub fn parse_root_mounts(output: &str) -> Vec<(String, PathBuf)> {
    output
        .lines()
        .filter_map(|line| {
            let (uuid, target) = line.trim().split_once(char::is_whitespace)?;
            let target = target.trim();
            if uuid.is_empty() || target.is_empty() {
                return None;
            }
            Some((uuid.to_string(), PathBuf::from(unescape_findmnt(target))))
        })
        .collect()
}

/// Mountpoint of the root subvolume of `uuid`, if it is mounted anywhere
pub fn find_root_mount(output: &str, uuid: &str) -> Option<PathBuf> {
    parse_root_mounts(output)
        .into_iter()
        .find(|(mounted_uuid, _)| mounted_uuid == uuid)
        .map(|(_, target)| target)
}

/// Parse `findmnt --real -lno fstype,target`, keeping btrfs mountpoints
pub fn parse_btrfs_mountpoints(output: &str) -> Vec<PathBuf> {
    let mut mountpoints: Vec<PathBuf> = output
        .lines()
        .filter_map(|line| {
            let (fs_type, target) = line.trim().split_once(char::is_whitespace)?;
            if fs_type != "btrfs" {
                return None;
            }
            let target = target.trim();
            (!target.is_empty()).then(|| PathBuf::from(unescape_findmnt(target)))
        })
        .collect();

    mountpoints.sort();
    mountpoints
}

/// findmnt in list mode encodes unsafe characters as `\xHH`
fn unescape_findmnt(value: &str) -> String {
    let mut output = Vec::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1] == b'x'
            && bytes[index + 2].is_ascii_hexdigit()
            && bytes[index + 3].is_ascii_hexdigit()
        {
            let hex = &value[index + 2..index + 4];
            if let Ok(num) = u8::from_str_radix(hex, 16) {
                output.push(num);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_root_mount_for_uuid() {
        let output = "1111-2222 /\n3333-4444 /run/media/my\\x20disk\n";
        assert_eq!(find_root_mount(output, "1111-2222"), Some(PathBuf::from("/")));
        assert_eq!(
            find_root_mount(output, "3333-4444"),
            Some(PathBuf::from("/run/media/my disk"))
        );
        assert_eq!(find_root_mount(output, "5555"), None);
    }

    #[test]
    fn keeps_only_btrfs_mountpoints_sorted() {
        let output = "btrfs  /home\next4   /boot\nbtrfs  /\nvfat   /boot/efi\n";
        assert_eq!(
            parse_btrfs_mountpoints(output),
            vec![PathBuf::from("/"), PathBuf::from("/home")]
        );
    }

    #[test]
    fn leaves_plain_backslashes_alone() {
        assert_eq!(unescape_findmnt("a\\b"), "a\\b");
        assert_eq!(unescape_findmnt("tail\\x2"), "tail\\x2");
    }
}
