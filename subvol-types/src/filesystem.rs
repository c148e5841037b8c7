// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::subvolume::SubvolumeMap;

/// Space accounting for a filesystem, as reported by `btrfs filesystem usage -b`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemUsage {
    pub total_size: u64,
    pub allocated_size: u64,
    pub used_size: u64,
    pub free_size: u64,
    pub data_size: u64,
    pub data_used: u64,
    pub meta_size: u64,
    pub meta_used: u64,
    pub sys_size: u64,
    pub sys_used: u64,
}

/// A btrfs filesystem and the subvolumes it contains
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filesystem {
    pub uuid: String,
    /// Where the root subvolume (id 5) is reachable
    pub mountpoint: PathBuf,
    pub populated: bool,
    pub usage: FilesystemUsage,
    pub subvolumes: SubvolumeMap,
}

impl Filesystem {
    pub fn new(uuid: impl Into<String>, mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            uuid: uuid.into(),
            mountpoint: mountpoint.into(),
            populated: true,
            ..Self::default()
        }
    }
}
