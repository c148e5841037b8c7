// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id of the top-level subvolume of every btrfs filesystem
pub const BTRFS_ROOT_ID: u64 = 5;

const READ_ONLY_FLAG: u64 = 0x1;

/// Subvolumes of one filesystem keyed by subvolume id
pub type SubvolumeMap = BTreeMap<u64, Subvolume>;

/// Information about a BTRFS subvolume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subvolume {
    pub id: u64,
    pub parent_id: u64,
    /// Path relative to the root subvolume, e.g. `@/.snapshots/1/snapshot`
    pub name: String,
    pub filesystem_uuid: String,
    pub uuid: Option<Uuid>,
    pub parent_uuid: Option<Uuid>,
    pub received_uuid: Option<Uuid>,
    pub generation: u64,
    pub flags: u64,
    pub created_at: Option<DateTime<Utc>>,
    /// Referenced bytes, only known when quota groups are enabled
    pub size: Option<u64>,
    /// Exclusive bytes, only known when quota groups are enabled
    pub exclusive: Option<u64>,
}

impl Subvolume {
    pub fn new(id: u64, parent_id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.flags & READ_ONLY_FLAG != 0
    }

    /// A subvolume created from another one carries its parent's UUID
    pub fn is_snapshot(&self) -> bool {
        self.parent_uuid.is_some()
    }

    pub fn is_received(&self) -> bool {
        self.received_uuid.is_some()
    }
}
