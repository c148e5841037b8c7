// SPDX-License-Identifier: GPL-3.0-only

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A snapshot as known to snapper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapperSnapshot {
    /// Snapshot number, 0 is snapper's placeholder for the live system
    pub number: u32,
    pub time: Option<DateTime<Local>>,
    pub description: String,
    /// `single`, `pre` or `post`
    pub kind: String,
}

/// A snapper snapshot found by walking a filesystem's subvolumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapperSubvolume {
    pub subvol_id: u64,
    /// Path of the snapshot subvolume, ends with `/<number>/snapshot`
    pub subvol: String,
    pub uuid: String,
    pub snapshot: SnapperSnapshot,
}
