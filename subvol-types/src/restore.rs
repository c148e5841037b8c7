// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Step of a restore that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreFailure {
    /// Source or target could not be resolved, nothing was touched
    NotFound,
    /// The root subvolume could not be mounted, nothing was touched
    Mount,
    /// The target could not be moved aside, nothing was touched
    Rename,
    /// The snapshot could not be placed, the backup was moved back
    SnapshotCreate,
    /// The restore itself succeeded but nested subvolumes are still in the backup
    ChildMigration,
}

/// Outcome of a restore, to be inspected before it is shown to a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub success: bool,
    /// Name of the subvolume holding the pre-restore contents of the target
    pub backup_name: String,
    pub failure_message: String,
    pub failure: Option<RestoreFailure>,
}

impl RestoreResult {
    pub fn succeeded(backup_name: impl Into<String>) -> Self {
        Self {
            success: true,
            backup_name: backup_name.into(),
            ..Self::default()
        }
    }

    pub fn failed(
        failure: RestoreFailure,
        backup_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            backup_name: backup_name.into(),
            failure_message: message.into(),
            failure: Some(failure),
        }
    }
}
