// SPDX-License-Identifier: GPL-3.0-only

//! Balance and scrub on the root subvolume of a filesystem

use std::fmt;

use serde::{Deserialize, Serialize};
use subvol_sys::RunOptions;

use crate::error::{BtrfsError, Result};
use crate::registry::VolumeRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceTask {
    Balance,
    Scrub,
}

impl fmt::Display for MaintenanceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceTask::Balance => write!(f, "balance"),
            MaintenanceTask::Scrub => write!(f, "scrub"),
        }
    }
}

impl VolumeRegistry {
    /// Start a balance or scrub in the background
    pub fn start_maintenance(&mut self, uuid: &str, task: MaintenanceTask) -> Result<()> {
        let mut args = vec!["start"];
        if task == MaintenanceTask::Balance {
            args.extend(["--full-balance", "--bg"]);
        }
        self.maintenance(uuid, task, &args).map(|_| ())
    }

    pub fn cancel_maintenance(&mut self, uuid: &str, task: MaintenanceTask) -> Result<()> {
        self.maintenance(uuid, task, &["cancel"]).map(|_| ())
    }

    /// Status report as printed by `btrfs balance status` or `btrfs scrub status`
    pub fn maintenance_status(&mut self, uuid: &str, task: MaintenanceTask) -> Result<String> {
        self.maintenance(uuid, task, &["status"])
    }

    fn maintenance(&mut self, uuid: &str, task: MaintenanceTask, args: &[&str]) -> Result<String> {
        self.loaded(uuid)?;
        let mountpoint = self.mount_root(uuid)?.to_string_lossy().into_owned();
        let task_name = task.to_string();

        // The mountpoint goes right after the action, options follow it
        let mut full_args = vec![task_name.as_str(), args[0], mountpoint.as_str()];
        full_args.extend_from_slice(&args[1..]);

        tracing::info!("Running btrfs {} {} on {}", task, args[0], uuid);
        let output = self.runner().run("btrfs", &full_args, RunOptions::merged())?;

        // A cancel with nothing running exits non-zero, which is not worth failing over
        if !output.success() && args[0] != "cancel" {
            return Err(BtrfsError::OperationFailed(format!(
                "btrfs {} {} failed: {}",
                task, args[0], output.output
            )));
        }

        Ok(output.output)
    }
}
