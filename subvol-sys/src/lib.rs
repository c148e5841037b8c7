// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for btrfs subvolume management
//!
//! This crate wraps everything that touches the host directly:
//! - Running external tools (`btrfs`, `findmnt`, `snapper`) with a timeout
//! - Mounting and detaching root subvolumes
//! - Parsing the text output of those tools
//! - Renames and file copies on subvolume paths
//!
//! Most of these operations require elevated privileges.

pub mod btrfs_tools;
pub mod error;
pub mod exec;
pub mod fsops;
pub mod mounts;
pub mod qgroup;
pub mod usage;

pub use error::{Result, SysError};
pub use exec::{CommandOutput, CommandRunner, DEFAULT_TIMEOUT, RunOptions, SystemRunner};
pub use fsops::{rename_subvolume, restore_file};
pub use mounts::{MountOps, SystemMounts};
pub use qgroup::QgroupSizes;
