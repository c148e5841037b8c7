// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use subvol_btrfs::{BackendKind, TargetMapping};
use subvol_btrfs::snapper::DEFAULT_SNAPPER_COMMAND;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/subvol-helper.toml";
pub const DEFAULT_LOG_DIR: &str = "/var/log/subvol-helper";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    pub snapper_command: String,
    /// Root subvolumes that are not mounted anywhere get mounted below this
    pub mount_path_root: PathBuf,
    pub command_timeout_secs: u64,
    pub backend: BackendKind,
    pub log_level: LoggingLevel,
    pub log_to_disk: bool,
    /// Rolled daily, files older than a week are removed at startup
    pub log_dir: PathBuf,
    /// Snapshot containers whose target cannot be read from the tree
    pub subvol_map: BTreeMap<String, TargetMapping>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            snapper_command: DEFAULT_SNAPPER_COMMAND.to_string(),
            mount_path_root: PathBuf::from("/run/subvol-helper"),
            command_timeout_secs: 60,
            backend: BackendKind::default(),
            log_level: LoggingLevel::Info,
            log_to_disk: true,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            subvol_map: BTreeMap::new(),
        }
    }
}

impl HelperConfig {
    /// Read `path`, or the system config when none is given
    ///
    /// A missing system config means defaults; a missing explicit one is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
