// SPDX-License-Identifier: GPL-3.0-only

//! Snapper configs and the snapshots found on disk
//!
//! Configs and their snapshot lists come from the `snapper` tool in its
//! machine readable CSV mode. Snapshot subvolumes are found by walking the
//! subvolumes of every loaded filesystem and reading their `info.xml`.

mod config;
mod meta;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use subvol_sys::{CommandRunner, RunOptions};
use subvol_types::{SnapperSnapshot, SnapperSubvolume};

use crate::error::{BtrfsError, Result};
use crate::registry::VolumeRegistry;
use crate::resolver::{SnapshotTargetResolver, TargetMapping, is_snapper};

pub use config::SnapperConfig;
pub use meta::{parse_snapper_meta, read_snapper_meta};

pub const DEFAULT_SNAPPER_COMMAND: &str = "/usr/bin/snapper";
/// Where the snapshots of the root config are mounted
pub const DEFAULT_SNAPSHOT_MOUNT: &str = "/.snapshots";

const ROOT_CONFIG: &str = "root";
const LIST_COLUMNS: [&str; 3] = ["list", "--columns", "number,date,description,type"];

pub struct SnapshotCatalog {
    runner: Arc<dyn CommandRunner>,
    snapper_command: String,
    snapshot_mount: PathBuf,
    configs: BTreeMap<String, SnapperConfig>,
    snapshots: BTreeMap<String, Vec<SnapperSnapshot>>,
    /// Snapshot subvolumes keyed by the name of the subvolume they were taken of
    subvols: BTreeMap<String, Vec<SnapperSubvolume>>,
    resolver: SnapshotTargetResolver,
}

impl SnapshotCatalog {
    pub fn new(runner: Arc<dyn CommandRunner>, snapper_command: impl Into<String>) -> Self {
        Self {
            runner,
            snapper_command: snapper_command.into(),
            snapshot_mount: PathBuf::from(DEFAULT_SNAPSHOT_MOUNT),
            configs: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            subvols: BTreeMap::new(),
            resolver: SnapshotTargetResolver::new(),
        }
    }

    pub fn with_snapshot_mount(mut self, snapshot_mount: impl Into<PathBuf>) -> Self {
        self.snapshot_mount = snapshot_mount.into();
        self
    }

    /// Fixed targets for snapshot containers, keyed by container name
    pub fn with_subvol_map(mut self, subvol_map: &BTreeMap<String, TargetMapping>) -> Self {
        for (container, mapping) in subvol_map {
            self.resolver.pin(container, mapping);
        }
        self
    }

    /// Reload every config, its snapshot list and the snapshot subvolumes
    pub fn load(&mut self, registry: &mut VolumeRegistry) -> Result<()> {
        self.configs.clear();
        self.snapshots.clear();

        let names = self.run_snapper(None, &[], &["list-configs", "--columns", "config"])?;

        for name in names.iter().map(|line| line.trim()).filter(|n| !n.is_empty()) {
            if let Err(e) = self.load_config(name) {
                tracing::warn!("Failed to read snapper config {}: {}", name, e);
            }

            let rows = if name == ROOT_CONFIG {
                self.list_root_snapshots(registry)
            } else {
                self.run_snapper(Some(name), &[], &LIST_COLUMNS)
            };
            let rows = match rows {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!("Failed to list snapshots of {}: {}", name, e);
                    continue;
                }
            };

            let snapshots: Vec<SnapperSnapshot> = rows
                .iter()
                .filter_map(|row| parse_snapshot_row(row))
                .filter(|snapshot| snapshot.number != 0)
                .collect();
            if !snapshots.is_empty() {
                self.snapshots.insert(name.to_string(), snapshots);
            }
        }

        self.load_subvolumes(registry);
        Ok(())
    }

    /// Snapshot list of the root config
    ///
    /// When booted into a snapshot, listing against `/` finds nothing; the
    /// snapshots then live next to the subvolume `/.snapshots` is mounted from.
    fn list_root_snapshots(&self, registry: &mut VolumeRegistry) -> Result<Vec<String>> {
        let rows = self.run_snapper(None, &[], &LIST_COLUMNS)?;
        if !rows.is_empty() {
            return Ok(rows);
        }

        let parent_id = match registry.subvol_parent_at(&self.snapshot_mount) {
            Ok(id) if id != 0 => id,
            _ => return Ok(rows),
        };

        let snapshot_mount = self.snapshot_mount.to_string_lossy().into_owned();
        let uuid = registry
            .runner()
            .run(
                "findmnt",
                &["-no", "uuid", snapshot_mount.as_str()],
                RunOptions::default(),
            )?
            .output
            .trim()
            .to_string();
        if uuid.is_empty() {
            return Ok(rows);
        }

        let mountpoint = registry.mount_root(&uuid)?;
        let parent_name = registry
            .subvol_name(&uuid, parent_id)
            .ok_or_else(|| BtrfsError::SubvolumeNotFound(format!("subvolume id {}", parent_id)))?;

        let root = mountpoint.join(parent_name).to_string_lossy().into_owned();
        tracing::info!("Listing root snapshots through {}", root);
        self.run_snapper(None, &["--no-dbus", "-r", root.as_str()], &LIST_COLUMNS)
    }

    pub fn load_config(&mut self, name: &str) -> Result<()> {
        self.configs.remove(name);

        let rows = self.run_snapper(Some(name), &[], &["get-config"])?;
        let config: SnapperConfig = rows
            .iter()
            .filter_map(|row| {
                let cols = split_csv(row);
                let key = cols.first()?.trim().to_string();
                let value = cols.get(1).map(|v| v.trim().to_string()).unwrap_or_default();
                (!key.is_empty()).then_some((key, value))
            })
            .collect();

        if !config.is_empty() {
            self.configs.insert(name.to_string(), config);
        }
        Ok(())
    }

    /// Find every snapshot subvolume and file it under the subvolume it belongs to
    pub fn load_subvolumes(&mut self, registry: &mut VolumeRegistry) {
        self.subvols.clear();

        for uuid in registry.filesystem_uuids() {
            let mountpoint = match registry.mount_root(&uuid) {
                Ok(mountpoint) => mountpoint,
                Err(e) => {
                    tracing::warn!("Skipping snapshots of {}: {}", uuid, e);
                    continue;
                }
            };
            let Ok(index) = registry.index(&uuid) else {
                continue;
            };

            for subvol in index.iter().filter(|subvol| is_snapper(&subvol.name)) {
                let Some(container) = subvol.name.strip_suffix("snapshot") else {
                    continue;
                };
                let info = mountpoint.join(format!("{}info.xml", container));

                let snapshot = match read_snapper_meta(&info) {
                    Ok(snapshot) if snapshot.number != 0 => snapshot,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!("No snapper metadata at {}: {}", info.display(), e);
                        continue;
                    }
                };

                let target = match self.resolver.resolve_target(&index, &subvol.name, &uuid) {
                    Ok(target) => target,
                    Err(e) => {
                        tracing::warn!("Cannot tell what {} is a snapshot of: {}", subvol.name, e);
                        continue;
                    }
                };

                self.subvols.entry(target).or_default().push(SnapperSubvolume {
                    subvol_id: subvol.id,
                    subvol: subvol.name.clone(),
                    uuid: uuid.clone(),
                    snapshot,
                });
            }
        }

        for snapshots in self.subvols.values_mut() {
            snapshots.sort_by_key(|subvol| subvol.snapshot.number);
        }
    }

    pub fn config(&self, name: &str) -> Option<&SnapperConfig> {
        self.configs.get(name)
    }

    pub fn config_names(&self) -> Vec<&str> {
        self.configs.keys().map(String::as_str).collect()
    }

    pub fn configs(&self) -> &BTreeMap<String, SnapperConfig> {
        &self.configs
    }

    pub fn snapshots(&self, config: &str) -> &[SnapperSnapshot] {
        self.snapshots.get(config).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn subvolumes(&self, target: &str) -> &[SnapperSubvolume] {
        self.subvols.get(target).map(Vec::as_slice).unwrap_or_default()
    }

    /// Names of the subvolumes that have snapshots, sorted
    pub fn targets(&self) -> Vec<&str> {
        self.subvols.keys().map(String::as_str).collect()
    }

    /// Every snapshot subvolume, grouped by target and ordered by number
    pub fn snapshot_list(&self) -> Vec<(&str, &SnapperSubvolume)> {
        self.subvols
            .iter()
            .flat_map(|(target, subvols)| subvols.iter().map(move |subvol| (target.as_str(), subvol)))
            .collect()
    }

    /// Write `config` to the snapper config `name`, skipping empty values
    ///
    /// The config is read back from snapper afterwards, also on failure.
    pub fn set_config(&mut self, name: &str, config: &SnapperConfig) -> Result<()> {
        let pairs: Vec<String> = config
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let result = if pairs.is_empty() {
            Err(BtrfsError::Snapper(format!("No settings to write to config {}", name)))
        } else {
            let mut command = vec!["set-config"];
            command.extend(pairs.iter().map(String::as_str));
            self.run_snapper(Some(name), &[], &command).map(|_| ())
        };

        if let Err(e) = self.load_config(name) {
            tracing::warn!("Failed to reload snapper config {}: {}", name, e);
        }

        result
    }

    /// Path in the live subvolume that corresponds to `file_path` inside a snapshot
    ///
    /// `snapshot_path` is the snapshot subvolume, either relative to the root
    /// subvolume or below the root mount of `uuid`.
    pub fn find_target_path(
        &mut self,
        registry: &mut VolumeRegistry,
        snapshot_path: &Path,
        file_path: &Path,
        uuid: &str,
    ) -> Result<PathBuf> {
        let snapshot_str = snapshot_path.to_string_lossy().into_owned();
        if !is_snapper(&snapshot_str) {
            return Err(BtrfsError::NotASnapshot(snapshot_str));
        }

        let mountpoint = registry.mount_root(uuid)?;
        let relative_snapshot = snapshot_path
            .strip_prefix(&mountpoint)
            .unwrap_or(snapshot_path)
            .to_string_lossy()
            .into_owned();

        let index = registry.index(uuid)?;
        let target = self
            .resolver
            .resolve_target(&index, &relative_snapshot, uuid)?;

        let relative_file = file_path
            .strip_prefix(snapshot_path)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .ok_or_else(|| {
                BtrfsError::OperationFailed(format!(
                    "{} is not inside {}",
                    file_path.display(),
                    snapshot_path.display()
                ))
            })?;

        let mut path = mountpoint;
        if !target.is_empty() {
            path.push(target);
        }
        path.push(relative_file);
        Ok(path)
    }

    /// Run snapper in CSV mode, returning the output lines without the header
    fn run_snapper(&self, config: Option<&str>, global: &[&str], command: &[&str]) -> Result<Vec<String>> {
        let mut args = Vec::new();
        if let Some(config) = config {
            args.extend(["-c", config]);
        }
        args.extend(["--machine-readable", "csv", "-q"]);
        args.extend_from_slice(global);
        args.extend_from_slice(command);

        let output = self
            .runner
            .run(&self.snapper_command, &args, RunOptions::merged())?;
        if !output.success() {
            return Err(BtrfsError::Snapper(format!(
                "{} exited with {}: {}",
                command.join(" "),
                output.exit_code,
                output.output
            )));
        }

        Ok(output.lines().skip(1).map(str::to_string).collect())
    }
}

/// A `number,date,description,type` row of `snapper list`
fn parse_snapshot_row(row: &str) -> Option<SnapperSnapshot> {
    let cols = split_csv(row);
    let number = cols.first()?.trim().parse().ok()?;

    Some(SnapperSnapshot {
        number,
        time: cols.get(1).and_then(|date| parse_local_time(date.trim())),
        description: cols.get(2).map(|d| d.trim().to_string()).unwrap_or_default(),
        kind: cols.get(3).map(|t| t.trim().to_string()).unwrap_or_default(),
    })
}

fn parse_local_time(value: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Split one CSV line, honouring double quoted fields
fn split_csv(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);

    fields
}
