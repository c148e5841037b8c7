// SPDX-License-Identifier: GPL-3.0-only

mod config;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use subvol_btrfs::{
    MaintenanceTask, SnapperConfig, SnapshotCatalog, VolumeRegistry, backend,
    find_snapshot_subvolume,
};
use subvol_sys::{CommandRunner, SystemMounts, SystemRunner};
use subvol_types::{FilesystemUsage, RestoreResult, Subvolume};

use crate::config::HelperConfig;

/// Privileged helper for btrfs subvolume inventory and snapshot restore
#[derive(Parser)]
#[command(name = "subvol-helper")]
#[command(about = "Inspect btrfs subvolumes and restore snapper snapshots", long_about = None)]
struct Cli {
    /// Configuration file, defaults to /etc/subvol-helper.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List btrfs filesystems with their usage
    ListFilesystems,
    /// List the subvolumes of a filesystem
    ListSubvolumes {
        /// Filesystem UUID
        uuid: String,
    },
    /// List snapper snapshots found on disk, numbered for `restore`
    ListSnapshots,
    /// Restore the snapshot at INDEX of `list-snapshots`
    Restore { index: usize },
    /// Replace a subvolume with a writable snapshot of another one
    RestoreSubvol {
        /// Filesystem UUID
        uuid: String,
        /// Id of the snapshot to restore from
        source: u64,
        /// Id of the subvolume to replace
        target: u64,
    },
    /// Copy a file out of a snapshot back into the live subvolume
    RestoreFile {
        /// Filesystem UUID
        uuid: String,
        /// Path of the snapshot subvolume
        snapshot: PathBuf,
        /// File inside the snapshot
        file: PathBuf,
    },
    /// Delete a subvolume
    Delete {
        /// Filesystem UUID
        uuid: String,
        /// Subvolume id
        id: u64,
    },
    /// Show snapper configs and their snapshots
    Configs,
    /// Change settings of a snapper config
    SetConfig {
        /// Config name
        name: String,
        /// Settings as KEY=VALUE
        #[arg(required = true)]
        settings: Vec<String>,
    },
    /// Enable or disable quota groups on a filesystem
    Quota {
        /// Filesystem UUID
        uuid: String,
        #[arg(long)]
        disable: bool,
    },
    /// Start, cancel or query a balance or scrub
    Maintenance {
        /// Filesystem UUID
        uuid: String,
        task: Task,
        action: Action,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Task {
    Balance,
    Scrub,
}

impl From<Task> for MaintenanceTask {
    fn from(task: Task) -> Self {
        match task {
            Task::Balance => MaintenanceTask::Balance,
            Task::Scrub => MaintenanceTask::Scrub,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    Start,
    Cancel,
    Status,
}

#[derive(Debug, Serialize)]
struct FilesystemOutput {
    uuid: String,
    mountpoint: PathBuf,
    usage: FilesystemUsage,
    subvolume_count: usize,
}

#[derive(Debug, Serialize)]
struct SnapshotOutput {
    index: usize,
    uuid: String,
    target: String,
    subvol_id: u64,
    subvol: String,
    number: u32,
    time: Option<DateTime<Local>>,
    description: String,
    kind: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HelperConfig::load(cli.config.as_deref())?;
    logging::init(&config);

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(config.command_timeout()));
    let mut registry = VolumeRegistry::new(
        backend::build(config.backend, runner.clone()),
        runner.clone(),
        Box::new(SystemMounts),
        config.mount_path_root.clone(),
    );
    registry.load_volumes().map_err(|e| {
        tracing::error!("Failed to load filesystems: {}", e);
        e
    })?;

    match cli.command {
        Commands::ListFilesystems => {
            let filesystems: Vec<FilesystemOutput> = registry
                .filesystems()
                .map(|fs| FilesystemOutput {
                    uuid: fs.uuid.clone(),
                    mountpoint: fs.mountpoint.clone(),
                    usage: fs.usage,
                    subvolume_count: fs.subvolumes.len(),
                })
                .collect();
            print_json(&filesystems)?;
        }
        Commands::ListSubvolumes { uuid } => {
            let subvolumes: Vec<&Subvolume> = registry
                .subvolumes(&uuid)
                .with_context(|| format!("Filesystem {} not found", uuid))?
                .values()
                .collect();
            print_json(&subvolumes)?;
        }
        Commands::ListSnapshots => {
            let catalog = load_catalog(&config, &runner, &mut registry)?;
            print_json(&snapshot_outputs(&catalog))?;
        }
        Commands::Restore { index } => {
            let catalog = load_catalog(&config, &runner, &mut registry)?;
            let snapshots = snapshot_outputs(&catalog);
            let snapshot = snapshots
                .get(index)
                .with_context(|| format!("No snapshot with index {}", index))?;
            if snapshot.target.is_empty() {
                bail!(
                    "Snapshots of the top-level subvolume cannot be restored, \
                     map {} to its subvolume in subvol_map",
                    find_snapshot_subvolume(&snapshot.subvol).unwrap_or(snapshot.subvol.as_str())
                );
            }

            let target_id = registry
                .subvol_id(&snapshot.uuid, &snapshot.target)
                .with_context(|| format!("Target subvolume {} not found", snapshot.target))?;
            let result = registry.restore_subvol(&snapshot.uuid, snapshot.subvol_id, target_id);
            report_restore(&result)?;
        }
        Commands::RestoreSubvol {
            uuid,
            source,
            target,
        } => {
            let result = registry.restore_subvol(&uuid, source, target);
            report_restore(&result)?;
        }
        Commands::RestoreFile {
            uuid,
            snapshot,
            file,
        } => {
            let mut catalog = SnapshotCatalog::new(runner.clone(), config.snapper_command.clone())
                .with_subvol_map(&config.subvol_map);
            catalog.load_subvolumes(&mut registry);
            let target = catalog.find_target_path(&mut registry, &snapshot, &file, &uuid)?;

            subvol_sys::restore_file(&file, &target)
                .with_context(|| format!("Failed to restore {}", target.display()))?;
            tracing::info!("Restored {} from {}", target.display(), snapshot.display());
            print_json(&serde_json::json!({ "success": true, "target": target }))?;
        }
        Commands::Delete { uuid, id } => {
            let success = registry.delete_subvol(&uuid, id);
            print_json(&serde_json::json!({ "success": success }))?;
            if !success {
                bail!("Failed to delete subvolume {}", id);
            }
        }
        Commands::Configs => {
            let catalog = load_catalog(&config, &runner, &mut registry)?;
            let configs: serde_json::Map<String, serde_json::Value> = catalog
                .configs()
                .iter()
                .map(|(name, settings)| {
                    let value = serde_json::json!({
                        "settings": settings,
                        "snapshots": catalog.snapshots(name),
                    });
                    (name.clone(), value)
                })
                .collect();
            print_json(&configs)?;
        }
        Commands::SetConfig { name, settings } => {
            let mut catalog = load_catalog(&config, &runner, &mut registry)?;
            let settings = parse_settings(&settings)?;
            catalog.set_config(&name, &settings)?;
            print_json(&catalog.config(&name))?;
        }
        Commands::Quota { uuid, disable } => {
            let mountpoint = registry.mount_root(&uuid)?;
            registry.set_quota_enabled(&mountpoint, !disable)?;
            print_json(&serde_json::json!({
                "success": true,
                "enabled": registry.is_quota_enabled(&mountpoint),
            }))?;
        }
        Commands::Maintenance { uuid, task, action } => {
            let task = MaintenanceTask::from(task);
            match action {
                Action::Start => registry.start_maintenance(&uuid, task)?,
                Action::Cancel => registry.cancel_maintenance(&uuid, task)?,
                Action::Status => {
                    let status = registry.maintenance_status(&uuid, task)?;
                    print_json(&serde_json::json!({ "task": task, "status": status }))?;
                    return Ok(());
                }
            }
            print_json(&serde_json::json!({ "success": true }))?;
        }
    }

    Ok(())
}

fn load_catalog(
    config: &HelperConfig,
    runner: &Arc<dyn CommandRunner>,
    registry: &mut VolumeRegistry,
) -> Result<SnapshotCatalog> {
    if which::which(&config.snapper_command).is_err() {
        bail!("snapper not found at {}", config.snapper_command);
    }

    let mut catalog = SnapshotCatalog::new(runner.clone(), config.snapper_command.clone())
        .with_subvol_map(&config.subvol_map);
    catalog.load(registry)?;
    Ok(catalog)
}

fn snapshot_outputs(catalog: &SnapshotCatalog) -> Vec<SnapshotOutput> {
    catalog
        .snapshot_list()
        .into_iter()
        .enumerate()
        .map(|(index, (target, subvol))| SnapshotOutput {
            index,
            uuid: subvol.uuid.clone(),
            target: target.to_string(),
            subvol_id: subvol.subvol_id,
            subvol: subvol.subvol.clone(),
            number: subvol.snapshot.number,
            time: subvol.snapshot.time,
            description: subvol.snapshot.description.clone(),
            kind: subvol.snapshot.kind.clone(),
        })
        .collect()
}

fn parse_settings(settings: &[String]) -> Result<SnapperConfig> {
    settings
        .iter()
        .map(|setting| {
            let (key, value) = setting
                .split_once('=')
                .with_context(|| format!("Expected KEY=VALUE, got {}", setting))?;
            Ok::<_, anyhow::Error>((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn report_restore(result: &RestoreResult) -> Result<()> {
    print_json(result)?;
    if !result.success {
        bail!("{}", result.failure_message);
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
