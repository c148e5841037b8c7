// SPDX-License-Identifier: GPL-3.0-only

//! In-memory stand-ins for the system collaborators

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use subvol_sys::exec::render;
use subvol_sys::{CommandOutput, CommandRunner, MountOps, RunOptions, SysError};
use subvol_types::Subvolume;

use crate::backend::{SubvolumeBackend, SubvolumeInfo};
use crate::error::{BtrfsError, Result};

/// Answers commands from a table keyed by the rendered command line
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<HashMap<String, CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, output: &str) {
        self.fail(command, 0, output);
    }

    pub fn fail(&self, command: &str, exit_code: i32, output: &str) {
        self.responses.lock().unwrap().insert(
            command.to_string(),
            CommandOutput {
                exit_code,
                output: output.trim().to_string(),
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        _options: RunOptions,
    ) -> subvol_sys::Result<CommandOutput> {
        let command = render(program, args);
        self.calls.lock().unwrap().push(command.clone());

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&command)
            .cloned()
            .unwrap_or(CommandOutput {
                exit_code: 1,
                output: String::new(),
            }))
    }
}

/// Records mounts instead of performing them
#[derive(Default)]
pub struct FakeMounts {
    pub mounted: Mutex<Vec<(String, PathBuf)>>,
    pub detached: Mutex<Vec<PathBuf>>,
    pub fail_mount: bool,
}

impl MountOps for FakeMounts {
    fn mount_root(&self, uuid: &str, target: &Path) -> subvol_sys::Result<()> {
        if self.fail_mount {
            return Err(SysError::Parse(format!("refusing to mount {}", uuid)));
        }
        self.mounted
            .lock()
            .unwrap()
            .push((uuid.to_string(), target.to_path_buf()));
        Ok(())
    }

    fn detach(&self, target: &Path) -> subvol_sys::Result<()> {
        self.detached.lock().unwrap().push(target.to_path_buf());
        Ok(())
    }
}

#[derive(Default)]
struct FakeTree {
    /// Path relative to the mountpoint to (id, parent id)
    entries: BTreeMap<String, (u64, u64)>,
    /// Id of the subvolume each snapshot was created from
    sources: HashMap<String, u64>,
    next_id: u64,
    failing_renames: BTreeSet<String>,
    fail_snapshots: bool,
    lose_snapshots: bool,
    renames: Vec<(String, String)>,
}

/// A subvolume tree held in memory, addressed through a fake mountpoint
pub struct FakeBackend {
    mountpoint: PathBuf,
    tree: Mutex<FakeTree>,
}

impl FakeBackend {
    pub fn new(mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            mountpoint: mountpoint.into(),
            tree: Mutex::new(FakeTree {
                next_id: 1000,
                ..FakeTree::default()
            }),
        }
    }

    pub fn add(&self, name: &str, id: u64, parent_id: u64) {
        self.tree
            .lock()
            .unwrap()
            .entries
            .insert(name.to_string(), (id, parent_id));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tree.lock().unwrap().entries.contains_key(name)
    }

    pub fn id_of(&self, name: &str) -> Option<u64> {
        self.tree.lock().unwrap().entries.get(name).map(|(id, _)| *id)
    }

    pub fn snapshot_source_of(&self, name: &str) -> Option<u64> {
        self.tree.lock().unwrap().sources.get(name).copied()
    }

    /// Current tree as name to id
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.tree
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|(name, (id, _))| (name.clone(), *id))
            .collect()
    }

    pub fn fail_rename_from(&self, name: &str) {
        self.tree
            .lock()
            .unwrap()
            .failing_renames
            .insert(name.to_string());
    }

    pub fn fail_snapshots(&self) {
        self.tree.lock().unwrap().fail_snapshots = true;
    }

    /// Snapshots report success without creating anything
    pub fn lose_snapshots(&self) {
        self.tree.lock().unwrap().lose_snapshots = true;
    }

    pub fn renames(&self) -> Vec<(String, String)> {
        self.tree.lock().unwrap().renames.clone()
    }

    fn relative(&self, path: &Path) -> Result<String> {
        path.strip_prefix(&self.mountpoint)
            .map(|rel| rel.to_string_lossy().into_owned())
            .map_err(|_| BtrfsError::SubvolumeNotFound(path.display().to_string()))
    }
}

fn is_below(name: &str, prefix: &str) -> bool {
    name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl SubvolumeBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn list(&self, _mountpoint: &Path, filesystem_uuid: &str) -> Result<Vec<Subvolume>> {
        Ok(self
            .tree
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|(name, (id, parent))| Subvolume {
                filesystem_uuid: filesystem_uuid.to_string(),
                ..Subvolume::new(*id, *parent, name.clone())
            })
            .collect())
    }

    fn info(&self, path: &Path) -> Result<SubvolumeInfo> {
        let name = self.relative(path)?;
        self.tree
            .lock()
            .unwrap()
            .entries
            .get(&name)
            .map(|(id, parent_id)| SubvolumeInfo {
                id: *id,
                parent_id: *parent_id,
            })
            .ok_or(BtrfsError::SubvolumeNotFound(name))
    }

    fn create_snapshot(&self, source: &Path, dest: &Path, _readonly: bool) -> Result<()> {
        let source = self.relative(source)?;
        let dest = self.relative(dest)?;
        let mut tree = self.tree.lock().unwrap();

        if tree.fail_snapshots {
            return Err(BtrfsError::OperationFailed("snapshot refused".to_string()));
        }
        let Some(&(source_id, _)) = tree.entries.get(&source) else {
            return Err(BtrfsError::SubvolumeNotFound(source));
        };
        if tree.lose_snapshots {
            return Ok(());
        }
        if tree.entries.contains_key(&dest) {
            return Err(BtrfsError::OperationFailed(format!("{} exists", dest)));
        }

        let id = tree.next_id;
        tree.next_id += 1;
        tree.entries.insert(dest.clone(), (id, 5));
        tree.sources.insert(dest, source_id);
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let name = self.relative(path)?;
        let mut tree = self.tree.lock().unwrap();
        tree.entries
            .remove(&name)
            .ok_or(BtrfsError::SubvolumeNotFound(name))?;
        Ok(())
    }

    fn rename(&self, source: &Path, target: &Path) -> Result<()> {
        let from = self.relative(source)?;
        let to = self.relative(target)?;
        let mut tree = self.tree.lock().unwrap();
        tree.renames.push((from.clone(), to.clone()));

        let rename_error = |reason: &str| BtrfsError::RenameFailure {
            source_path: source.to_path_buf(),
            target_path: target.to_path_buf(),
            reason: reason.to_string(),
        };

        if tree.failing_renames.contains(&from) {
            return Err(rename_error("injected failure"));
        }
        if !tree.entries.contains_key(&from) {
            return Err(rename_error("no such subvolume"));
        }
        if tree.entries.contains_key(&to) {
            return Err(rename_error("target exists"));
        }

        let moved: Vec<String> = tree
            .entries
            .keys()
            .filter(|name| is_below(name, &from))
            .cloned()
            .collect();
        for name in moved {
            if let Some(entry) = tree.entries.remove(&name) {
                let renamed = format!("{}{}", to, &name[from.len()..]);
                tree.entries.insert(renamed, entry);
            }
        }

        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.relative(path)
            .map(|name| self.contains(&name))
            .unwrap_or(false)
    }
}
