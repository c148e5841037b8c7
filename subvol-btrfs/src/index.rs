// SPDX-License-Identifier: GPL-3.0-only

//! Tree queries over one filesystem's subvolume map
//!
//! The map is an arena keyed by subvolume id; parent links are plain ids, so
//! a damaged parent chain shows up as [`BtrfsError::CorruptHierarchy`]
//! instead of a walk that never ends.

use std::cell::Cell;

use subvol_types::{BTRFS_ROOT_ID, Subvolume, SubvolumeMap};

use crate::error::{BtrfsError, Result};

/// Read-only view of a loaded subvolume map
#[derive(Debug)]
pub struct SubvolumeIndex<'a> {
    subvolumes: &'a SubvolumeMap,
    epoch: u64,
    walks: Cell<usize>,
}

impl<'a> SubvolumeIndex<'a> {
    /// `epoch` identifies the load the map came from
    pub fn new(subvolumes: &'a SubvolumeMap, epoch: u64) -> Self {
        Self {
            subvolumes,
            epoch,
            walks: Cell::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, id: u64) -> Option<&'a Subvolume> {
        self.subvolumes.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Subvolume> + use<'a> {
        self.subvolumes.values()
    }

    pub fn len(&self) -> usize {
        self.subvolumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subvolumes.is_empty()
    }

    /// Names of the direct children of `parent_id`
    pub fn children(&self, parent_id: u64) -> Vec<String> {
        self.child_ids(parent_id)
            .into_iter()
            .filter_map(|id| self.subvol_name(id).map(str::to_string))
            .collect()
    }

    pub fn child_ids(&self, parent_id: u64) -> Vec<u64> {
        if parent_id != BTRFS_ROOT_ID && !self.subvolumes.contains_key(&parent_id) {
            return Vec::new();
        }

        self.subvolumes
            .values()
            .filter(|subvol| subvol.parent_id == parent_id)
            .map(|subvol| subvol.id)
            .collect()
    }

    /// Id of the subvolume called `name`, surrounding whitespace ignored
    pub fn subvol_id(&self, name: &str) -> Option<u64> {
        let name = name.trim();
        self.subvolumes
            .values()
            .find(|subvol| subvol.name.trim() == name)
            .map(|subvol| subvol.id)
    }

    pub fn subvol_name(&self, id: u64) -> Option<&'a str> {
        self.subvolumes.get(&id).map(|subvol| subvol.name.as_str())
    }

    pub fn parent(&self, id: u64) -> Option<u64> {
        self.subvolumes.get(&id).map(|subvol| subvol.parent_id)
    }

    /// Every subvolume below `id`, parents before their children
    pub fn descendants(&self, id: u64) -> Vec<u64> {
        let mut found = Vec::new();
        let mut pending = self.child_ids(id);

        while let Some(next) = pending.pop() {
            // A cycle would revisit ids forever
            if found.contains(&next) || next == id {
                continue;
            }
            found.push(next);
            pending.extend(self.child_ids(next));
        }

        found
    }

    /// Direct children of `id` stored inside its directory tree, by name
    ///
    /// These are the subvolumes a restore has to carry over; each one moves
    /// together with whatever is nested below it.
    pub fn nested_children(&self, id: u64) -> Vec<String> {
        let Some(parent) = self.subvol_name(id) else {
            return Vec::new();
        };

        let mut nested: Vec<String> = self
            .children(id)
            .into_iter()
            .filter(|name| {
                name.strip_prefix(parent)
                    .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
            })
            .collect();
        nested.sort();
        nested
    }

    /// The ancestor of `id` that sits directly below the root subvolume
    ///
    /// A subvolume whose parent is the root is its own top parent.
    pub fn top_parent(&self, id: u64) -> Result<u64> {
        self.walks.set(self.walks.get() + 1);

        if id == BTRFS_ROOT_ID || !self.subvolumes.contains_key(&id) {
            return Err(BtrfsError::SubvolumeNotFound(format!("subvolume id {}", id)));
        }

        let mut current = id;
        // A chain can never be longer than the number of subvolumes
        for _ in 0..=self.subvolumes.len() {
            let parent = self
                .parent(current)
                .ok_or(BtrfsError::CorruptHierarchy(id))?;
            if parent == BTRFS_ROOT_ID {
                return Ok(current);
            }
            current = parent;
        }

        Err(BtrfsError::CorruptHierarchy(id))
    }

    /// How often [`Self::top_parent`] was called on this index
    pub fn walk_count(&self) -> usize {
        self.walks.get()
    }
}
