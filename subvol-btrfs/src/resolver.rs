// SPDX-License-Identifier: GPL-3.0-only

//! Mapping snapshot containers to the subvolume they take snapshots of

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BtrfsError, Result};
use crate::index::SubvolumeIndex;

static SNAPSHOT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/[0-9]+/snapshot$").unwrap_or_else(|e| panic!("invalid snapshot regex: {e}"))
});

/// Whether `path` names a snapper snapshot, i.e. ends with `/<number>/snapshot`
pub fn is_snapper(path: &str) -> bool {
    SNAPSHOT_SUFFIX.is_match(path)
}

/// The container holding the numbered snapshot at `path`
///
/// `@/.snapshots/12/snapshot` gives `@/.snapshots`.
pub fn find_snapshot_subvolume(path: &str) -> Option<&str> {
    SNAPSHOT_SUFFIX.find(path).map(|m| &path[..m.start()])
}

/// Snapshots of a container that always belong to `target` on filesystem `uuid`
///
/// Needed for layouts keeping snapshots in a container at the filesystem
/// root, such as `@snapshots` holding snapshots of `@`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMapping {
    pub target: String,
    pub uuid: String,
}

#[derive(Debug, Clone)]
struct CachedTarget {
    target: String,
    epoch: u64,
}

/// Resolves and caches the target of each snapshot container
#[derive(Debug, Default)]
pub struct SnapshotTargetResolver {
    cache: HashMap<(String, String), CachedTarget>,
    /// Configured targets, never invalidated by reloads
    pinned: HashMap<(String, String), String>,
}

impl SnapshotTargetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve snapshots in `container` to the configured target instead of walking the tree
    pub fn pin(&mut self, container: &str, mapping: &TargetMapping) {
        tracing::debug!(
            "Snapshots in {} of {} are mapped to '{}'",
            container,
            mapping.uuid,
            mapping.target
        );
        self.pinned.insert(
            (container.to_string(), mapping.uuid.clone()),
            mapping.target.clone(),
        );
    }

    /// Name of the subvolume the snapshot at `snapshot_path` was taken of
    ///
    /// Snapshots kept in a container directly below the filesystem root
    /// resolve to the empty name, the root subvolume itself. Entries cached
    /// against an older load of the index are resolved again.
    pub fn resolve_target(
        &mut self,
        index: &SubvolumeIndex<'_>,
        snapshot_path: &str,
        uuid: &str,
    ) -> Result<String> {
        let prefix = find_snapshot_subvolume(snapshot_path)
            .ok_or_else(|| BtrfsError::NotASnapshot(snapshot_path.to_string()))?;

        let key = (prefix.to_string(), uuid.to_string());
        if let Some(target) = self.pinned.get(&key) {
            return Ok(target.clone());
        }
        if let Some(cached) = self.cache.get(&key) {
            if cached.epoch == index.epoch() {
                return Ok(cached.target.clone());
            }
        }

        let container = index
            .subvol_id(prefix)
            .ok_or_else(|| BtrfsError::SubvolumeNotFound(prefix.to_string()))?;
        let top = index.top_parent(container)?;

        let target = if top == container {
            String::new()
        } else {
            index.subvol_name(top).unwrap_or_default().to_string()
        };

        tracing::debug!("Snapshots in {} belong to '{}'", prefix, target);
        self.cache.insert(
            key,
            CachedTarget {
                target: target.clone(),
                epoch: index.epoch(),
            },
        );

        Ok(target)
    }

    /// Cached target of `prefix`, whatever load it came from
    pub fn cached_target(&self, prefix: &str, uuid: &str) -> Option<&str> {
        self.cache
            .get(&(prefix.to_string(), uuid.to_string()))
            .map(|cached| cached.target.as_str())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subvol_types::{Subvolume, SubvolumeMap};

    fn map() -> SubvolumeMap {
        [
            Subvolume::new(256, 5, "@"),
            Subvolume::new(260, 256, "@/.snapshots"),
            Subvolume::new(300, 260, "@/.snapshots/5/snapshot"),
            Subvolume::new(301, 260, "@/.snapshots/6/snapshot"),
            Subvolume::new(270, 5, ".snapshots"),
            Subvolume::new(310, 270, ".snapshots/1/snapshot"),
        ]
        .into_iter()
        .map(|subvol| (subvol.id, subvol))
        .collect()
    }

    #[test]
    fn strips_the_numbered_snapshot_suffix() {
        assert_eq!(find_snapshot_subvolume("@/.snapshots/12/snapshot"), Some("@/.snapshots"));
        assert_eq!(find_snapshot_subvolume("@home/.snapshots/0/snapshot"), Some("@home/.snapshots"));
        assert_eq!(find_snapshot_subvolume("@/.snapshots/x/snapshot"), None);
        assert_eq!(find_snapshot_subvolume("@/.snapshots/12/snapshot/var"), None);
        assert_eq!(find_snapshot_subvolume("@"), None);
        assert!(is_snapper("a/1/snapshot"));
        assert!(!is_snapper("a/1/snapshots"));
    }

    #[test]
    fn resolves_nested_and_root_level_containers() {
        let subvols = map();
        let index = SubvolumeIndex::new(&subvols, 1);
        let mut resolver = SnapshotTargetResolver::new();

        assert_eq!(resolver.resolve_target(&index, "@/.snapshots/5/snapshot", "fs").unwrap(), "@");
        assert_eq!(resolver.resolve_target(&index, ".snapshots/1/snapshot", "fs").unwrap(), "");
        assert!(matches!(
            resolver.resolve_target(&index, "@", "fs"),
            Err(BtrfsError::NotASnapshot(_))
        ));
    }

    #[test]
    fn repeated_prefixes_are_served_from_the_cache() {
        let subvols = map();
        let index = SubvolumeIndex::new(&subvols, 1);
        let mut resolver = SnapshotTargetResolver::new();

        let first = resolver.resolve_target(&index, "@/.snapshots/5/snapshot", "fs").unwrap();
        let second = resolver.resolve_target(&index, "@/.snapshots/6/snapshot", "fs").unwrap();
        assert_eq!(first, second);
        assert_eq!(index.walk_count(), 1);
        assert_eq!(resolver.cached_target("@/.snapshots", "fs"), Some("@"));

        // Same prefix on another filesystem is a separate entry
        resolver.resolve_target(&index, "@/.snapshots/5/snapshot", "other").unwrap();
        assert_eq!(index.walk_count(), 2);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn reloaded_index_invalidates_cached_targets() {
        let subvols = map();
        let mut resolver = SnapshotTargetResolver::new();

        let old = SubvolumeIndex::new(&subvols, 1);
        resolver.resolve_target(&old, "@/.snapshots/5/snapshot", "fs").unwrap();

        let reloaded = SubvolumeIndex::new(&subvols, 2);
        resolver.resolve_target(&reloaded, "@/.snapshots/5/snapshot", "fs").unwrap();
        assert_eq!(reloaded.walk_count(), 1);
    }

    #[test]
    fn configured_targets_win_over_the_tree() {
        let subvols: SubvolumeMap = [
            Subvolume::new(256, 5, "@"),
            Subvolume::new(257, 5, "@snapshots"),
            Subvolume::new(300, 257, "@snapshots/5/snapshot"),
        ]
        .into_iter()
        .map(|subvol| (subvol.id, subvol))
        .collect();
        let index = SubvolumeIndex::new(&subvols, 1);

        let mut resolver = SnapshotTargetResolver::new();
        assert_eq!(resolver.resolve_target(&index, "@snapshots/5/snapshot", "fs").unwrap(), "");

        let mut resolver = SnapshotTargetResolver::new();
        resolver.pin(
            "@snapshots",
            &TargetMapping {
                target: "@".to_string(),
                uuid: "fs".to_string(),
            },
        );
        assert_eq!(resolver.resolve_target(&index, "@snapshots/5/snapshot", "fs").unwrap(), "@");
        assert_eq!(index.walk_count(), 1);

        // The mapping only applies to the filesystem it names
        assert_eq!(resolver.resolve_target(&index, "@snapshots/5/snapshot", "other").unwrap(), "");
    }
}
