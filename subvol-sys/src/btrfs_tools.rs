// SPDX-License-Identifier: GPL-3.0-only

//! Parsers for the text output of the `btrfs` command line tool

use std::collections::BTreeSet;

use subvol_types::Subvolume;
use uuid::Uuid;

/// Id and parent of a single subvolume, from `btrfs subvolume show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubvolumeShow {
    /// Path relative to the filesystem root, empty for the root itself
    pub path: String,
    pub id: u64,
    pub parent_id: u64,
}

/// Filesystem UUIDs from `btrfs filesystem show -m`
pub fn parse_filesystem_uuids(output: &str) -> Vec<String> {
    let mut uuids = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("Label:") {
            continue;
        }

        let uuid = line
            .split("uuid:")
            .nth(1)
            .map(str::trim)
            .unwrap_or_default();

        if !uuid.is_empty() && !uuids.iter().any(|known| known == uuid) {
            uuids.push(uuid.to_string());
        }
    }

    uuids
}

/// Subvolumes from `btrfs subvolume list -p -u -q -R <mountpoint>`
///
/// A line looks like
/// `ID 256 gen 89534 parent 5 top level 5 parent_uuid - received_uuid - uuid <uuid> path @`
pub fn parse_subvolume_list(output: &str, filesystem_uuid: &str) -> Vec<Subvolume> {
    let mut subvolumes = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts[0] != "ID" {
            continue;
        }

        // Everything after "path" is the name, which may contain spaces
        let Some(path_idx) = parts.iter().position(|&p| p == "path") else {
            continue;
        };
        let mut name = parts[path_idx + 1..].join(" ");
        if let Some(stripped) = name.strip_prefix("<FS_TREE>/") {
            name = stripped.to_string();
        }

        let Some(id) = parts[1].parse::<u64>().ok() else {
            continue;
        };

        let value_after = |keyword: &str| -> Option<&str> {
            let idx = parts[..path_idx].iter().position(|&p| p == keyword)?;
            parts.get(idx + 1).copied()
        };

        let Some(parent_id) = value_after("parent").and_then(|v| v.parse::<u64>().ok()) else {
            continue;
        };

        subvolumes.push(Subvolume {
            id,
            parent_id,
            name,
            filesystem_uuid: filesystem_uuid.to_string(),
            uuid: value_after("uuid").and_then(parse_uuid),
            parent_uuid: value_after("parent_uuid").and_then(parse_uuid),
            received_uuid: value_after("received_uuid").and_then(parse_uuid),
            generation: value_after("gen")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            ..Subvolume::default()
        });
    }

    if subvolumes.is_empty() && !output.trim().is_empty() {
        tracing::warn!("No subvolumes found - output may not have been parsed correctly");
    }

    subvolumes
}

/// Ids from a plain `btrfs subvolume list` run, used with `-r` to find read-only subvolumes
pub fn parse_subvolume_ids(output: &str) -> BTreeSet<u64> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("ID"), Some(id)) => id.parse().ok(),
                _ => None,
            }
        })
        .collect()
}

/// Output of `btrfs subvolume show <path>`
pub fn parse_subvolume_show(output: &str) -> Option<SubvolumeShow> {
    let mut lines = output.lines();
    let first = lines.next()?.trim();
    // The root subvolume is reported as "/" or "<FS_TREE>"
    let path = if first == "/" || first == "<FS_TREE>" {
        String::new()
    } else {
        first.to_string()
    };

    let mut id = None;
    let mut parent_id = None;
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Subvolume ID" => id = value.trim().parse::<u64>().ok(),
            "Parent ID" => parent_id = value.trim().parse::<u64>().ok(),
            _ => {}
        }
    }

    Some(SubvolumeShow {
        path,
        id: id?,
        parent_id: parent_id.unwrap_or(0),
    })
}

/// Btrfs UUIDs are printed as `-` when unset
fn parse_uuid(value: &str) -> Option<Uuid> {
    if value == "-" {
        return None;
    }

    Uuid::parse_str(value).ok().filter(|uuid| !uuid.is_nil())
}
