// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

/// Referenced and exclusive bytes of a level-0 qgroup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QgroupSizes {
    pub referenced: u64,
    pub exclusive: u64,
}

/// Parse `btrfs qgroup show --raw --sync <mountpoint>` keyed by subvolume id
///
/// The first two lines are the column header and its underline.
pub fn parse_qgroup_show(output: &str) -> BTreeMap<u64, QgroupSizes> {
    let mut sizes = BTreeMap::new();

    for line in output.lines().skip(2) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 3 {
            continue;
        }

        let Some((level, id)) = cols[0].split_once('/') else {
            continue;
        };
        // Higher level qgroups aggregate several subvolumes
        if level != "0" {
            continue;
        }

        let (Ok(id), Ok(referenced), Ok(exclusive)) =
            (id.parse::<u64>(), cols[1].parse::<u64>(), cols[2].parse::<u64>())
        else {
            continue;
        };

        sizes.insert(
            id,
            QgroupSizes {
                referenced,
                exclusive,
            },
        );
    }

    sizes
}
