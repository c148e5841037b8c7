// SPDX-License-Identifier: GPL-3.0-only

use subvol_types::FilesystemUsage;

/// Parse the output of `btrfs filesystem usage -b <mountpoint>`
pub fn parse_filesystem_usage(output: &str) -> FilesystemUsage {
    let mut usage = FilesystemUsage::default();

    for line in output.lines() {
        let cols: Vec<&str> = line.split(':').collect();
        if cols.len() < 2 {
            continue;
        }

        let kind = cols[0].trim();
        match kind {
            "Device size" => usage.total_size = first_number(cols[1]),
            "Device allocated" => usage.allocated_size = first_number(cols[1]),
            "Used" => usage.used_size = first_number(cols[1]),
            "Free (estimated)" => usage.free_size = first_number(cols[1]),
            _ => {
                // "Data,single: Size:8388608, Used:4096 (0.05%)"
                let Some((size, used)) = block_group_sizes(&cols) else {
                    continue;
                };
                if kind.starts_with("Data,") {
                    usage.data_size = size;
                    usage.data_used = used;
                } else if kind.starts_with("Metadata,") {
                    usage.meta_size = size;
                    usage.meta_used = used;
                } else if kind.starts_with("System,") {
                    usage.sys_size = size;
                    usage.sys_used = used;
                }
            }
        }
    }

    usage
}

fn block_group_sizes(cols: &[&str]) -> Option<(u64, u64)> {
    if cols.len() < 4 {
        return None;
    }

    let size = cols[2].split(',').next()?.trim().parse().ok()?;
    let used = cols[3].split_whitespace().next()?.trim().parse().ok()?;
    Some((size, used))
}

fn first_number(value: &str) -> u64 {
    value
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
