// SPDX-License-Identifier: GPL-3.0-only

//! Reading snapper's per-snapshot `info.xml`

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use subvol_types::SnapperSnapshot;

use crate::error::Result;

/// Leaf elements; `info.xml` has a single level below `<snapshot>` apart from userdata
static ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(\w+)>([^<]*)</(\w+)>").unwrap_or_else(|e| panic!("invalid element regex: {e}"))
});

pub fn read_snapper_meta(path: &Path) -> Result<SnapperSnapshot> {
    let content = fs::read_to_string(path)?;
    Ok(parse_snapper_meta(&content))
}

/// Missing or malformed fields are left at their defaults, number 0 included
pub fn parse_snapper_meta(content: &str) -> SnapperSnapshot {
    let mut snapshot = SnapperSnapshot::default();
    let mut seen = Vec::new();

    for caps in ELEMENT.captures_iter(content) {
        let (Some(name), Some(value), Some(close)) = (caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let name = name.as_str();
        if name != close.as_str() || seen.contains(&name) {
            continue;
        }
        seen.push(name);

        let value = unescape(value.as_str().trim());
        match name {
            "num" => snapshot.number = value.parse().unwrap_or(0),
            "date" => {
                // Dates are written in UTC
                snapshot.time = NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive).with_timezone(&Local));
            }
            "description" => snapshot.description = value,
            "type" => snapshot.kind = value,
            _ => {}
        }
    }

    snapshot
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
