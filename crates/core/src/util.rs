// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Small shared helpers: name hashing, stash naming, node identity

use sha2::{Digest, Sha256};

/// Hex sha256 of a name, used to derive collision-free cache file names.
pub fn hash_name(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identity of this machine, embedded in stash names so stashes created by
/// different machines over a shared remote stay distinguishable.
pub fn node_name() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    if let Ok(raw) = std::fs::read_to_string("/etc/hostname") {
        let name = raw.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    "localhost".to_string()
}

/// ISO-ish timestamp with `:` replaced so it is a legal file name everywhere.
pub fn str_time_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H.%M.%S%.6f").to_string()
}

/// Seconds since the epoch, for fetch-name uniqueness.
pub fn unix_time_stamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn is_stash_time_stamp(raw: &str) -> bool {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H.%M.%S%.f").is_ok()
}

/// Strip a previous `_<iso-ts>_<node>` stash suffix, if present, so
/// re-stashed files do not accumulate suffixes.
pub fn get_orig_name(filename: &str) -> &str {
    let parts: Vec<&str> = filename.split('_').collect();
    if parts.len() < 3 {
        return filename;
    }
    let node = node_name();
    if parts[parts.len() - 1] != node || !is_stash_time_stamp(parts[parts.len() - 2]) {
        return filename;
    }
    let keep = parts.len() - 2;
    let orig_len: usize =
        parts[..keep].iter().map(|p| p.len()).sum::<usize>() + keep.saturating_sub(1);
    if orig_len == 0 {
        return filename;
    }
    &filename[..orig_len]
}

/// Stash name placed next to the original: `<orig>_<iso-timestamp>_<node>`.
pub fn mk_stash_name(filename: &str) -> String {
    format!("{}_{}_{}", get_orig_name(filename), str_time_stamp(), node_name())
}

#[cfg(test)]
#[path = "util_tests.rs"]
mod tests;
