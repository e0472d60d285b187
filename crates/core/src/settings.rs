// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Immutable runtime configuration

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config key gating the local archive.
pub const CONFIG_LOCALFS_ENABLED: &str = "localfs_enabled";
/// Config key gating the remote archive.
pub const CONFIG_PITHOS_ENABLED: &str = "pithos_enabled";

pub const DEFAULT_CACHE_NAME: &str = ".amphora_cache";
pub const DEFAULT_CACHE_HIDE_NAME: &str = "hidden";
pub const DEFAULT_CACHE_STAGE_NAME: &str = "staged";
pub const DEFAULT_CACHE_FETCH_NAME: &str = "fetched";
pub const DEFAULT_SETTINGS_DIR: &str = ".amphora";
pub const DEFAULT_DB_NAME: &str = "syncer.db";

/// Runtime configuration shared by the store, the clients, and the syncer.
///
/// Durations are seconds. The struct is built once and then only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Root of the local archive.
    pub local_root: PathBuf,
    /// Remote container holding the remote archive.
    pub container: String,
    /// Per-instance state directory, outside the local root.
    pub settings_dir: PathBuf,
    /// State database file name under the settings directory.
    pub db_name: String,
    /// Name of the cache sub-tree under the local root. Never synced.
    pub cache_name: String,
    pub cache_hide_name: String,
    pub cache_stage_name: String,
    pub cache_fetch_name: String,
    /// How long a dead worker's heartbeat keeps blocking decides.
    pub action_max_wait: f64,
    /// Period of the remote container poller.
    pub pithos_list_interval: f64,
    /// Period of the decide loop.
    pub decide_interval: f64,
    /// Cap on concurrently running sync workers.
    pub max_alive_sync_threads: usize,
    /// Tolerance when comparing local mtimes, in seconds.
    pub mtime_precision: f64,
    /// Settle delay before linking a fetched file into place.
    pub mtime_lag: f64,
    /// Retries for remote requests before giving up.
    pub connection_retry_limit: u32,
    /// Capacity of the messager queue.
    pub message_capacity: usize,
    /// Whether the local filesystem folds case.
    pub case_insensitive: bool,
}

impl SyncSettings {
    pub fn new(local_root: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        let settings_dir = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(DEFAULT_SETTINGS_DIR))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_DIR));
        Self {
            local_root: local_root.into(),
            container: container.into(),
            settings_dir,
            db_name: DEFAULT_DB_NAME.to_string(),
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            cache_hide_name: DEFAULT_CACHE_HIDE_NAME.to_string(),
            cache_stage_name: DEFAULT_CACHE_STAGE_NAME.to_string(),
            cache_fetch_name: DEFAULT_CACHE_FETCH_NAME.to_string(),
            action_max_wait: 10.0,
            pithos_list_interval: 5.0,
            decide_interval: 3.0,
            max_alive_sync_threads: 5,
            mtime_precision: 1e-4,
            mtime_lag: 0.0,
            connection_retry_limit: 3,
            message_capacity: 1024,
            case_insensitive: cfg!(any(target_os = "windows", target_os = "macos")),
        }
    }

    /// Location of the per-instance state database.
    pub fn db_path(&self) -> PathBuf {
        self.settings_dir.join(&self.db_name)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.local_root.join(&self.cache_name)
    }

    pub fn cache_hide_path(&self) -> PathBuf {
        self.cache_path().join(&self.cache_hide_name)
    }

    pub fn cache_stage_path(&self) -> PathBuf {
        self.cache_path().join(&self.cache_stage_name)
    }

    pub fn cache_fetch_path(&self) -> PathBuf {
        self.cache_path().join(&self.cache_fetch_name)
    }

    /// Portable cache file name under the cache sub-tree.
    pub fn cache_member_name(&self, sub: &str, file: &str) -> String {
        format!("{sub}/{file}")
    }

    pub fn action_max_wait_ms(&self) -> u64 {
        (self.action_max_wait * 1000.0) as u64
    }

    pub fn decide_period(&self) -> Duration {
        Duration::from_secs_f64(self.decide_interval)
    }

    pub fn pithos_list_period(&self) -> Duration {
        Duration::from_secs_f64(self.pithos_list_interval)
    }

    /// Create the local root and the cache sub-directories.
    pub fn ensure_local_dirs(&self) -> io::Result<()> {
        create_dir(&self.local_root)?;
        create_dir(&self.cache_path())?;
        create_dir(&self.cache_hide_path())?;
        create_dir(&self.cache_stage_path())?;
        create_dir(&self.cache_fetch_path())
    }
}

fn create_dir(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("cannot create dir '{}'; file exists", path.display()),
        ));
    }
    std::fs::create_dir_all(path)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
