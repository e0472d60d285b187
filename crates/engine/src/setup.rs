// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! First-run initialization and syncer assembly

use crate::syncer::FileSyncer;
use amphora_adapters::{LocalfsFileClient, ObjectStore, PithosFileClient};
use amphora_core::{HeartBeat, Messager, SyncError, SyncSettings, SystemClock};
use amphora_storage::StateStore;
use std::sync::Arc;

/// Build a ready-to-run syncer over the given object store.
///
/// On the first run (no state database yet) both sides are enabled, the
/// local cache tree is created, and a missing container is created. On
/// later runs a missing root or container disables the corresponding side
/// instead; `purge_db_archives_and_enable` reverses that.
pub async fn build_syncer(
    settings: SyncSettings,
    api: Arc<dyn ObjectStore>,
) -> Result<Arc<FileSyncer>, SyncError> {
    let settings = Arc::new(settings);
    let db_path = settings.db_path();
    let db_existed = db_path.is_file();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SyncError::Sync(format!("creating settings dir: {e}")))?;
    }
    let store = Arc::new(StateStore::open(&db_path).map_err(SyncError::from)?);
    let messager = Arc::new(Messager::new(settings.message_capacity));
    let heartbeat = Arc::new(HeartBeat::new());

    let container_exists = api.container_exists().await.map_err(SyncError::from)?;
    if db_existed {
        if !settings.local_root.is_dir() {
            store.with_tx(|tx| tx.set_localfs_enabled(false)).map_err(SyncError::from)?;
        }
        if !container_exists {
            store.with_tx(|tx| tx.set_pithos_enabled(false)).map_err(SyncError::from)?;
        }
    } else {
        store
            .with_tx(|tx| {
                tx.set_localfs_enabled(true)?;
                tx.set_pithos_enabled(true)
            })
            .map_err(SyncError::from)?;
        settings
            .ensure_local_dirs()
            .map_err(|e| SyncError::Sync(format!("creating local dirs: {e}")))?;
        if !container_exists {
            tracing::warn!(container = %settings.container, "creating container");
            api.create_container().await.map_err(SyncError::from)?;
        }
    }

    let master = Arc::new(PithosFileClient::new(
        api,
        settings.clone(),
        store.clone(),
        messager.clone(),
    )?);
    let slave =
        Arc::new(LocalfsFileClient::new(settings.clone(), store.clone(), messager.clone())?);

    Ok(FileSyncer::new(settings, store, messager, heartbeat, SystemClock, master, slave))
}

#[cfg(test)]
#[path = "setup_tests.rs"]
mod tests;
