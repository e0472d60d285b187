// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem notifier for the local archive

use crate::client::CandidateMap;
use amphora_core::{ArchiveTag, Message, Messager, ObjectName, SyncError, SyncSettings};
use amphora_storage::StateStore;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) struct WatcherDeps {
    pub settings: Arc<SyncSettings>,
    pub store: Arc<StateStore>,
    pub messager: Arc<Messager>,
    pub candidates: Arc<CandidateMap>,
    pub archive: ArchiveTag,
}

/// Translate one watcher path into candidate entries.
///
/// Events under the cache sub-tree are ignored; a removal of the root
/// itself disables local sync. Removals and renames of directories also
/// enqueue the database-known children, since the watcher reports only the
/// top-most path.
fn handle_path(deps: &WatcherDeps, path: &Path, removal: bool) {
    let root = &deps.settings.local_root;
    let cache = deps.settings.cache_path();
    if path.starts_with(&cache) {
        return;
    }
    if removal && path == root.as_path() {
        let disabled = deps.store.with_tx(|tx| tx.set_localfs_enabled(false));
        if let Err(err) = disabled {
            tracing::error!(error = %err, "failed to persist localfs disable");
        }
        deps.messager.put(Message::LocalfsSyncDisabled);
        return;
    }
    let Ok(rel) = path.strip_prefix(root) else {
        return;
    };
    let Some(objname) = ObjectName::from_local(rel) else {
        return;
    };
    if removal {
        let children = deps
            .store
            .with_tx(|tx| tx.get_dir_contents(&deps.archive, &objname))
            .unwrap_or_default();
        for child in children {
            deps.candidates.add(child);
        }
    }
    deps.candidates.add(objname);
}

fn handle_event(deps: &WatcherDeps, event: notify::Event) {
    let removal = matches!(event.kind, EventKind::Remove(_))
        || matches!(event.kind, EventKind::Modify(ModifyKind::Name(_)));
    for path in &event.paths {
        handle_path(deps, path, removal);
    }
}

/// Watch the local root and deposit changed names into the candidate map.
pub(crate) fn spawn(deps: WatcherDeps) -> Result<RecommendedWatcher, SyncError> {
    let root: PathBuf = deps.settings.local_root.clone();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => handle_event(&deps, event),
            Err(err) => tracing::warn!(error = %err, "filesystem watcher error"),
        }
    })
    .map_err(|e| SyncError::Sync(format!("starting filesystem watcher: {e}")))?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| SyncError::Sync(format!("watching '{}': {e}", root.display())))?;
    Ok(watcher)
}
