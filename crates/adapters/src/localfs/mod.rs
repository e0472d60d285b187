// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local filesystem archive client

pub mod fsinfo;
mod source;
mod target;
mod watcher;

pub use source::LocalfsSourceHandle;
pub use target::LocalfsTargetHandle;

use crate::client::{
    ArchiveClient, CandidateMap, NotifierHandle, SourceHandle, TargetHandle,
};
use amphora_core::{
    ArchiveTag, ClaimId, FileState, Message, Messager, ObjectName, SyncError, SyncSettings,
};
use amphora_storage::StateStore;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Archive signature of the local side.
pub const LOCALFS_SIGNATURE: &str = "localfs";

/// Editor droppings and lock files that must never be synced.
fn excluded_final_segment(name: &str) -> bool {
    name.starts_with(".#")
        || name.starts_with(".~")
        || name.starts_with("~$")
        || (name.starts_with('~') && name.ends_with(".tmp"))
        || (name.starts_with('.') && name.ends_with(".swp"))
}

/// The local directory as an archive.
pub struct LocalfsFileClient {
    settings: Arc<SyncSettings>,
    store: Arc<StateStore>,
    messager: Arc<Messager>,
    candidates: Arc<CandidateMap>,
}

impl LocalfsFileClient {
    pub fn new(
        settings: Arc<SyncSettings>,
        store: Arc<StateStore>,
        messager: Arc<Messager>,
    ) -> Result<Self, SyncError> {
        let client =
            Self { settings, store, messager, candidates: Arc::new(CandidateMap::new()) };
        client.check_enabled()?;
        Ok(client)
    }

    fn check_enabled(&self) -> Result<(), SyncError> {
        let enabled = self.store.with_tx(|tx| tx.localfs_enabled())?;
        let msg =
            if enabled { Message::LocalfsSyncEnabled } else { Message::LocalfsSyncDisabled };
        self.messager.put(msg);
        Ok(())
    }

    fn exclude_file(&self, objname: &ObjectName) -> bool {
        objname.first_segment() == self.settings.cache_name
            || excluded_final_segment(objname.final_segment())
    }

    fn disable(&self) -> Result<(), SyncError> {
        self.store.with_tx(|tx| tx.set_localfs_enabled(false))?;
        self.messager.put(Message::LocalfsSyncDisabled);
        Ok(())
    }

    /// Full walk of the root, unioned with the names the database already
    /// knows so deletions are probed even without a notifier event.
    fn walk_filesystem(&self) -> Result<BTreeSet<ObjectName>, SyncError> {
        let root = &self.settings.local_root;
        let cache = self.settings.cache_path();
        let mut found = BTreeSet::new();
        for entry in walkdir::WalkDir::new(root).min_depth(1).into_iter().filter_entry(|e| {
            !e.path().starts_with(&cache)
        }) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry during walk");
                    continue;
                }
            };
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            if let Some(objname) = ObjectName::from_local(rel) {
                found.insert(objname);
            }
        }
        let known = self
            .store
            .with_tx(|tx| tx.list_files(&self.signature(), None))?;
        found.extend(known);
        Ok(found)
    }
}

#[async_trait]
impl ArchiveClient for LocalfsFileClient {
    fn signature(&self) -> ArchiveTag {
        ArchiveTag::new(LOCALFS_SIGNATURE)
    }

    async fn list_candidate_files(&self, forced: bool) -> Result<Vec<ObjectName>, SyncError> {
        if !self.store.with_tx(|tx| tx.localfs_enabled())? {
            return Ok(Vec::new());
        }
        if !self.settings.local_root.is_dir() {
            self.disable()?;
            return Ok(Vec::new());
        }
        if forced {
            for objname in self.walk_filesystem()? {
                self.candidates.add(objname);
            }
        }
        Ok(self.candidates.names())
    }

    fn remove_candidates(&self, names: &[ObjectName], claim: ClaimId) {
        self.candidates.remove_claimed(names, claim);
    }

    async fn probe_file(
        &self,
        objname: &ObjectName,
        old_state: &FileState,
        _ref_state: &FileState,
        claim: ClaimId,
    ) -> Result<Option<FileState>, SyncError> {
        let cached = self.candidates.claim(objname, claim);
        if self.exclude_file(objname) {
            self.messager.put(Message::IgnoreProbe {
                archive: old_state.archive.clone(),
                objname: objname.clone(),
            });
            return Ok(None);
        }
        let live = match cached {
            Some(info) => Some(info),
            None => {
                let path = objname.to_local(&self.settings.local_root);
                fsinfo::local_path_changes(
                    &path,
                    &old_state.info,
                    self.settings.mtime_precision,
                    self.settings.case_insensitive,
                    true,
                )
                .map_err(|e| SyncError::Sync(format!("probing '{objname}': {e}")))?
            }
        };
        Ok(live.map(|info| old_state.clone().with_info(info)))
    }

    async fn stage_file(
        &self,
        source_state: FileState,
    ) -> Result<Box<dyn SourceHandle>, SyncError> {
        let mut handle = LocalfsSourceHandle::new(
            self.settings.clone(),
            self.store.clone(),
            self.messager.clone(),
            self.signature(),
            source_state,
        );
        handle.stage()?;
        Ok(Box::new(handle))
    }

    fn prepare_target(&self, target_state: FileState) -> Box<dyn TargetHandle> {
        Box::new(LocalfsTargetHandle::new(
            self.settings.clone(),
            self.store.clone(),
            self.messager.clone(),
            target_state,
        ))
    }

    fn notifier(&self) -> Result<NotifierHandle, SyncError> {
        let deps = watcher::WatcherDeps {
            settings: self.settings.clone(),
            store: self.store.clone(),
            messager: self.messager.clone(),
            candidates: self.candidates.clone(),
            archive: self.signature(),
        };
        Ok(NotifierHandle::watcher(watcher::spawn(deps)?))
    }

    async fn ensure_ready(&self) -> Result<(), SyncError> {
        self.settings
            .ensure_local_dirs()
            .map_err(|e| SyncError::Sync(format!("creating local dirs: {e}")))
    }
}

#[cfg(test)]
#[path = "localfs_tests.rs"]
mod tests;
