// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source-side staging for the remote archive

use super::api::ObjectStore;
use super::{PITHOS_ETAG, PITHOS_TYPE};
use crate::client::SourceHandle;
use amphora_core::{
    util, ArchiveTag, FileInfo, FileState, Message, Messager, ObjectName, SyncError, SyncSettings,
    T_DIR, T_FILE, T_UNHANDLED,
};
use amphora_storage::StateStore;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Client column value for fetch-name reservations.
const SIGNATURE: &str = "pithos-fetch";

/// Downloads one remote object into the cache for the local target leg.
pub struct PithosSourceHandle {
    api: Arc<dyn ObjectStore>,
    settings: Arc<SyncSettings>,
    store: Arc<StateStore>,
    messager: Arc<Messager>,
    archive: ArchiveTag,
    source_state: FileState,
    objname: ObjectName,
    fetch_filename: Option<String>,
    fetched: Option<PathBuf>,
}

impl PithosSourceHandle {
    pub(crate) fn new(
        api: Arc<dyn ObjectStore>,
        settings: Arc<SyncSettings>,
        store: Arc<StateStore>,
        messager: Arc<Messager>,
        archive: ArchiveTag,
        source_state: FileState,
    ) -> Self {
        let objname = source_state.objname.clone();
        Self {
            api,
            settings,
            store,
            messager,
            archive,
            source_state,
            objname,
            fetch_filename: None,
            fetched: None,
        }
    }

    fn register_fetch_name(&mut self) -> Result<PathBuf, SyncError> {
        let file = format!(
            "{}_{}",
            util::hash_name(self.objname.as_str()),
            util::unix_time_stamp()
        );
        let member = self.settings.cache_member_name(&self.settings.cache_fetch_name, &file);
        let path = self.settings.cache_path().join(&member);
        self.store.with_tx(|tx| tx.insert_cachename(&member, SIGNATURE, &self.objname))?;
        self.fetch_filename = Some(member);
        self.fetched = Some(path.clone());
        Ok(path)
    }

    fn check_update_source_state(&mut self, actual: FileInfo) -> Result<(), SyncError> {
        if actual == self.source_state.info {
            return Ok(());
        }
        self.messager.put(Message::LiveInfoUpdate {
            archive: self.archive.clone(),
            objname: self.objname.clone(),
            info: actual.clone(),
        });
        let new_state = self.source_state.clone().with_info(actual);
        self.store.with_tx(|tx| tx.put_state(&new_state))?;
        self.source_state = new_state;
        Ok(())
    }
}

#[async_trait]
impl SourceHandle for PithosSourceHandle {
    async fn send_file(&mut self, _sync_state: &FileState) -> Result<PathBuf, SyncError> {
        let path = self.register_fetch_name()?;
        tracing::info!(objname = %self.objname, dest = %path.display(), "downloading object");
        let meta = self.api.download(self.objname.as_str(), &path).await.map_err(SyncError::from)?;
        let actual = match &meta {
            Some(obj) => {
                let mut info = FileInfo::empty()
                    .with(PITHOS_TYPE, if obj.is_dir() { T_DIR } else { T_FILE });
                if let Some(etag) = &obj.etag {
                    info.insert(PITHOS_ETAG, etag.as_str());
                }
                info
            }
            None => FileInfo::empty(),
        };
        self.check_update_source_state(actual.clone())?;
        if actual.is_empty() {
            tracing::info!(objname = %self.objname, "object is gone");
            let _ = std::fs::remove_file(&path);
        } else if actual.get_str(PITHOS_TYPE) == Some(T_DIR) {
            tracing::info!(objname = %self.objname, "object is a directory");
            let _ = std::fs::remove_file(&path);
            std::fs::create_dir_all(&path)
                .map_err(|e| SyncError::Sync(format!("creating fetch dir: {e}")))?;
        }
        Ok(path)
    }

    fn get_synced_state(&self) -> FileState {
        self.source_state.clone()
    }

    async fn unstage_file(&mut self) -> Result<(), SyncError> {
        if let Some(path) = self.fetched.take() {
            match std::fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => {
                    let _ = std::fs::remove_dir(&path);
                }
                Ok(_) => {
                    let _ = std::fs::remove_file(&path);
                }
                Err(_) => {}
            }
        }
        if let Some(member) = self.fetch_filename.take() {
            self.store.with_tx(|tx| tx.delete_cachename(&member))?;
        }
        Ok(())
    }

    fn staged_path(&self) -> Option<PathBuf> {
        self.fetched.clone()
    }

    fn info_is_dir(&self) -> bool {
        self.source_state.info.get_str(PITHOS_TYPE) == Some(T_DIR)
    }

    fn info_is_deleted_or_unhandled(&self) -> bool {
        self.source_state.info.is_empty()
            || self.source_state.info.get_str(PITHOS_TYPE) == Some(T_UNHANDLED)
    }
}
