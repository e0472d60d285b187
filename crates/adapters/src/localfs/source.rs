// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source-side staging for the local archive

use super::fsinfo::{
    file_is_open, files_equal, info_of_regular_file, is_info_eq, live_info, LOCALFS_TYPE,
};
use crate::client::SourceHandle;
use amphora_core::{
    util, ArchiveTag, FileState, Message, Messager, ObjectName, SyncError, SyncSettings, T_DIR,
    T_UNHANDLED,
};
use amphora_storage::StateStore;
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Client column value for staged-name reservations.
const SIGNATURE: &str = "localfs-source";

/// Snapshot of a local file, pinned under the cache while it is uploaded.
pub struct LocalfsSourceHandle {
    settings: Arc<SyncSettings>,
    store: Arc<StateStore>,
    messager: Arc<Messager>,
    archive: ArchiveTag,
    source_state: FileState,
    objname: ObjectName,
    fspath: PathBuf,
    stage_filename: Option<String>,
    staged: Option<PathBuf>,
}

fn io_sync(context: &str, err: io::Error) -> SyncError {
    SyncError::Sync(format!("{context}: {err}"))
}

impl LocalfsSourceHandle {
    pub(crate) fn new(
        settings: Arc<SyncSettings>,
        store: Arc<StateStore>,
        messager: Arc<Messager>,
        archive: ArchiveTag,
        source_state: FileState,
    ) -> Self {
        let objname = source_state.objname.clone();
        let fspath = objname.to_local(&settings.local_root);
        Self {
            settings,
            store,
            messager,
            archive,
            source_state,
            objname,
            fspath,
            stage_filename: None,
            staged: None,
        }
    }

    /// Pin the live file under the cache and verify it held still.
    ///
    /// Directory and deleted sources have nothing to stage; the target leg
    /// works from the recorded info alone.
    pub(crate) fn stage(&mut self) -> Result<(), SyncError> {
        if !info_of_regular_file(&self.source_state.info) {
            return Ok(());
        }
        self.copy_file()?;
        let live = live_info(&self.fspath, self.settings.case_insensitive)
            .map_err(|e| io_sync("probing live source", e))?;
        self.check_staged(&live)?;
        self.check_update_source_state(live)?;
        Ok(())
    }

    fn register_stage_name(&mut self) -> Result<bool, SyncError> {
        let member = self
            .settings
            .cache_member_name(&self.settings.cache_stage_name, &util::hash_name(self.objname.as_str()));
        let staged = self.settings.cache_path().join(&member);
        self.stage_filename = Some(member.clone());
        self.staged = Some(staged);
        let fresh = self.store.with_tx(|tx| {
            if tx.get_cachename(&member)?.is_some() {
                return Ok(false);
            }
            tx.insert_cachename(&member, SIGNATURE, &self.objname)?;
            Ok(true)
        })?;
        Ok(fresh)
    }

    fn unregister_stage_name(&mut self) -> Result<(), SyncError> {
        if let Some(member) = self.stage_filename.take() {
            self.store.with_tx(|tx| tx.delete_cachename(&member))?;
        }
        self.staged = None;
        Ok(())
    }

    fn copy_file(&mut self) -> Result<(), SyncError> {
        if file_is_open(&self.fspath) {
            return Err(SyncError::OpenBusy(format!(
                "file '{}' is open; aborting",
                self.fspath.display()
            )));
        }
        let fresh = self.register_stage_name()?;
        let staged = self.staged.clone().unwrap_or_default();
        if !fresh {
            tracing::warn!(objname = %self.objname, "staging already registered");
            if staged.symlink_metadata().is_ok() {
                tracing::warn!(objname = %self.objname, "file already staged");
                return Ok(());
            }
        }
        tracing::debug!(objname = %self.objname, staged = %staged.display(), "staging file");
        match fs::copy(&self.fspath, &staged) {
            Ok(_) => Ok(()),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::IsADirectory
                ) =>
            {
                // Not a regular file any more; check_staged sorts it out.
                tracing::debug!(fspath = %self.fspath.display(), "source is not a regular file");
                self.unregister_stage_name()?;
                Ok(())
            }
            Err(err) => Err(io_sync("staging copy", err)),
        }
    }

    fn drop_staged(&mut self) -> Result<(), SyncError> {
        if let Some(staged) = self.staged.clone() {
            if let Err(err) = fs::remove_file(&staged) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(io_sync("removing staged copy", err));
                }
            }
        }
        self.unregister_stage_name()
    }

    fn check_staged(&mut self, live: &amphora_core::FileInfo) -> Result<(), SyncError> {
        let is_reg = info_of_regular_file(live);

        let Some(staged) = self.staged.clone() else {
            if is_reg {
                return Err(SyncError::NotStableBusy(format!(
                    "file '{}' is not in a stable state; unstaged",
                    self.objname
                )));
            }
            return Ok(());
        };

        if !is_reg {
            self.drop_staged()?;
            tracing::warn!(objname = %self.objname, "source is not a regular file; unstaged");
            return Ok(());
        }

        if file_is_open(&self.fspath) {
            self.drop_staged()?;
            return Err(SyncError::OpenBusy(format!("file '{}' is open; unstaged", self.objname)));
        }

        if !files_equal(&staged, &self.fspath) {
            self.drop_staged()?;
            return Err(SyncError::ChangedBusy(format!(
                "file '{}' contents have changed; unstaged",
                self.objname
            )));
        }
        Ok(())
    }

    fn check_update_source_state(&mut self, live: amphora_core::FileInfo) -> Result<(), SyncError> {
        if is_info_eq(&live, &self.source_state.info, self.settings.mtime_precision, true) {
            return Ok(());
        }
        self.messager.put(Message::LiveInfoUpdate {
            archive: self.archive.clone(),
            objname: self.objname.clone(),
            info: live.clone(),
        });
        let new_state = self.source_state.clone().with_info(live);
        self.store.with_tx(|tx| tx.put_state(&new_state))?;
        self.source_state = new_state;
        Ok(())
    }
}

#[async_trait]
impl SourceHandle for LocalfsSourceHandle {
    async fn send_file(&mut self, _sync_state: &FileState) -> Result<PathBuf, SyncError> {
        match &self.staged {
            Some(path) => Ok(path.clone()),
            None => Err(SyncError::Sync(format!(
                "local source '{}' has nothing staged to send",
                self.objname
            ))),
        }
    }

    fn get_synced_state(&self) -> FileState {
        self.source_state.clone()
    }

    async fn unstage_file(&mut self) -> Result<(), SyncError> {
        if self.stage_filename.is_none() {
            return Ok(());
        }
        self.drop_staged()
    }

    fn staged_path(&self) -> Option<PathBuf> {
        self.staged.clone()
    }

    fn info_is_dir(&self) -> bool {
        self.source_state.info.get_str(LOCALFS_TYPE) == Some(T_DIR)
    }

    fn info_is_deleted_or_unhandled(&self) -> bool {
        self.source_state.info.is_empty()
            || self.source_state.info.get_str(LOCALFS_TYPE) == Some(T_UNHANDLED)
    }
}
