// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target-side application for the local archive
//!
//! Applying a sync never overwrites live content in place: the existing
//! entry is first hidden into the cache, compared against what was fetched,
//! stashed next to the original if it would be clobbered, and only then is
//! the fetched content linked into the root.

use super::fsinfo::{
    file_is_open, files_equal, live_info, local_path_changes, local_status, status_of_info,
    LocalStatus, LOCALFS_TYPE,
};
use crate::client::{SourceHandle, TargetHandle};
use amphora_core::{
    util, FileInfo, FileState, Message, Messager, ObjectName, SyncError, SyncSettings, T_DIR,
    T_FILE,
};
use amphora_storage::StateStore;
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Client column value for hidden-name reservations.
const SIGNATURE: &str = "localfs-target";

enum LinkOutcome {
    Linked,
    DirMissing,
}

/// Link the fetched file to its live path: hard-link on POSIX so a
/// concurrent local edit cannot corrupt the cache copy, rename on Windows
/// where open files cannot be linked over.
fn link_file(src: &Path, dest: &Path) -> Result<LinkOutcome, SyncError> {
    let result = if cfg!(windows) { fs::rename(src, dest) } else { fs::hard_link(src, dest) };
    match result {
        Ok(()) => Ok(LinkOutcome::Linked),
        Err(err) => match err.kind() {
            io::ErrorKind::AlreadyExists => {
                Err(SyncError::Conflict(format!("cannot link, '{}' exists", dest.display())))
            }
            io::ErrorKind::NotADirectory | io::ErrorKind::InvalidInput => Err(SyncError::Conflict(
                format!("cannot link, missing path for '{}'", dest.display()),
            )),
            io::ErrorKind::NotFound => Ok(LinkOutcome::DirMissing),
            _ => Err(SyncError::Sync(format!("linking '{}': {err}", dest.display()))),
        },
    }
}

fn make_dirs(path: &Path) -> Result<(), SyncError> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::AlreadyExists
                    | io::ErrorKind::NotADirectory
                    | io::ErrorKind::NotFound
            ) =>
        {
            Err(SyncError::Conflict(format!("cannot make dir '{}'", path.display())))
        }
        Err(err) => Err(SyncError::Sync(format!("creating '{}': {err}", path.display()))),
    }
}

/// Applies one sync onto the local filesystem.
pub struct LocalfsTargetHandle {
    settings: Arc<SyncSettings>,
    store: Arc<StateStore>,
    messager: Arc<Messager>,
    target_state: FileState,
    objname: ObjectName,
    fspath: PathBuf,
    hidden_filename: Option<String>,
    hidden: Option<PathBuf>,
}

fn io_sync(context: &str, err: io::Error) -> SyncError {
    SyncError::Sync(format!("{context}: {err}"))
}

impl LocalfsTargetHandle {
    pub(crate) fn new(
        settings: Arc<SyncSettings>,
        store: Arc<StateStore>,
        messager: Arc<Messager>,
        target_state: FileState,
    ) -> Self {
        let objname = target_state.objname.clone();
        let fspath = objname.to_local(&settings.local_root);
        Self {
            settings,
            store,
            messager,
            target_state,
            objname,
            fspath,
            hidden_filename: None,
            hidden: None,
        }
    }

    fn register_hidden_name(&mut self) -> Result<bool, SyncError> {
        let member = self
            .settings
            .cache_member_name(&self.settings.cache_hide_name, &util::hash_name(self.objname.as_str()));
        let hidden = self.settings.cache_path().join(&member);
        self.hidden_filename = Some(member.clone());
        self.hidden = Some(hidden);
        let fresh = self.store.with_tx(|tx| {
            if tx.get_cachename(&member)?.is_some() {
                return Ok(false);
            }
            tx.insert_cachename(&member, SIGNATURE, &self.objname)?;
            Ok(true)
        })?;
        Ok(fresh)
    }

    fn unregister_hidden_name(&mut self) -> Result<(), SyncError> {
        if let Some(member) = self.hidden_filename.take() {
            self.store.with_tx(|tx| tx.delete_cachename(&member))?;
        }
        self.hidden = None;
        Ok(())
    }

    fn undo_hide(&mut self, hidden: &Path) -> Result<(), SyncError> {
        fs::rename(hidden, &self.fspath).map_err(|e| io_sync("undoing hide", e))?;
        self.unregister_hidden_name()
    }

    fn move_file(&mut self) -> Result<(), SyncError> {
        if file_is_open(&self.fspath) {
            return Err(SyncError::Busy(format!(
                "file '{}' is open; aborting",
                self.fspath.display()
            )));
        }
        let fresh = self.register_hidden_name()?;
        let hidden = self.hidden.clone().unwrap_or_default();
        if !fresh {
            tracing::warn!(objname = %self.objname, "hiding already registered");
            if hidden.symlink_metadata().is_ok() {
                tracing::warn!(objname = %self.objname, "file already hidden");
                return Ok(());
            }
        }
        match fs::rename(&self.fspath, &hidden) {
            Ok(()) => {
                tracing::debug!(
                    fspath = %self.fspath.display(),
                    hidden = %hidden.display(),
                    "hid live entry"
                );
                Ok(())
            }
            Err(err)
                if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) =>
            {
                self.unregister_hidden_name()?;
                tracing::debug!(fspath = %self.fspath.display(), "nothing to hide");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                self.unregister_hidden_name()?;
                Err(SyncError::Busy(format!("file '{}' is open; undoing", hidden.display())))
            }
            Err(err) => Err(io_sync("hiding live entry", err)),
        }
    }

    fn hide_file(&mut self) -> Result<(), SyncError> {
        self.move_file()?;
        let Some(hidden) = self.hidden.clone() else {
            return Ok(());
        };
        if self.hidden_filename.is_none() {
            return Ok(());
        }
        if file_is_open(&hidden) {
            self.undo_hide(&hidden)?;
            return Err(SyncError::Busy(format!("file '{}' is open; undoing", hidden.display())));
        }
        if local_status(&hidden).map_err(|e| io_sync("inspecting hidden entry", e))?
            == LocalStatus::NonEmptyDir
        {
            self.undo_hide(&hidden)?;
            return Err(SyncError::Conflict(format!("'{}' is non-empty", self.fspath.display())));
        }
        Ok(())
    }

    fn stash_file(&mut self) -> Result<(), SyncError> {
        let stash_name = util::mk_stash_name(self.objname.as_str());
        let stash_path = ObjectName::new(stash_name.as_str()).to_local(&self.settings.local_root);
        self.messager.put(Message::ConflictStash {
            objname: self.objname.clone(),
            stash_name: stash_name.clone(),
        });
        if let Some(hidden) = self.hidden.take() {
            fs::rename(&hidden, &stash_path).map_err(|e| io_sync("stashing", e))?;
        }
        Ok(())
    }

    fn prepare(&mut self, fetched_path: &Path, sync_state: &FileState) -> Result<(), SyncError> {
        self.hide_file()?;
        let Some(hidden) = self.hidden.clone() else {
            return Ok(());
        };
        let changed = local_path_changes(
            &hidden,
            &sync_state.info,
            self.settings.mtime_precision,
            self.settings.case_insensitive,
            false,
        )
        .map_err(|e| io_sync("comparing hidden entry", e))?;
        if let Some(changed) = changed {
            if !changed.is_empty() && !files_equal(&hidden, fetched_path) {
                self.stash_file()?;
            }
        }
        Ok(())
    }

    async fn finalize(&self, fetched_path: &Path, live: &FileInfo) -> Result<(), SyncError> {
        tracing::debug!(fetched = %fetched_path.display(), "finalizing");
        if live.is_empty() {
            return Ok(());
        }
        match live.get_str(LOCALFS_TYPE) {
            Some(T_FILE) => {
                if self.settings.mtime_lag > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(self.settings.mtime_lag)).await;
                }
                match link_file(fetched_path, &self.fspath)? {
                    LinkOutcome::Linked => Ok(()),
                    LinkOutcome::DirMissing => {
                        if let Some(parent) = self.fspath.parent() {
                            make_dirs(parent)?;
                        }
                        match link_file(fetched_path, &self.fspath)? {
                            LinkOutcome::Linked => Ok(()),
                            LinkOutcome::DirMissing => Err(SyncError::Conflict(format!(
                                "cannot link, missing path for '{}'",
                                self.fspath.display()
                            ))),
                        }
                    }
                }
            }
            Some(T_DIR) => make_dirs(&self.fspath),
            other => Err(SyncError::Sync(format!(
                "fetched '{}' has unexpected type {other:?}",
                fetched_path.display()
            ))),
        }
    }

    fn cleanup(&self, path: &Path) {
        match local_status(path) {
            Ok(LocalStatus::File) => {
                tracing::debug!(path = %path.display(), "cleaning up");
                let _ = fs::remove_file(path);
            }
            Ok(LocalStatus::EmptyDir | LocalStatus::NonEmptyDir) => {
                let _ = fs::remove_dir(path);
            }
            _ => {}
        }
    }

    async fn apply(
        &mut self,
        fetched_path: &Path,
        fetched_live: &FileInfo,
        sync_state: &FileState,
    ) -> Result<(), SyncError> {
        let local = local_status(&self.fspath).map_err(|e| io_sync("inspecting target", e))?;
        let fetched = status_of_info(fetched_live);
        if matches!(local, LocalStatus::EmptyDir | LocalStatus::NonEmptyDir)
            && fetched == LocalStatus::EmptyDir
        {
            return Ok(());
        }
        if local == LocalStatus::Missing && fetched == LocalStatus::Missing {
            return Ok(());
        }
        if local == LocalStatus::NonEmptyDir {
            return Err(SyncError::Conflict(format!("'{}' is non-empty", self.fspath.display())));
        }

        self.prepare(fetched_path, sync_state)?;
        self.finalize(fetched_path, fetched_live).await?;
        if let Some(hidden) = self.hidden.clone() {
            self.cleanup(&hidden);
        }
        if self.hidden_filename.is_some() {
            self.unregister_hidden_name()?;
        }
        Ok(())
    }
}

#[async_trait]
impl TargetHandle for LocalfsTargetHandle {
    async fn pull(
        &mut self,
        source: &mut dyn SourceHandle,
        sync_state: &FileState,
    ) -> Result<FileState, SyncError> {
        let fetched_path = source.send_file(sync_state).await?;
        let fetched_live = live_info(&fetched_path, false)
            .map_err(|e| io_sync("inspecting fetched content", e))?;
        self.apply(&fetched_path, &fetched_live, sync_state).await?;
        Ok(self.target_state.clone().with_info(fetched_live))
    }
}
