// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target-side application for the remote archive
//!
//! Every write is guarded: uploads carry `if-match` against the last synced
//! etag (or `if-none-match: *` for fresh names), deletions move the object
//! to a sentinel name first so the guarded step and the actual delete are
//! separate. A precondition failure means upstream moved on and the sync is
//! recorded as a collision.

use super::api::{ObjectStore, Precondition, DIRECTORY_CONTENT_TYPE};
use super::{PITHOS_ETAG, PITHOS_TYPE, STAGED_FOR_DELETION_SUFFIX};
use crate::client::{SourceHandle, TargetHandle};
use amphora_core::{
    FileInfo, FileState, Message, Messager, ObjectName, SyncError, T_DIR, T_FILE,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Applies one sync onto the remote container.
pub struct PithosTargetHandle {
    api: Arc<dyn ObjectStore>,
    messager: Arc<Messager>,
    target_state: FileState,
    objname: ObjectName,
}

impl PithosTargetHandle {
    pub(crate) fn new(
        api: Arc<dyn ObjectStore>,
        messager: Arc<Messager>,
        target_state: FileState,
    ) -> Self {
        let objname = target_state.objname.clone();
        Self { api, messager, target_state, objname }
    }

    fn del_name(&self, etag: &str) -> String {
        format!("{}.{}{}", self.objname, etag, STAGED_FOR_DELETION_SUFFIX)
    }

    /// Guarded delete: move to the sentinel name with `if-match`, then
    /// delete the sentinel. A 404 on either step means someone else got
    /// there first, which is fine.
    async fn safe_object_del(&self, etag: &str) -> Result<(), SyncError> {
        let del_name = self.del_name(etag);
        tracing::debug!(objname = %self.objname, %del_name, "moving upstream aside for deletion");
        match self.api.move_object(self.objname.as_str(), &del_name, etag).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                tracing::warn!(objname = %self.objname, "upstream not found; already moved?");
            }
            Err(err) => return Err(self.map_error(err, Some(etag))),
        }
        match self.api.delete_object(&del_name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                tracing::warn!(%del_name, "sentinel not found; already deleted?");
                Ok(())
            }
            Err(err) => Err(self.map_error(err, Some(etag))),
        }
    }

    fn precondition(etag: Option<&str>) -> Option<Precondition> {
        match etag {
            Some(etag) => Some(Precondition::IfMatch(etag.to_string())),
            None => Some(Precondition::IfNoneMatchAny),
        }
    }

    fn map_error(&self, err: super::api::HttpError, etag: Option<&str>) -> SyncError {
        if err.is_precondition_failed() {
            self.messager.put(Message::Collision {
                objname: self.objname.clone(),
                etag: etag.map(str::to_string),
            });
        }
        err.into()
    }
}

#[async_trait]
impl TargetHandle for PithosTargetHandle {
    async fn pull(
        &mut self,
        source: &mut dyn SourceHandle,
        sync_state: &FileState,
    ) -> Result<FileState, SyncError> {
        let etag = sync_state.info.get_str(PITHOS_ETAG).map(str::to_string);

        let live = if source.info_is_deleted_or_unhandled() {
            if let Some(etag) = &etag {
                tracing::debug!(objname = %self.objname, "deleting object");
                self.safe_object_del(etag).await?;
            }
            FileInfo::empty()
        } else if source.info_is_dir() {
            tracing::debug!(objname = %self.objname, "creating directory object");
            let synced_etag = self
                .api
                .put_object(
                    self.objname.as_str(),
                    Vec::new(),
                    DIRECTORY_CONTENT_TYPE,
                    Self::precondition(etag.as_deref()),
                )
                .await
                .map_err(|e| self.map_error(e, etag.as_deref()))?;
            FileInfo::empty().with(PITHOS_ETAG, synced_etag).with(PITHOS_TYPE, T_DIR)
        } else {
            let staged = source.staged_path().ok_or_else(|| {
                SyncError::Sync(format!("source for '{}' is not staged", self.objname))
            })?;
            let body = std::fs::read(&staged)
                .map_err(|e| SyncError::Sync(format!("reading staged copy: {e}")))?;
            let synced_etag = self
                .api
                .put_object(
                    self.objname.as_str(),
                    body,
                    "application/octet-stream",
                    Self::precondition(etag.as_deref()),
                )
                .await
                .map_err(|e| self.map_error(e, etag.as_deref()))?;
            FileInfo::empty().with(PITHOS_ETAG, synced_etag).with(PITHOS_TYPE, T_FILE)
        };

        Ok(self.target_state.clone().with_info(live))
    }
}
