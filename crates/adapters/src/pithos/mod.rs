// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote object-store archive client

pub mod api;
mod source;
mod target;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use source::PithosSourceHandle;
pub use target::PithosTargetHandle;

use crate::client::{
    ArchiveClient, CandidateMap, NotifierHandle, SourceHandle, TargetHandle,
};
use amphora_core::{
    ArchiveTag, ClaimId, FileInfo, FileState, Message, Messager, ObjectName, SyncError,
    SyncSettings, T_DIR, T_FILE,
};
use amphora_storage::StateStore;
use api::{HttpError, ObjectStore, RemoteObject};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Archive signature of the remote side.
pub const PITHOS_SIGNATURE: &str = "pithos";

pub const PITHOS_TYPE: &str = "pithos_type";
pub const PITHOS_ETAG: &str = "pithos_etag";

/// Suffix of the sentinel names used by guarded deletion.
pub const STAGED_FOR_DELETION_SUFFIX: &str = ".pithos_staged_for_deletion";

fn info_of_object(obj: &RemoteObject) -> FileInfo {
    let mut info =
        FileInfo::empty().with(PITHOS_TYPE, if obj.is_dir() { T_DIR } else { T_FILE });
    if let Some(etag) = &obj.etag {
        info.insert(PITHOS_ETAG, etag.as_str());
    }
    info
}

/// The remote container as an archive.
pub struct PithosFileClient {
    api: Arc<dyn ObjectStore>,
    settings: Arc<SyncSettings>,
    store: Arc<StateStore>,
    messager: Arc<Messager>,
    candidates: Arc<CandidateMap>,
    /// Greatest `last_modified` seen; anchors the poller's "updated since".
    last_modification: Arc<Mutex<String>>,
}

impl PithosFileClient {
    pub fn new(
        api: Arc<dyn ObjectStore>,
        settings: Arc<SyncSettings>,
        store: Arc<StateStore>,
        messager: Arc<Messager>,
    ) -> Result<Self, SyncError> {
        let client = Self {
            api,
            settings,
            store,
            messager,
            candidates: Arc::new(CandidateMap::new()),
            last_modification: Arc::new(Mutex::new(String::new())),
        };
        client.check_enabled()?;
        Ok(client)
    }

    fn check_enabled(&self) -> Result<(), SyncError> {
        let enabled = self.store.with_tx(|tx| tx.pithos_enabled())?;
        let msg = if enabled { Message::PithosSyncEnabled } else { Message::PithosSyncDisabled };
        self.messager.put(msg);
        Ok(())
    }

    fn disable(&self) -> Result<(), SyncError> {
        self.store.with_tx(|tx| tx.set_pithos_enabled(false))?;
        self.messager.put(Message::PithosSyncDisabled);
        Ok(())
    }

    fn report_list_error(&self, err: &HttpError) {
        if err.is_auth_failure() {
            self.messager.put(Message::PithosAuthTokenError { error: err.to_string() });
        } else {
            self.messager.put(Message::PithosGenericError { error: err.to_string() });
        }
    }

    /// Candidates changed since `since` (everything when `None`), plus the
    /// names the database still holds as non-deleted that the listing no
    /// longer shows: those are newly-deleted upstream.
    async fn get_candidates(
        &self,
        since: Option<String>,
    ) -> Result<HashMap<ObjectName, FileInfo>, SyncError> {
        if !self.store.with_tx(|tx| tx.pithos_enabled())? {
            return Ok(HashMap::new());
        }
        let objects = match self.api.list_objects().await {
            Ok(objects) => objects,
            Err(err) if err.is_not_found() => {
                self.disable()?;
                return Ok(HashMap::new());
            }
            Err(err) => {
                self.report_list_error(&err);
                return Ok(HashMap::new());
            }
        };

        let mut upstream_all = HashMap::new();
        {
            let mut last = self.last_modification.lock();
            for obj in &objects {
                if obj.name.ends_with(STAGED_FOR_DELETION_SUFFIX) {
                    continue;
                }
                upstream_all.insert(ObjectName::new(obj.name.as_str()), info_of_object(obj));
                if obj.last_modified > *last {
                    *last = obj.last_modified.clone();
                }
            }
        }

        let upstream_names: HashSet<ObjectName> = upstream_all.keys().cloned().collect();
        let mut candidates: HashMap<ObjectName, FileInfo> = match &since {
            Some(since) => objects
                .iter()
                .filter(|obj| {
                    obj.last_modified > *since
                        && !obj.name.ends_with(STAGED_FOR_DELETION_SUFFIX)
                })
                .map(|obj| (ObjectName::new(obj.name.as_str()), info_of_object(obj)))
                .collect(),
            None => upstream_all,
        };

        let non_deleted = self.store.with_tx(|tx| tx.list_non_deleted(&self.signature()))?;
        for name in non_deleted {
            if !upstream_names.contains(&name) {
                tracing::debug!(objname = %name, "newly deleted upstream");
                candidates.insert(name, FileInfo::empty());
            }
        }
        Ok(candidates)
    }
}

#[async_trait]
impl ArchiveClient for PithosFileClient {
    fn signature(&self) -> ArchiveTag {
        ArchiveTag::new(PITHOS_SIGNATURE)
    }

    async fn list_candidate_files(&self, forced: bool) -> Result<Vec<ObjectName>, SyncError> {
        if forced {
            for (name, info) in self.get_candidates(None).await? {
                self.candidates.add_with_info(name, info);
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
        if objname.as_str().ends_with(STAGED_FOR_DELETION_SUFFIX) {
            self.messager.put(Message::IgnoreProbe {
                archive: old_state.archive.clone(),
                objname: objname.clone(),
            });
            return Ok(None);
        }
        let live = match cached {
            Some(info) => info,
            None => match self.api.object_info(objname.as_str()).await {
                Ok(Some(obj)) => info_of_object(&obj),
                Ok(None) => FileInfo::empty(),
                Err(err) => return Err(err.into()),
            },
        };
        if live == old_state.info {
            Ok(None)
        } else {
            Ok(Some(old_state.clone().with_info(live)))
        }
    }

    async fn stage_file(
        &self,
        source_state: FileState,
    ) -> Result<Box<dyn SourceHandle>, SyncError> {
        Ok(Box::new(PithosSourceHandle::new(
            self.api.clone(),
            self.settings.clone(),
            self.store.clone(),
            self.messager.clone(),
            self.signature(),
            source_state,
        )))
    }

    fn prepare_target(&self, target_state: FileState) -> Box<dyn TargetHandle> {
        Box::new(PithosTargetHandle::new(
            self.api.clone(),
            self.messager.clone(),
            target_state,
        ))
    }

    /// Background poller listing the container with an "updated since"
    /// anchor and depositing changed names into the candidate map.
    fn notifier(&self) -> Result<NotifierHandle, SyncError> {
        let token = CancellationToken::new();
        let child = token.clone();
        let period = self.settings.pithos_list_period();
        let client = PithosFileClient {
            api: self.api.clone(),
            settings: self.settings.clone(),
            store: self.store.clone(),
            messager: self.messager.clone(),
            candidates: self.candidates.clone(),
            last_modification: self.last_modification.clone(),
        };
        let handle = tokio::spawn(async move {
            loop {
                let since = {
                    let last = client.last_modification.lock();
                    if last.is_empty() { None } else { Some(last.clone()) }
                };
                match client.get_candidates(since).await {
                    Ok(changed) => {
                        for (name, info) in changed {
                            client.candidates.add_with_info(name, info);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "remote poll failed");
                    }
                }
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            tracing::debug!("remote poller stopped");
        });
        Ok(NotifierHandle::task(token, handle))
    }

    async fn ensure_ready(&self) -> Result<(), SyncError> {
        if !self.api.container_exists().await.map_err(SyncError::from)? {
            tracing::warn!(container = %self.settings.container, "creating container");
            self.api.create_container().await.map_err(SyncError::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "pithos_tests.rs"]
mod tests;
