// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive client capability set

use amphora_core::{ArchiveTag, ClaimId, FileInfo, FileState, ObjectName, SyncError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One side of the sync relation, as the syncer sees it.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Signature used as this archive's tag in the state store.
    fn signature(&self) -> ArchiveTag;

    /// Names waiting to be probed. `forced` performs a full scan instead of
    /// returning only what the notifier has accumulated.
    async fn list_candidate_files(&self, forced: bool) -> Result<Vec<ObjectName>, SyncError>;

    /// Drop candidate entries still tagged with `claim`.
    fn remove_candidates(&self, names: &[ObjectName], claim: ClaimId);

    /// Observe the live object. Returns the updated state when the live
    /// info differs from `old_state`, `None` when nothing changed or the
    /// name is excluded.
    async fn probe_file(
        &self,
        objname: &ObjectName,
        old_state: &FileState,
        ref_state: &FileState,
        claim: ClaimId,
    ) -> Result<Option<FileState>, SyncError>;

    /// Prepare the source side of a sync.
    async fn stage_file(&self, source_state: FileState)
        -> Result<Box<dyn SourceHandle>, SyncError>;

    /// Prepare the target side of a sync.
    fn prepare_target(&self, target_state: FileState) -> Box<dyn TargetHandle>;

    /// Start this archive's change notifier.
    fn notifier(&self) -> Result<NotifierHandle, SyncError>;

    /// Make the archive usable again after a forced reset (create the local
    /// cache tree or the remote container).
    async fn ensure_ready(&self) -> Result<(), SyncError>;
}

/// Staged source content of one sync.
#[async_trait]
pub trait SourceHandle: Send {
    /// Make the source content available at a local path the target handle
    /// can read. The path may be absent (deleted source) or a directory.
    async fn send_file(&mut self, sync_state: &FileState) -> Result<PathBuf, SyncError>;

    /// Source state as observed while staging (possibly refreshed).
    fn get_synced_state(&self) -> FileState;

    /// Release any staging resources. Idempotent.
    async fn unstage_file(&mut self) -> Result<(), SyncError>;

    /// Where the staged copy lives, when the source is a regular file.
    fn staged_path(&self) -> Option<PathBuf>;

    fn info_is_dir(&self) -> bool;

    fn info_is_deleted_or_unhandled(&self) -> bool;
}

/// Target side of one sync.
#[async_trait]
pub trait TargetHandle: Send {
    /// Pull the source content into the target archive and return the
    /// synced target state.
    async fn pull(
        &mut self,
        source: &mut dyn SourceHandle,
        sync_state: &FileState,
    ) -> Result<FileState, SyncError>;
}

enum NotifierInner {
    /// Filesystem watcher; dropping it stops event delivery.
    Watcher(notify::RecommendedWatcher),
    /// Poller task with a stop token.
    Task { token: CancellationToken, handle: JoinHandle<()> },
}

/// Running change notifier for one archive.
pub struct NotifierHandle {
    inner: NotifierInner,
}

impl NotifierHandle {
    pub fn watcher(watcher: notify::RecommendedWatcher) -> Self {
        Self { inner: NotifierInner::Watcher(watcher) }
    }

    pub fn task(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { inner: NotifierInner::Task { token, handle } }
    }

    /// Stop the notifier within the given budget; returns what is left of
    /// the budget so callers can compose stops.
    pub async fn stop(self, budget: Option<Duration>) -> Option<Duration> {
        match self.inner {
            NotifierInner::Watcher(watcher) => {
                drop(watcher);
                budget
            }
            NotifierInner::Task { token, handle } => {
                token.cancel();
                let started = Instant::now();
                match budget {
                    None => {
                        let _ = handle.await;
                        None
                    }
                    Some(limit) => {
                        let _ = tokio::time::timeout(limit, handle).await;
                        Some(limit.saturating_sub(started.elapsed()))
                    }
                }
            }
        }
    }
}

/// Candidate entry awaiting a probe.
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    /// Claim of the probe round currently handling this entry.
    pub claim: Option<ClaimId>,
    /// Live info cached by the notifier/poller, when it saw one.
    pub info: Option<FileInfo>,
}

/// Shared map of names registered as possibly changed.
#[derive(Default)]
pub struct CandidateMap {
    inner: Mutex<HashMap<ObjectName, Candidate>>,
}

impl CandidateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a candidate with no cached info, resetting any claim.
    pub fn add(&self, name: ObjectName) {
        self.inner.lock().insert(name, Candidate::default());
    }

    pub fn add_with_info(&self, name: ObjectName, info: FileInfo) {
        self.inner.lock().insert(name, Candidate { claim: None, info: Some(info) });
    }

    pub fn names(&self) -> Vec<ObjectName> {
        self.inner.lock().keys().cloned().collect()
    }

    /// Stamp the entry with this probe round's claim and return any cached
    /// live info.
    pub fn claim(&self, name: &ObjectName, claim: ClaimId) -> Option<FileInfo> {
        let mut map = self.inner.lock();
        match map.get_mut(name) {
            Some(candidate) => {
                candidate.claim = Some(claim);
                candidate.info.clone()
            }
            None => None,
        }
    }

    /// Remove entries still tagged with `claim`; entries re-registered by a
    /// notifier since (claim reset or changed) survive.
    pub fn remove_claimed(&self, names: &[ObjectName], claim: ClaimId) {
        let mut map = self.inner.lock();
        for name in names {
            if let Some(candidate) = map.get(name) {
                if candidate.claim == Some(claim) {
                    map.remove(name);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
