// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-object heartbeat registry
//!
//! A heartbeat entry serializes probing, deciding, and syncing for one
//! object name across workers. An entry with no worker handle belongs to a
//! decision whose sync task has not started yet; once the task is spawned
//! its abort handle is recorded so liveness can be observed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::AbortHandle;

/// Identifies one probe or decide round. Claim ids tag candidate-map and
/// heartbeat entries so a round only cleans up after itself.
pub type ClaimId = u64;

static NEXT_CLAIM: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique claim id.
pub fn next_claim_id() -> ClaimId {
    NEXT_CLAIM.fetch_add(1, Ordering::Relaxed)
}

/// One registry entry.
#[derive(Debug, Clone)]
pub struct Beat {
    pub claim: ClaimId,
    /// When the entry was written, from the syncer's clock.
    pub at_ms: u64,
    /// Abort handle of the sync worker, once it has been spawned.
    pub worker: Option<AbortHandle>,
}

impl Beat {
    pub fn new(claim: ClaimId, at_ms: u64) -> Self {
        Self { claim, at_ms, worker: None }
    }

    /// An entry is live while its sync worker has not finished, and also
    /// before the worker exists, since the decision is then in flight.
    pub fn is_live(&self) -> bool {
        match &self.worker {
            None => true,
            Some(handle) => !handle.is_finished(),
        }
    }
}

/// Process-wide map from registry name to heartbeat entry.
#[derive(Default)]
pub struct HeartBeat {
    inner: Mutex<HashMap<String, Beat>>,
}

impl HeartBeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Beat> {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, beat: Beat) {
        self.inner.lock().insert(key.to_string(), beat);
    }

    /// Remove the entry unconditionally.
    pub fn remove(&self, key: &str) -> Option<Beat> {
        self.inner.lock().remove(key)
    }

    /// Remove the entry only if it still carries the given claim.
    pub fn remove_if_claim(&self, key: &str, claim: ClaimId) -> bool {
        let mut map = self.inner.lock();
        match map.get(key) {
            Some(beat) if beat.claim == claim => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Record the worker handle for an entry written by a decide round.
    /// Returns false if the entry is gone (the decision was cleaned up).
    pub fn set_worker(&self, key: &str, handle: AbortHandle) -> bool {
        let mut map = self.inner.lock();
        match map.get_mut(key) {
            Some(beat) => {
                debug_assert!(beat.worker.is_none(), "worker already recorded for {key}");
                beat.worker = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Number of entries whose sync worker is currently running.
    pub fn live_worker_count(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|beat| matches!(&beat.worker, Some(h) if !h.is_finished()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
