// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure taxonomy for sync operations

use thiserror::Error;

/// Errors raised while probing, staging, or applying a sync.
///
/// The kind determines how the syncer reacts: hard errors register the
/// failed serial so the decision is not retried until a newer serial
/// appears; busy errors are transient and picked up by a later probe
/// round; database errors leave no partial state behind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("sync failed: {0}")]
    Sync(String),

    #[error("hard sync failure: {0}")]
    Hard(String),

    #[error("collision with upstream: {0}")]
    Collision(String),

    #[error("conflicting local content: {0}")]
    Conflict(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("source file is open: {0}")]
    OpenBusy(String),

    #[error("source file changed while staging: {0}")]
    ChangedBusy(String),

    #[error("source file is not in a stable state: {0}")]
    NotStableBusy(String),

    #[error("database failure: {0}")]
    Database(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("handled: {0}")]
    Handled(String),
}

impl SyncError {
    /// Hard errors park the (serial, objname) pair in the failed set.
    pub fn is_hard(&self) -> bool {
        matches!(self, SyncError::Hard(_) | SyncError::Collision(_))
    }

    /// Busy errors mean the source object is moving under us.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SyncError::Busy(_)
                | SyncError::OpenBusy(_)
                | SyncError::ChangedBusy(_)
                | SyncError::NotStableBusy(_)
        )
    }
}
