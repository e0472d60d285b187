// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress, conflict, and error events for the UI/CLI collaborator
//!
//! Serializes with `{"type": "<MessageName>", ...fields}` format; the type
//! tags are the wire contract consumed outside this workspace.

use crate::archive::ArchiveTag;
use crate::object::ObjectName;
use crate::state::FileInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events describing what the syncer observed or did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// An archive row advanced to a new serial after a probe.
    #[serde(rename = "UpdateMessage")]
    Update { archive: ArchiveTag, objname: ObjectName, serial: i64, old_serial: i64 },

    /// A sync for this triple has been queued.
    #[serde(rename = "SyncMessage")]
    Sync { archive: ArchiveTag, objname: ObjectName, serial: i64, info: FileInfo },

    /// The ack transaction committed; SYNC advanced.
    #[serde(rename = "AckSyncMessage")]
    AckSync { archive: ArchiveTag, objname: ObjectName, serial: i64 },

    /// A sync worker failed.
    #[serde(rename = "SyncErrorMessage")]
    SyncError { objname: ObjectName, serial: i64, error: String },

    /// A conditional remote write hit a 412.
    #[serde(rename = "CollisionMessage")]
    Collision {
        objname: ObjectName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
    },

    /// Clobbered local content was preserved under a stash name.
    #[serde(rename = "ConflictStashMessage")]
    ConflictStash { objname: ObjectName, stash_name: String },

    /// The live object differed from the recorded source state while
    /// staging; the recorded state was refreshed in place.
    #[serde(rename = "LiveInfoUpdateMessage")]
    LiveInfoUpdate { archive: ArchiveTag, objname: ObjectName, info: FileInfo },

    /// The object name is excluded from syncing.
    #[serde(rename = "IgnoreProbeMessage")]
    IgnoreProbe { archive: ArchiveTag, objname: ObjectName },

    /// The row is already ahead of SYNC; nothing to probe.
    #[serde(rename = "AlreadyProbedMessage")]
    AlreadyProbed { archive: ArchiveTag, objname: ObjectName, serial: i64 },

    /// A live heartbeat blocked the probe.
    #[serde(rename = "HeartbeatNoProbeMessage")]
    HeartbeatNoProbe { archive: ArchiveTag, objname: ObjectName },

    /// A live heartbeat blocked the decide.
    #[serde(rename = "HeartbeatNoDecideMessage")]
    HeartbeatNoDecide { objname: ObjectName },

    /// A stale heartbeat was ignored and the decide re-ran.
    #[serde(rename = "HeartbeatReplayDecideMessage")]
    HeartbeatReplayDecide { objname: ObjectName },

    /// A dead worker's heartbeat is too young to replay yet.
    #[serde(rename = "HeartbeatSkipDecideMessage")]
    HeartbeatSkipDecide { objname: ObjectName },

    /// An in-flight decision previously failed; re-deciding from scratch.
    #[serde(rename = "FailedSyncIgnoreDecisionMessage")]
    FailedSyncIgnoreDecision { objname: ObjectName, serial: i64 },

    #[serde(rename = "LocalfsSyncEnabled")]
    LocalfsSyncEnabled,

    #[serde(rename = "LocalfsSyncDisabled")]
    LocalfsSyncDisabled,

    #[serde(rename = "PithosSyncEnabled")]
    PithosSyncEnabled,

    #[serde(rename = "PithosSyncDisabled")]
    PithosSyncDisabled,

    #[serde(rename = "PithosAuthTokenError")]
    PithosAuthTokenError { error: String },

    #[serde(rename = "PithosGenericError")]
    PithosGenericError { error: String },
}

impl Message {
    /// Contract name of this message.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Update { .. } => "UpdateMessage",
            Message::Sync { .. } => "SyncMessage",
            Message::AckSync { .. } => "AckSyncMessage",
            Message::SyncError { .. } => "SyncErrorMessage",
            Message::Collision { .. } => "CollisionMessage",
            Message::ConflictStash { .. } => "ConflictStashMessage",
            Message::LiveInfoUpdate { .. } => "LiveInfoUpdateMessage",
            Message::IgnoreProbe { .. } => "IgnoreProbeMessage",
            Message::AlreadyProbed { .. } => "AlreadyProbedMessage",
            Message::HeartbeatNoProbe { .. } => "HeartbeatNoProbeMessage",
            Message::HeartbeatNoDecide { .. } => "HeartbeatNoDecideMessage",
            Message::HeartbeatReplayDecide { .. } => "HeartbeatReplayDecideMessage",
            Message::HeartbeatSkipDecide { .. } => "HeartbeatSkipDecideMessage",
            Message::FailedSyncIgnoreDecision { .. } => "FailedSyncIgnoreDecisionMessage",
            Message::LocalfsSyncEnabled => "LocalfsSyncEnabled",
            Message::LocalfsSyncDisabled => "LocalfsSyncDisabled",
            Message::PithosSyncEnabled => "PithosSyncEnabled",
            Message::PithosSyncDisabled => "PithosSyncDisabled",
            Message::PithosAuthTokenError { .. } => "PithosAuthTokenError",
            Message::PithosGenericError { .. } => "PithosGenericError",
        }
    }

    fn log(&self) {
        match self {
            Message::Update { archive, objname, serial, old_serial } => {
                tracing::info!(%archive, %objname, serial, old_serial, "archive row updated");
            }
            Message::Sync { archive, objname, serial, .. } => {
                tracing::info!(%archive, %objname, serial, "sync queued");
            }
            Message::AckSync { archive, objname, serial } => {
                tracing::info!(%archive, %objname, serial, "sync acked");
            }
            Message::SyncError { objname, serial, error } => {
                tracing::warn!(%objname, serial, %error, "sync failed");
            }
            Message::Collision { objname, etag } => {
                tracing::warn!(%objname, ?etag, "upload collided with upstream");
            }
            Message::ConflictStash { objname, stash_name } => {
                tracing::warn!(%objname, %stash_name, "stashing conflicting local content");
            }
            Message::LiveInfoUpdate { archive, objname, .. } => {
                tracing::warn!(%archive, %objname, "live info differs; updating source state");
            }
            Message::IgnoreProbe { archive, objname } => {
                tracing::warn!(%archive, %objname, "ignoring excluded object");
            }
            Message::AlreadyProbed { archive, objname, serial } => {
                tracing::debug!(%archive, %objname, serial, "row already ahead of SYNC");
            }
            Message::HeartbeatNoProbe { archive, objname } => {
                tracing::warn!(%archive, %objname, "object is being synced; probe aborted");
            }
            Message::HeartbeatNoDecide { objname } => {
                tracing::warn!(%objname, "object already handled; decide aborted");
            }
            Message::HeartbeatReplayDecide { objname } => {
                tracing::warn!(%objname, "stale heartbeat ignored; re-deciding");
            }
            Message::HeartbeatSkipDecide { objname } => {
                tracing::warn!(%objname, "dead worker too recent; decide skipped");
            }
            Message::FailedSyncIgnoreDecision { objname, serial } => {
                tracing::warn!(%objname, serial, "ignoring failed decision");
            }
            Message::LocalfsSyncEnabled => tracing::info!("local filesystem sync enabled"),
            Message::LocalfsSyncDisabled => tracing::warn!("local filesystem sync disabled"),
            Message::PithosSyncEnabled => tracing::info!("remote sync enabled"),
            Message::PithosSyncDisabled => tracing::warn!("remote sync disabled"),
            Message::PithosAuthTokenError { error } => {
                tracing::error!(%error, "remote auth token rejected");
            }
            Message::PithosGenericError { error } => {
                tracing::error!(%error, "remote service error");
            }
        }
    }
}

/// Bounded multi-producer queue of [`Message`]s.
///
/// Producers never block: when the consumer lags behind capacity, new
/// messages are dropped with a warning. Every message is also logged at
/// put time so dropped messages still reach the log.
pub struct Messager {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl Messager {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx: Mutex::new(rx) }
    }

    pub fn put(&self, msg: Message) {
        msg.log();
        if let Err(err) = self.tx.try_send(msg) {
            tracing::warn!(error = %err, "message queue full; dropping message");
        }
    }

    /// Non-blocking fetch of the next message, if any.
    pub fn get(&self) -> Option<Message> {
        self.rx.lock().try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<Message> {
        let mut rx = self.rx.lock();
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

impl Default for Messager {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
