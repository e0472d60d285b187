// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ack transactions

use super::FileSyncer;
use amphora_core::{ArchiveTag, Clock, FileState, Message, SyncError};
use amphora_storage::{StoreError, StoreTx};

impl<C: Clock> FileSyncer<C> {
    /// Record a completed sync: advance both archive rows, write the merged
    /// SYNC row, mirror it into DECISION, release the heartbeat.
    pub fn ack_file_sync(
        &self,
        synced_source: &FileState,
        synced_target: &FileState,
    ) -> Result<(), SyncError> {
        let objname = synced_source.objname.clone();
        let serial = synced_source.serial;
        let target_archive = synced_target.archive.clone();
        tracing::debug!(archive = %target_archive, %objname, serial, "acking");

        let outcome = self
            .store
            .with_tx(|tx| ack_tx(tx, synced_source, synced_target))
            .map_err(SyncError::from)?;
        outcome?;

        self.heartbeat.remove(&self.reg_name(&objname));
        self.messager.put(Message::AckSync { archive: target_archive, objname, serial });
        Ok(())
    }
}

fn ack_tx(
    tx: &StoreTx<'_>,
    synced_source: &FileState,
    synced_target: &FileState,
) -> Result<Result<(), SyncError>, StoreError> {
    let objname = &synced_source.objname;
    let serial = synced_source.serial;

    let decision_state = tx.get_state(&ArchiveTag::DECISION, objname)?;
    let sync_state = tx.get_state(&ArchiveTag::SYNC, objname)?;

    if serial != decision_state.serial {
        // the system is inconsistent; refuse to record anything
        return Ok(Err(SyncError::Sync(format!(
            "serial mismatch: assumed sync {serial}, decision {}",
            decision_state.serial
        ))));
    }
    if serial <= sync_state.serial {
        return Ok(Err(SyncError::Sync(format!(
            "cannot ack: serial {serial} <= sync serial {}",
            sync_state.serial
        ))));
    }

    tx.put_state(synced_source)?;
    tx.put_state(&synced_target.clone().with_serial(serial))?;

    // The info namespace is global; target keys win on collisions so the
    // merged SYNC row reflects what both sides observed after the transfer.
    let sync_info = synced_source.info.merged_with(&synced_target.info);
    let new_sync_state = sync_state.with_serial(serial).with_info(sync_info);
    tx.put_state(&new_sync_state)?;
    tx.put_state(&new_sync_state.clone().with_archive(ArchiveTag::DECISION))?;
    Ok(Ok(()))
}
