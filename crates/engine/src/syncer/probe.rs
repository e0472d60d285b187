// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe transactions
//!
//! Clients observe live state outside the write transaction (the remote
//! probe is an HTTP round trip); `update_file_state` re-reads the row
//! inside the transaction and drops the update when the serial moved, so
//! the serial discipline holds without a database lock across I/O.

use super::FileSyncer;
use amphora_adapters::ArchiveClient;
use amphora_core::{
    next_claim_id, ArchiveTag, ClaimId, Clock, FileState, Message, ObjectName, SyncError,
};

impl<C: Clock> FileSyncer<C> {
    /// Probe both archives.
    pub async fn probe_all(&self, forced: bool) {
        let master_tag = self.master_tag.clone();
        let slave_tag = self.slave_tag.clone();
        self.probe_archive(&master_tag, forced).await;
        self.probe_archive(&slave_tag, forced).await;
    }

    /// Drain one archive's candidates through probe transactions.
    pub async fn probe_archive(&self, archive: &ArchiveTag, forced: bool) {
        let Some(client) = self.client(archive) else {
            tracing::warn!(%archive, "probe for unknown archive");
            return;
        };
        let claim = next_claim_id();
        let candidates = match client.list_candidate_files(forced).await {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(%archive, error = %err, "listing candidates failed");
                return;
            }
        };
        if let Err(err) = self.probe_files(client.as_ref(), archive, &candidates, claim).await {
            // leave the candidates in place; the next round retries them
            tracing::warn!(%archive, error = %err, "probe round failed");
            return;
        }
        client.remove_candidates(&candidates, claim);
    }

    /// Probe a single object by name.
    pub async fn probe_file(&self, archive: &ArchiveTag, objname: &ObjectName) {
        let Some(client) = self.client(archive) else {
            return;
        };
        let claim = next_claim_id();
        let names = std::slice::from_ref(objname);
        if let Err(err) = self.probe_files(client.as_ref(), archive, names, claim).await {
            tracing::warn!(%archive, %objname, error = %err, "probe failed");
            return;
        }
        client.remove_candidates(names, claim);
    }

    async fn probe_files(
        &self,
        client: &dyn ArchiveClient,
        archive: &ArchiveTag,
        objnames: &[ObjectName],
        claim: ClaimId,
    ) -> Result<(), SyncError> {
        for objname in objnames {
            self.probe_one(client, archive, objname, claim).await?;
        }
        Ok(())
    }

    async fn probe_one(
        &self,
        client: &dyn ArchiveClient,
        archive: &ArchiveTag,
        objname: &ObjectName,
        claim: ClaimId,
    ) -> Result<(), SyncError> {
        tracing::debug!(%archive, %objname, "probing");
        let (db_state, ref_state) = self
            .store
            .with_tx(|tx| {
                Ok((
                    tx.get_state(archive, objname)?,
                    tx.get_state(&ArchiveTag::SYNC, objname)?,
                ))
            })
            .map_err(SyncError::from)?;

        if let Some(beat) = self.heartbeat.get(&self.reg_name(objname)) {
            if beat.is_live() {
                self.messager.put(Message::HeartbeatNoProbe {
                    archive: archive.clone(),
                    objname: objname.clone(),
                });
                return Ok(());
            }
        }

        if db_state.serial != ref_state.serial {
            self.messager.put(Message::AlreadyProbed {
                archive: archive.clone(),
                objname: objname.clone(),
                serial: db_state.serial,
            });
            return Ok(());
        }

        if let Some(live_state) = client.probe_file(objname, &db_state, &ref_state, claim).await? {
            self.update_file_state(live_state)?;
        }
        Ok(())
    }

    /// Advance an archive row to a freshly observed state.
    pub(crate) fn update_file_state(&self, live_state: FileState) -> Result<(), SyncError> {
        let mut advanced: Option<(i64, i64)> = None;
        self.store
            .with_tx(|tx| {
                advanced = None;
                let db_state = tx.get_state(&live_state.archive, &live_state.objname)?;
                if db_state.serial != live_state.serial {
                    tracing::warn!(
                        archive = %live_state.archive,
                        objname = %live_state.objname,
                        serial = live_state.serial,
                        db_serial = db_state.serial,
                        "row advanced during probe; dropping update"
                    );
                    return Ok(());
                }
                let new_serial = tx.new_serial(&live_state.objname)?;
                tx.put_state(&live_state.clone().with_serial(new_serial))?;
                if new_serial == 0 {
                    // first row ever for this name: seed the SYNC row
                    tx.put_state(&FileState::absent(
                        ArchiveTag::SYNC,
                        live_state.objname.clone(),
                    ))?;
                }
                advanced = Some((new_serial, live_state.serial));
                Ok(())
            })
            .map_err(SyncError::from)?;
        if let Some((serial, old_serial)) = advanced {
            self.messager.put(Message::Update {
                archive: live_state.archive.clone(),
                objname: live_state.objname.clone(),
                serial,
                old_serial,
            });
        }
        Ok(())
    }
}
