// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decide transactions
//!
//! The ordering rule is lamport-style with the master winning ties: a
//! master row ahead of SYNC propagates master-to-slave; only when the
//! master is level with SYNC does a slave row ahead of SYNC propagate the
//! other way. An in-flight DECISION row is re-derived instead of re-decided
//! unless its sync previously failed hard.

use super::{FileSyncer, SyncTriple};
use amphora_core::{
    next_claim_id, ArchiveTag, Beat, ClaimId, Clock, Message, ObjectName,
};
use amphora_storage::{StoreError, StoreTx};
use std::collections::HashMap;

/// Everything one decide transaction produced.
#[derive(Debug, Default)]
pub struct DecideRound {
    pub triples: Vec<SyncTriple>,
    pub messages: Vec<Message>,
}

impl<C: Clock> FileSyncer<C> {
    /// Names whose row in some archive is ahead of SYNC.
    pub fn list_deciding(&self, archive: Option<&ArchiveTag>) -> Vec<ObjectName> {
        let archives = match archive {
            Some(archive) => vec![archive.clone()],
            None => vec![self.master_tag.clone(), self.slave_tag.clone()],
        };
        match self.store.with_tx(|tx| tx.list_deciding(&archives, &ArchiveTag::SYNC)) {
            Ok(names) => names.into_iter().collect(),
            Err(err) => {
                tracing::warn!(error = %err, "listing deciding objects failed");
                Vec::new()
            }
        }
    }

    pub fn decide_file_sync(&self, objname: &ObjectName) {
        self.decide_file_syncs(std::slice::from_ref(objname));
    }

    /// Run one decide transaction over the given names and queue the
    /// resulting sync triples.
    pub fn decide_file_syncs(&self, objnames: &[ObjectName]) {
        let claim = next_claim_id();
        let mut round = DecideRound::default();
        let result = self.store.with_tx(|tx| {
            // a busy retry re-runs this closure; drop this round's own
            // heartbeat claims so the re-run decides from scratch
            self.clean_heartbeat(objnames, Some(claim));
            round = self.decide_round(tx, objnames, claim, false)?;
            Ok(())
        });
        match result {
            Ok(()) => {
                for msg in round.messages {
                    self.messager.put(msg);
                }
                self.queue_syncs(round.triples);
            }
            Err(err) => {
                tracing::warn!(error = %err, "decide transaction failed");
                self.clean_heartbeat(objnames, Some(claim));
            }
        }
    }

    /// Dry-run the decide logic without writing DECISION rows, touching the
    /// heartbeat, or emitting messages.
    pub fn dry_run_decisions(&self, objnames: &[ObjectName]) -> Vec<Option<SyncTriple>> {
        let claim = next_claim_id();
        let mut decisions = Vec::new();
        let result = self.store.with_tx(|tx| {
            decisions.clear();
            for objname in objnames {
                let mut scratch = Vec::new();
                decisions.push(self.decide_one(tx, objname, claim, true, &mut scratch)?);
            }
            Ok(())
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "dry-run decide failed");
            return Vec::new();
        }
        decisions
    }

    /// Preview which names would sync, grouped by source archive.
    pub fn check_decisions(&self) -> HashMap<ArchiveTag, Vec<ObjectName>> {
        let deciding = self.list_deciding(None);
        let decisions = self.dry_run_decisions(&deciding);
        let mut by_source: HashMap<ArchiveTag, Vec<ObjectName>> = HashMap::new();
        for decision in decisions.into_iter().flatten() {
            by_source
                .entry(decision.source.archive.clone())
                .or_default()
                .push(decision.source.objname.clone());
        }
        by_source
    }

    fn decide_round(
        &self,
        tx: &StoreTx<'_>,
        objnames: &[ObjectName],
        claim: ClaimId,
        dry_run: bool,
    ) -> Result<DecideRound, StoreError> {
        let mut round = DecideRound::default();
        if !tx.sync_enabled()? {
            tracing::warn!("cannot decide; sync disabled");
            return Ok(round);
        }
        for objname in objnames {
            if let Some(triple) =
                self.decide_one(tx, objname, claim, dry_run, &mut round.messages)?
            {
                if !dry_run {
                    self.heartbeat
                        .set(&self.reg_name(objname), Beat::new(claim, self.clock.epoch_ms()));
                }
                round.triples.push(triple);
            }
        }
        Ok(round)
    }

    fn decide_one(
        &self,
        tx: &StoreTx<'_>,
        objname: &ObjectName,
        claim: ClaimId,
        dry_run: bool,
        messages: &mut Vec<Message>,
    ) -> Result<Option<SyncTriple>, StoreError> {
        tracing::debug!(%objname, "deciding");
        let master_state = tx.get_state(&self.master_tag, objname)?;
        let slave_state = tx.get_state(&self.slave_tag, objname)?;
        let sync_state = tx.get_state(&ArchiveTag::SYNC, objname)?;
        let decision_state = tx.get_state(&ArchiveTag::DECISION, objname)?;
        let master_serial = master_state.serial;
        let slave_serial = slave_state.serial;
        let sync_serial = sync_state.serial;
        let decision_serial = decision_state.serial;

        if let Some(beat) = self.heartbeat.get(&self.reg_name(objname)) {
            if beat.claim == claim {
                tracing::warn!(%objname, claim, "claim already used in this round");
                return Ok(None);
            }
            if beat.is_live() {
                if !dry_run {
                    messages.push(Message::HeartbeatNoDecide { objname: objname.clone() });
                }
                return Ok(None);
            }
            if self.clock.younger_than(beat.at_ms, self.settings.action_max_wait_ms()) {
                if !dry_run {
                    messages.push(Message::HeartbeatSkipDecide { objname: objname.clone() });
                }
                return Ok(None);
            }
            if !dry_run {
                messages.push(Message::HeartbeatReplayDecide { objname: objname.clone() });
            }
        }

        if decision_serial != sync_serial {
            let failed = self
                .failed_serials
                .lock()
                .contains_key(&(decision_serial, objname.clone()));
            if !failed {
                tracing::debug!(%objname, decision_serial, sync_serial, "already decided");
                if decision_serial == master_serial {
                    return Ok(Some(SyncTriple {
                        source: master_state,
                        target: slave_state,
                        sync: sync_state,
                    }));
                }
                if decision_serial == slave_serial {
                    return Ok(Some(SyncTriple {
                        source: slave_state,
                        target: master_state,
                        sync: sync_state,
                    }));
                }
                tracing::error!(
                    %objname,
                    decision_serial,
                    "decision serial matches no archive; skipping"
                );
                return Ok(None);
            }
            if !dry_run {
                messages.push(Message::FailedSyncIgnoreDecision {
                    objname: objname.clone(),
                    serial: decision_serial,
                });
            }
        }

        if master_serial > sync_serial {
            if master_serial == decision_serial {
                // this decision failed before; wait for a newer serial
                return Ok(None);
            }
            if !dry_run {
                tx.put_state(
                    &decision_state
                        .with_serial(master_serial)
                        .with_info(master_state.info.clone()),
                )?;
            }
            return Ok(Some(SyncTriple {
                source: master_state,
                target: slave_state,
                sync: sync_state,
            }));
        }
        if master_serial == sync_serial {
            if slave_serial > sync_serial {
                if slave_serial == decision_serial {
                    return Ok(None);
                }
                if !dry_run {
                    tx.put_state(
                        &decision_state
                            .with_serial(slave_serial)
                            .with_info(slave_state.info.clone()),
                    )?;
                }
                return Ok(Some(SyncTriple {
                    source: slave_state,
                    target: master_state,
                    sync: sync_state,
                }));
            }
            if slave_serial == sync_serial {
                return Ok(None);
            }
            tracing::error!(%objname, slave_serial, sync_serial, "slave behind sync; skipping");
            return Ok(None);
        }
        tracing::error!(%objname, master_serial, sync_serial, "master behind sync; skipping");
        Ok(None)
    }
}
