// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The file syncer
//!
//! Owns the probe → decide → sync → ack pipeline over the two archive
//! clients: notifiers and the periodic prober deposit candidates, probes
//! advance archive rows, decides pick a winning side per object, and a
//! capped pool of sync workers transfers content and acks.

mod ack;
mod decide;
mod probe;

pub use decide::DecideRound;

use crate::periodic::PeriodicWorker;
use amphora_adapters::{ArchiveClient, NotifierHandle};
use amphora_core::{
    ArchiveTag, Clock, FileState, HeartBeat, Message, Messager, ObjectName, SyncError,
    SyncSettings, SystemClock,
};
use amphora_storage::StateStore;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// One decided sync: which state propagates, which is replaced, and the
/// last reconciled state between them.
#[derive(Debug, Clone)]
pub struct SyncTriple {
    pub source: FileState,
    pub target: FileState,
    pub sync: FileState,
}

/// Orchestrates synchronization between the master (remote) and slave
/// (local) archives.
pub struct FileSyncer<C: Clock = SystemClock> {
    pub(crate) settings: Arc<SyncSettings>,
    pub(crate) store: Arc<StateStore>,
    pub(crate) messager: Arc<Messager>,
    pub(crate) heartbeat: Arc<HeartBeat>,
    pub(crate) clock: C,
    master: Arc<dyn ArchiveClient>,
    slave: Arc<dyn ArchiveClient>,
    pub(crate) master_tag: ArchiveTag,
    pub(crate) slave_tag: ArchiveTag,
    /// (serial, objname) pairs whose sync failed hard; not retried until a
    /// newer serial appears.
    pub(crate) failed_serials: Mutex<HashMap<(i64, ObjectName), FileState>>,
    sync_queue: Mutex<VecDeque<SyncTriple>>,
    sync_tasks: Mutex<Vec<JoinHandle<()>>>,
    notifiers: Mutex<HashMap<ArchiveTag, NotifierHandle>>,
    decide_worker: Mutex<Option<PeriodicWorker>>,
}

impl<C: Clock> FileSyncer<C> {
    pub fn new(
        settings: Arc<SyncSettings>,
        store: Arc<StateStore>,
        messager: Arc<Messager>,
        heartbeat: Arc<HeartBeat>,
        clock: C,
        master: Arc<dyn ArchiveClient>,
        slave: Arc<dyn ArchiveClient>,
    ) -> Arc<Self> {
        let master_tag = master.signature();
        let slave_tag = slave.signature();
        Arc::new(Self {
            settings,
            store,
            messager,
            heartbeat,
            clock,
            master,
            slave,
            master_tag,
            slave_tag,
            failed_serials: Mutex::new(HashMap::new()),
            sync_queue: Mutex::new(VecDeque::new()),
            sync_tasks: Mutex::new(Vec::new()),
            notifiers: Mutex::new(HashMap::new()),
            decide_worker: Mutex::new(None),
        })
    }

    pub(crate) fn client(&self, tag: &ArchiveTag) -> Option<Arc<dyn ArchiveClient>> {
        if *tag == self.master_tag {
            Some(self.master.clone())
        } else if *tag == self.slave_tag {
            Some(self.slave.clone())
        } else {
            None
        }
    }

    pub(crate) fn reg_name(&self, objname: &ObjectName) -> String {
        objname.reg_name(self.settings.case_insensitive)
    }

    pub fn master_tag(&self) -> &ArchiveTag {
        &self.master_tag
    }

    pub fn slave_tag(&self) -> &ArchiveTag {
        &self.slave_tag
    }

    pub fn settings(&self) -> &Arc<SyncSettings> {
        &self.settings
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn messager(&self) -> &Arc<Messager> {
        &self.messager
    }

    pub fn heartbeat(&self) -> &Arc<HeartBeat> {
        &self.heartbeat
    }

    pub fn decide_active(&self) -> bool {
        self.decide_worker.lock().as_ref().map(PeriodicWorker::is_active).unwrap_or(false)
    }

    pub fn paused(&self) -> bool {
        !self.decide_active()
    }

    pub fn get_next_message(&self) -> Option<Message> {
        self.messager.get()
    }

    // -- daemon lifecycle --

    /// Start notifiers and drain everything they cannot have delivered yet
    /// with a forced probe of both archives.
    pub async fn initiate_probe(self: &Arc<Self>) {
        self.start_notifiers();
        self.probe_all(true).await;
    }

    pub fn start_notifiers(&self) {
        let mut notifiers = self.notifiers.lock();
        for client in [&self.master, &self.slave] {
            let tag = client.signature();
            if notifiers.contains_key(&tag) {
                tracing::info!(archive = %tag, "notifier already up");
                continue;
            }
            match client.notifier() {
                Ok(handle) => {
                    notifiers.insert(tag, handle);
                }
                Err(err) => {
                    tracing::warn!(archive = %tag, error = %err, "failed to start notifier");
                }
            }
        }
    }

    pub async fn stop_notifiers(&self, timeout: Option<Duration>) -> Option<Duration> {
        let handles: Vec<NotifierHandle> = {
            let mut notifiers = self.notifiers.lock();
            notifiers.drain().map(|(_, handle)| handle).collect()
        };
        let mut remaining = timeout;
        for handle in handles {
            remaining = handle.stop(remaining).await;
        }
        remaining
    }

    /// Start the periodic decide worker.
    pub fn start_decide(self: &Arc<Self>) {
        let mut worker = self.decide_worker.lock();
        if worker.as_ref().map(PeriodicWorker::is_active).unwrap_or(false) {
            return;
        }
        let syncer = self.clone();
        *worker = Some(PeriodicWorker::spawn("decide", self.settings.decide_period(), move || {
            let syncer = syncer.clone();
            async move {
                syncer.decide_all_archives().await;
            }
        }));
        tracing::info!("started syncing");
    }

    pub async fn stop_decide(&self, timeout: Option<Duration>) -> Option<Duration> {
        let worker = self.decide_worker.lock().take();
        match worker {
            Some(worker) if worker.is_active() => {
                let remaining = worker.stop(timeout).await;
                tracing::info!("stopped syncing");
                remaining
            }
            _ => timeout,
        }
    }

    /// Stop the decide worker, then the notifiers, sharing one budget.
    pub async fn stop_all_daemons(&self, timeout: Option<Duration>) -> Option<Duration> {
        let remaining = self.stop_decide(timeout).await;
        self.stop_notifiers(remaining).await
    }

    /// Join all launched sync workers within the budget.
    pub async fn wait_sync_threads(&self, timeout: Option<Duration>) -> Option<Duration> {
        let tasks: Vec<JoinHandle<()>> = self.sync_tasks.lock().drain(..).collect();
        let mut remaining = timeout;
        for task in tasks {
            match remaining {
                None => {
                    let _ = task.await;
                }
                Some(limit) => {
                    let started = Instant::now();
                    let _ = tokio::time::timeout(limit, task).await;
                    remaining = Some(limit.saturating_sub(started.elapsed()));
                }
            }
        }
        remaining
    }

    /// One decide round: re-probe quietly, then decide and launch.
    pub async fn decide_all_archives(self: &Arc<Self>) {
        tracing::debug!("checking candidates to sync");
        self.probe_all(false).await;
        self.decide_archive(None).await;
    }

    /// Decide the deciding set of one archive (or both) and launch syncs.
    pub async fn decide_archive(self: &Arc<Self>, archive: Option<&ArchiveTag>) {
        let objnames = self.list_deciding(archive);
        self.decide_file_syncs(&objnames);
        self.launch_syncs();
    }

    pub(crate) fn clean_heartbeat(&self, objnames: &[ObjectName], claim: Option<u64>) {
        for objname in objnames {
            let reg = self.reg_name(objname);
            match claim {
                Some(claim) => {
                    self.heartbeat.remove_if_claim(&reg, claim);
                }
                None => {
                    self.heartbeat.remove(&reg);
                }
            }
        }
    }

    // -- sync workers --

    /// Launch queued syncs up to the worker cap.
    pub fn launch_syncs(self: &Arc<Self>) {
        let alive = self.heartbeat.live_worker_count();
        let slots = self.settings.max_alive_sync_threads.saturating_sub(alive);
        if slots > 0 {
            tracing::debug!(slots, "can start syncs");
        }
        for _ in 0..slots {
            let Some(triple) = self.sync_queue.lock().pop_front() else {
                break;
            };
            self.sync_file(triple);
        }
    }

    pub(crate) fn queue_syncs(&self, triples: Vec<SyncTriple>) {
        let mut queue = self.sync_queue.lock();
        for triple in triples {
            queue.push_back(triple);
        }
    }

    pub fn queued_sync_count(&self) -> usize {
        self.sync_queue.lock().len()
    }

    fn sync_file(self: &Arc<Self>, triple: SyncTriple) {
        self.messager.put(Message::Sync {
            archive: triple.source.archive.clone(),
            objname: triple.source.objname.clone(),
            serial: triple.source.serial,
            info: triple.source.info.clone(),
        });
        let reg = self.reg_name(&triple.source.objname);
        let syncer = self.clone();
        let task = tokio::spawn(async move {
            syncer.run_sync_worker(triple).await;
        });
        if !self.heartbeat.set_worker(&reg, task.abort_handle()) {
            tracing::error!(%reg, "heartbeat entry missing for launched sync");
        }
        self.sync_tasks.lock().push(task);
    }

    async fn run_sync_worker(self: Arc<Self>, triple: SyncTriple) {
        let objname = triple.source.objname.clone();
        let serial = triple.source.serial;
        if let Err(err) = self.run_sync(&triple).await {
            if err.is_hard() {
                tracing::warn!(%objname, serial, "marking failed serial");
                self.failed_serials
                    .lock()
                    .insert((serial, objname.clone()), triple.source.clone());
            }
            self.messager.put(Message::SyncError {
                objname: objname.clone(),
                serial,
                error: err.to_string(),
            });
            self.heartbeat.remove(&self.reg_name(&objname));
        }
    }

    async fn run_sync(&self, triple: &SyncTriple) -> Result<(), SyncError> {
        let source_client = self.client(&triple.source.archive).ok_or_else(|| {
            SyncError::Sync(format!("unknown source archive '{}'", triple.source.archive))
        })?;
        let target_client = self.client(&triple.target.archive).ok_or_else(|| {
            SyncError::Sync(format!("unknown target archive '{}'", triple.target.archive))
        })?;

        let mut source = source_client.stage_file(triple.source.clone()).await?;
        let mut target = target_client.prepare_target(triple.target.clone());
        let pulled = target.pull(source.as_mut(), &triple.sync).await;
        let synced_source = source.get_synced_state();
        if let Err(err) = source.unstage_file().await {
            tracing::warn!(objname = %triple.source.objname, error = %err, "unstage failed");
        }
        let synced_target = pulled?;
        self.ack_file_sync(&synced_source, &synced_target)
    }

    /// Wipe archive rows, re-enable both sides, and re-create the local
    /// cache tree and the remote container as needed.
    pub async fn purge_db_archives_and_enable(&self) -> Result<(), SyncError> {
        self.store
            .with_tx(|tx| {
                tx.purge_archives()?;
                tx.set_localfs_enabled(true)?;
                tx.set_pithos_enabled(true)
            })
            .map_err(SyncError::from)?;
        self.slave.ensure_ready().await?;
        self.master.ensure_ready().await?;
        self.messager.put(Message::LocalfsSyncEnabled);
        self.messager.put(Message::PithosSyncEnabled);
        Ok(())
    }
}

#[cfg(test)]
#[path = "syncer_tests.rs"]
mod tests;
