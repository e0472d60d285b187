// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end synchronization scenarios over a temp local root and an
//! in-memory object store.

use amphora_adapters::{FakeObjectStore, LocalfsFileClient, ObjectStore, PithosFileClient};
use amphora_core::{
    ArchiveTag, FakeClock, FileState, HeartBeat, Message, Messager, ObjectName, SyncSettings,
};
use amphora_engine::{build_syncer, FileSyncer};
use amphora_storage::StateStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

struct World {
    _tmp: tempfile::TempDir,
    api: Arc<FakeObjectStore>,
    syncer: Arc<FileSyncer>,
}

impl World {
    async fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = SyncSettings::new(tmp.path().join("root"), "box");
        settings.settings_dir = tmp.path().join("settings");
        let api = Arc::new(FakeObjectStore::new());
        let syncer = build_syncer(settings, api.clone()).await.unwrap();
        syncer.messager().drain();
        Self { _tmp: tmp, api, syncer }
    }

    fn root(&self) -> std::path::PathBuf {
        self.syncer.settings().local_root.clone()
    }

    fn row(&self, archive: &ArchiveTag, name: &str) -> FileState {
        self.syncer
            .store()
            .with_tx(|tx| tx.get_state(archive, &ObjectName::new(name)))
            .unwrap()
    }

    fn drain_names(&self) -> Vec<&'static str> {
        self.syncer.messager().drain().iter().map(Message::name).collect()
    }

    async fn settle(&self) {
        self.syncer.wait_sync_threads(Some(Duration::from_secs(10))).await;
    }

    /// Root-relative files outside the cache, sorted.
    fn local_entries(&self) -> Vec<String> {
        let cache = self.syncer.settings().cache_path();
        let mut names: Vec<String> = walk(&self.root())
            .into_iter()
            .filter(|p| !p.starts_with(&cache))
            .filter_map(|p| {
                p.strip_prefix(self.root()).ok().map(|r| r.to_string_lossy().into_owned())
            })
            .collect();
        names.sort();
        names
    }
}

fn walk(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return out;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        out.push(path.clone());
        if path.is_dir() {
            out.extend(walk(&path));
        }
    }
    out
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn assert_subsequence(haystack: &[&str], needle: &[&str]) {
    let mut it = haystack.iter();
    for expected in needle {
        assert!(
            it.any(|seen| seen == expected),
            "expected {needle:?} as a subsequence of {haystack:?}"
        );
    }
}

#[tokio::test]
async fn upstream_only_create() {
    let world = World::new().await;
    let etag = world.api.put_raw("f001", b"content1", "application/octet-stream");

    world.syncer.probe_archive(world.syncer.master_tag(), true).await;
    let names = world.drain_names();
    assert_eq!(names, vec!["UpdateMessage"]);

    let master = world.row(world.syncer.master_tag(), "f001");
    assert_eq!(master.serial, 0);
    assert_eq!(master.info.get_str("pithos_etag"), Some(etag.as_str()));
    let sync = world.row(&ArchiveTag::SYNC, "f001");
    assert_eq!(sync.serial, -1);
    assert!(sync.info.is_empty());

    world.syncer.decide_archive(None).await;
    world.settle().await;
    let names = world.drain_names();
    assert_eq!(names, vec!["SyncMessage", "AckSyncMessage"]);

    let local = std::fs::read(world.root().join("f001")).unwrap();
    assert_eq!(sha256_hex(&local), sha256_hex(b"content1"));
    assert_eq!(world.row(world.syncer.slave_tag(), "f001").serial, 0);
    assert_eq!(world.row(&ArchiveTag::SYNC, "f001").serial, 0);
}

#[tokio::test]
async fn double_edit_collision() {
    let world = World::new().await;
    std::fs::write(world.root().join("f002"), b"local").unwrap();
    world.api.put_raw("f002", b"upstream", "application/octet-stream");

    // probe only the local side, then decide: the upload must collide
    world.syncer.probe_archive(world.syncer.slave_tag(), true).await;
    world.syncer.decide_archive(None).await;
    world.settle().await;
    let names = world.drain_names();
    assert_eq!(
        names,
        vec!["UpdateMessage", "SyncMessage", "CollisionMessage", "SyncErrorMessage"]
    );

    // a second decide without a new probe ignores the failed decision
    world.syncer.decide_archive(None).await;
    world.settle().await;
    let names = world.drain_names();
    assert_eq!(names, vec!["FailedSyncIgnoreDecisionMessage"]);

    // probing the master breaks the tie: upstream wins, local is stashed
    world.syncer.probe_archive(world.syncer.master_tag(), true).await;
    world.syncer.decide_archive(None).await;
    world.settle().await;
    let names = world.drain_names();
    assert_subsequence(&names, &["SyncMessage", "ConflictStashMessage", "AckSyncMessage"]);

    assert_eq!(std::fs::read(world.root().join("f002")).unwrap(), b"upstream");
    let entries = world.local_entries();
    let stash: Vec<&String> = entries.iter().filter(|n| n.starts_with("f002_")).collect();
    assert_eq!(stash.len(), 1, "expected one stash in {entries:?}");
    assert_eq!(std::fs::read(world.root().join(stash[0])).unwrap(), b"local");
}

#[tokio::test]
async fn directory_created_locally() {
    let world = World::new().await;
    std::fs::create_dir(world.root().join("d003")).unwrap();
    std::fs::write(world.root().join("d003/f003"), b"f2").unwrap();

    world.syncer.probe_archive(world.syncer.slave_tag(), true).await;
    let slave_tag = world.syncer.slave_tag().clone();
    world.syncer.decide_archive(Some(&slave_tag)).await;
    world.settle().await;

    let names = world.drain_names();
    assert_eq!(names.iter().filter(|n| **n == "UpdateMessage").count(), 2);
    assert_eq!(names.iter().filter(|n| **n == "SyncMessage").count(), 2);
    assert_eq!(names.iter().filter(|n| **n == "AckSyncMessage").count(), 2);

    let dir = world.api.object_info("d003").await.unwrap().unwrap();
    assert!(dir.is_dir());
    assert_eq!(world.api.get_raw("d003/f003").unwrap(), b"f2");
}

#[cfg(unix)]
#[tokio::test]
async fn unhandled_softlink() {
    let world = World::new().await;
    std::fs::write(world.root().join("f004"), b"f4 bytes").unwrap();
    world.syncer.probe_archive(world.syncer.slave_tag(), true).await;
    world.syncer.decide_archive(None).await;
    world.settle().await;
    world.drain_names();

    std::os::unix::fs::symlink(world.root().join("f004"), world.root().join("f004.link"))
        .unwrap();
    world.syncer.probe_archive(world.syncer.slave_tag(), true).await;

    let link_row = world.row(world.syncer.slave_tag(), "f004.link");
    assert_eq!(link_row.info.get_str("localfs_type"), Some("unhandled"));
    assert_eq!(link_row.info.get_i64("localfs_size"), None);

    // deciding propagates "nothing to put upstream"
    world.syncer.decide_archive(None).await;
    world.settle().await;
    assert!(world.api.get_raw("f004.link").is_none());
    world.drain_names();

    // upstream then creates a regular file under the same name; the local
    // symlink loses and is stashed
    world.api.put_raw("f004.link", b"regular", "application/octet-stream");
    world.syncer.probe_archive(world.syncer.master_tag(), true).await;
    world.syncer.decide_archive(None).await;
    world.settle().await;

    let names = world.drain_names();
    assert_subsequence(&names, &["SyncMessage", "ConflictStashMessage", "AckSyncMessage"]);
    let live = world.root().join("f004.link");
    assert!(live.symlink_metadata().unwrap().is_file());
    assert_eq!(std::fs::read(&live).unwrap(), b"regular");

    let entries = world.local_entries();
    let stash: Vec<&String> = entries.iter().filter(|n| n.starts_with("f004.link_")).collect();
    assert_eq!(stash.len(), 1, "expected stashed symlink in {entries:?}");
    assert!(world
        .root()
        .join(stash[0])
        .symlink_metadata()
        .unwrap()
        .file_type()
        .is_symlink());
}

#[tokio::test]
async fn live_update_during_staging() {
    let world = World::new().await;
    std::fs::write(world.root().join("f010"), b"f to be changed").unwrap();
    world.syncer.probe_archive(world.syncer.slave_tag(), true).await;
    world.drain_names();

    // the file changes after the probe but before the sync stages it
    std::fs::write(world.root().join("f010"), b"changed").unwrap();

    world.syncer.decide_archive(None).await;
    world.settle().await;
    let names = world.drain_names();
    assert_subsequence(&names, &["SyncMessage", "LiveInfoUpdateMessage", "AckSyncMessage"]);

    let slave = world.row(world.syncer.slave_tag(), "f010");
    assert_eq!(slave.info.get_i64("localfs_size"), Some(7));
    assert_eq!(world.api.get_raw("f010").unwrap(), b"changed");
    let sync = world.row(&ArchiveTag::SYNC, "f010");
    assert_eq!(sync.info.get_i64("localfs_size"), Some(7));
}

#[tokio::test]
async fn heartbeat_serializes_probe_and_decide() {
    // manual wiring so the test drives launch explicitly
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = SyncSettings::new(tmp.path().join("root"), "box");
    settings.settings_dir = tmp.path().join("settings");
    settings.ensure_local_dirs().unwrap();
    let settings = Arc::new(settings);
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    store
        .with_tx(|tx| {
            tx.set_localfs_enabled(true)?;
            tx.set_pithos_enabled(true)
        })
        .unwrap();
    let messager = Arc::new(Messager::default());
    let heartbeat = Arc::new(HeartBeat::new());
    let api = Arc::new(FakeObjectStore::new());
    let master = Arc::new(
        PithosFileClient::new(api.clone(), settings.clone(), store.clone(), messager.clone())
            .unwrap(),
    );
    let slave =
        Arc::new(LocalfsFileClient::new(settings.clone(), store.clone(), messager.clone()).unwrap());
    let syncer = FileSyncer::new(
        settings,
        store,
        messager,
        heartbeat,
        FakeClock::new(),
        master,
        slave,
    );
    api.put_raw("f006", b"payload", "application/octet-stream");

    syncer.probe_all(true).await;
    syncer.messager().drain();

    // decide claims the object but the worker has not launched yet
    syncer.decide_file_syncs(&[ObjectName::new("f006")]);
    assert_eq!(syncer.heartbeat().len(), 1);

    syncer.probe_all(true).await;
    let names: Vec<&str> = syncer.messager().drain().iter().map(Message::name).collect();
    assert!(names.contains(&"HeartbeatNoProbeMessage"), "got {names:?}");

    syncer.decide_file_syncs(&[ObjectName::new("f006")]);
    let names: Vec<&str> = syncer.messager().drain().iter().map(Message::name).collect();
    assert_eq!(names, vec!["HeartbeatNoDecideMessage"]);

    // the worker runs, acks, and releases the heartbeat
    syncer.launch_syncs();
    syncer.wait_sync_threads(Some(Duration::from_secs(10))).await;
    let names: Vec<&str> = syncer.messager().drain().iter().map(Message::name).collect();
    assert_subsequence(&names, &["SyncMessage", "AckSyncMessage"]);
    assert!(syncer.heartbeat().is_empty());

    // probing and deciding proceed normally afterwards
    syncer.probe_all(true).await;
    syncer.decide_file_syncs(&[ObjectName::new("f006")]);
    let names: Vec<&str> = syncer.messager().drain().iter().map(Message::name).collect();
    assert!(!names.iter().any(|n| n.starts_with("Heartbeat")), "got {names:?}");
}

#[tokio::test]
async fn probe_twice_allocates_no_second_serial() {
    let world = World::new().await;
    world.api.put_raw("stable", b"x", "application/octet-stream");

    world.syncer.probe_archive(world.syncer.master_tag(), true).await;
    world.syncer.decide_archive(None).await;
    world.settle().await;
    world.drain_names();

    // the archive is unchanged; re-probing allocates nothing
    world.syncer.probe_archive(world.syncer.master_tag(), true).await;
    assert_eq!(world.row(world.syncer.master_tag(), "stable").serial, 0);
    assert!(world.drain_names().is_empty());
}

#[tokio::test]
async fn cache_is_never_a_candidate() {
    let world = World::new().await;
    std::fs::write(world.root().join("real"), b"x").unwrap();
    std::fs::write(
        world.syncer.settings().cache_stage_path().join("deadbeef"),
        b"staged leftovers",
    )
    .unwrap();

    world.syncer.probe_archive(world.syncer.slave_tag(), true).await;
    world.syncer.decide_archive(None).await;
    world.settle().await;

    assert_eq!(world.api.object_names(), vec!["real".to_string()]);
}
