// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::client::{SourceHandle as _, TargetHandle as _};
use crate::pithos::fake::{put_raw_dir, FakeObjectStore};
use amphora_core::{next_claim_id, Messager, SyncSettings};
use std::sync::Arc;

struct Fixture {
    _tmp: tempfile::TempDir,
    api: Arc<FakeObjectStore>,
    settings: Arc<SyncSettings>,
    store: Arc<StateStore>,
    messager: Arc<Messager>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = SyncSettings::new(tmp.path().join("root"), "box");
        settings.pithos_list_interval = 0.2;
        let settings = Arc::new(settings);
        settings.ensure_local_dirs().unwrap();
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store.with_tx(|tx| tx.set_pithos_enabled(true)).unwrap();
        Self {
            _tmp: tmp,
            api: Arc::new(FakeObjectStore::new()),
            settings,
            store,
            messager: Arc::new(Messager::default()),
        }
    }

    fn client(&self) -> PithosFileClient {
        let client = PithosFileClient::new(
            self.api.clone(),
            self.settings.clone(),
            self.store.clone(),
            self.messager.clone(),
        )
        .unwrap();
        self.messager.drain();
        client
    }

    fn state(&self, name: &str, info: FileInfo) -> FileState {
        FileState {
            archive: ArchiveTag::new(PITHOS_SIGNATURE),
            objname: ObjectName::new(name),
            serial: 0,
            info,
        }
    }
}

#[tokio::test]
async fn probe_observes_etag_and_type() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let etag = fixture.api.put_raw("f", b"content", "application/octet-stream");

    let absent = fixture.state("f", FileInfo::empty());
    let live = client
        .probe_file(&ObjectName::new("f"), &absent, &absent, next_claim_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.info.get_str(PITHOS_ETAG), Some(etag.as_str()));
    assert_eq!(live.info.get_str(PITHOS_TYPE), Some(T_FILE));

    // unchanged probe reports nothing
    assert!(client
        .probe_file(&ObjectName::new("f"), &live, &live, next_claim_id())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn probe_of_absent_object_reports_deletion() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let recorded = fixture.state(
        "gone",
        FileInfo::empty().with(PITHOS_ETAG, "old").with(PITHOS_TYPE, T_FILE),
    );
    let live = client
        .probe_file(&ObjectName::new("gone"), &recorded, &recorded, next_claim_id())
        .await
        .unwrap()
        .unwrap();
    assert!(live.info.is_empty());
}

#[tokio::test]
async fn probe_skips_deletion_sentinels() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let name = format!("f.abc{STAGED_FOR_DELETION_SUFFIX}");
    let state = fixture.state(&name, FileInfo::empty());
    let probed = client
        .probe_file(&ObjectName::new(name.as_str()), &state, &state, next_claim_id())
        .await
        .unwrap();
    assert!(probed.is_none());
    let drained = fixture.messager.drain();
    assert!(matches!(drained.first(), Some(Message::IgnoreProbe { .. })));
}

#[tokio::test]
async fn forced_listing_caches_live_info() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fixture.api.put_raw("f1", b"one", "application/octet-stream");
    put_raw_dir(&fixture.api, "d1");
    fixture.api.put_raw(
        &format!("x.etag{STAGED_FOR_DELETION_SUFFIX}"),
        b"",
        "application/octet-stream",
    );

    let mut names = client.list_candidate_files(true).await.unwrap();
    names.sort();
    let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
    assert_eq!(names, vec!["d1", "f1"]);

    // the cached info is used by the probe without a second HEAD
    let absent = fixture.state("d1", FileInfo::empty());
    let live = client
        .probe_file(&ObjectName::new("d1"), &absent, &absent, next_claim_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.info.get_str(PITHOS_TYPE), Some(T_DIR));
}

#[tokio::test]
async fn deletion_diff_enqueues_empty_info_candidates() {
    let fixture = Fixture::new();
    let client = fixture.client();
    // the database still believes "gone" exists upstream
    fixture
        .store
        .with_tx(|tx| {
            tx.put_state(&fixture.state(
                "gone",
                FileInfo::empty().with(PITHOS_ETAG, "h").with(PITHOS_TYPE, T_FILE),
            ))
        })
        .unwrap();

    let names = client.list_candidate_files(true).await.unwrap();
    assert_eq!(names, vec![ObjectName::new("gone")]);

    let recorded = fixture
        .store
        .with_tx(|tx| tx.get_state(&client.signature(), &ObjectName::new("gone")))
        .unwrap();
    let live = client
        .probe_file(&ObjectName::new("gone"), &recorded, &recorded, next_claim_id())
        .await
        .unwrap()
        .unwrap();
    assert!(live.info.is_empty());
}

#[tokio::test]
async fn missing_container_disables_remote() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fixture.api.set_container_present(false);

    let names = client.list_candidate_files(true).await.unwrap();
    assert!(names.is_empty());
    assert!(!fixture.store.with_tx(|tx| tx.pithos_enabled()).unwrap());
    let drained = fixture.messager.drain();
    assert!(drained.contains(&Message::PithosSyncDisabled));
}

#[tokio::test]
async fn ensure_ready_recreates_container() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fixture.api.set_container_present(false);
    client.ensure_ready().await.unwrap();
    assert!(fixture.api.container_exists().await.unwrap());
}

#[tokio::test]
async fn source_download_stages_under_fetch_cache() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let etag = fixture.api.put_raw("f", b"payload", "application/octet-stream");
    let recorded = fixture.state(
        "f",
        FileInfo::empty().with(PITHOS_ETAG, etag.as_str()).with(PITHOS_TYPE, T_FILE),
    );

    let mut source = client.stage_file(recorded.clone()).await.unwrap();
    let sync_state = fixture.state("f", FileInfo::empty()).with_serial(-1);
    let fetched = source.send_file(&sync_state).await.unwrap();
    assert!(fetched.starts_with(fixture.settings.cache_fetch_path()));
    assert_eq!(std::fs::read(&fetched).unwrap(), b"payload");
    // info matched the recorded state, so no live-info refresh
    assert!(!fixture
        .messager
        .drain()
        .iter()
        .any(|m| matches!(m, Message::LiveInfoUpdate { .. })));

    source.unstage_file().await.unwrap();
    assert!(!fetched.exists());
}

#[tokio::test]
async fn source_download_of_changed_object_refreshes_state() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fixture.api.put_raw("f", b"new content", "application/octet-stream");
    // recorded etag is stale
    let recorded = fixture.state(
        "f",
        FileInfo::empty().with(PITHOS_ETAG, "stale").with(PITHOS_TYPE, T_FILE),
    );

    let mut source = client.stage_file(recorded).await.unwrap();
    let sync_state = fixture.state("f", FileInfo::empty()).with_serial(-1);
    source.send_file(&sync_state).await.unwrap();

    let refreshed = source.get_synced_state();
    assert_ne!(refreshed.info.get_str(PITHOS_ETAG), Some("stale"));
    assert!(fixture
        .messager
        .drain()
        .iter()
        .any(|m| matches!(m, Message::LiveInfoUpdate { .. })));
}

#[tokio::test]
async fn source_download_of_deleted_object_leaves_nothing() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let recorded = fixture.state(
        "gone",
        FileInfo::empty().with(PITHOS_ETAG, "h").with(PITHOS_TYPE, T_FILE),
    );
    let mut source = client.stage_file(recorded).await.unwrap();
    let sync_state = fixture.state("gone", FileInfo::empty()).with_serial(-1);
    let fetched = source.send_file(&sync_state).await.unwrap();
    assert!(!fetched.exists());
    assert!(source.get_synced_state().info.is_empty());
}

struct LocalStub {
    staged: Option<std::path::PathBuf>,
    dir: bool,
    deleted: bool,
}

#[async_trait]
impl crate::client::SourceHandle for LocalStub {
    async fn send_file(&mut self, _sync_state: &FileState) -> Result<std::path::PathBuf, SyncError> {
        self.staged.clone().ok_or_else(|| SyncError::Sync("nothing staged".to_string()))
    }

    fn get_synced_state(&self) -> FileState {
        FileState::absent(ArchiveTag::new("localfs"), ObjectName::new("f"))
    }

    async fn unstage_file(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    fn staged_path(&self) -> Option<std::path::PathBuf> {
        self.staged.clone()
    }

    fn info_is_dir(&self) -> bool {
        self.dir
    }

    fn info_is_deleted_or_unhandled(&self) -> bool {
        self.deleted
    }
}

#[tokio::test]
async fn target_uploads_fresh_file_with_if_none_match() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let staged = fixture.settings.cache_stage_path().join("s");
    std::fs::write(&staged, b"local bytes").unwrap();

    let target_state = fixture.state("f", FileInfo::empty());
    let sync_state = fixture.state("f", FileInfo::empty()).with_serial(-1);
    let mut source = LocalStub { staged: Some(staged), dir: false, deleted: false };
    let mut target = client.prepare_target(target_state);

    let synced = target.pull(&mut source, &sync_state).await.unwrap();
    assert_eq!(synced.info.get_str(PITHOS_TYPE), Some(T_FILE));
    assert!(synced.info.get_str(PITHOS_ETAG).is_some());
    assert_eq!(fixture.api.get_raw("f").unwrap(), b"local bytes");
}

#[tokio::test]
async fn target_upload_collision_is_reported() {
    let fixture = Fixture::new();
    let client = fixture.client();
    // upstream already created the object we think is fresh
    fixture.api.put_raw("f", b"upstream", "application/octet-stream");
    let staged = fixture.settings.cache_stage_path().join("s");
    std::fs::write(&staged, b"local").unwrap();

    let target_state = fixture.state("f", FileInfo::empty());
    let sync_state = fixture.state("f", FileInfo::empty()).with_serial(-1);
    let mut source = LocalStub { staged: Some(staged), dir: false, deleted: false };
    let mut target = client.prepare_target(target_state);

    let err = target.pull(&mut source, &sync_state).await.unwrap_err();
    assert!(matches!(err, SyncError::Collision(_)));
    assert!(err.is_hard());
    let drained = fixture.messager.drain();
    assert!(drained.iter().any(|m| matches!(m, Message::Collision { .. })));
    // upstream content survived
    assert_eq!(fixture.api.get_raw("f").unwrap(), b"upstream");
}

#[tokio::test]
async fn target_creates_directory_object() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let target_state = fixture.state("d", FileInfo::empty());
    let sync_state = fixture.state("d", FileInfo::empty()).with_serial(-1);
    let mut source = LocalStub { staged: None, dir: true, deleted: false };
    let mut target = client.prepare_target(target_state);

    let synced = target.pull(&mut source, &sync_state).await.unwrap();
    assert_eq!(synced.info.get_str(PITHOS_TYPE), Some(T_DIR));
    let info = fixture.api.object_info("d").await.unwrap().unwrap();
    assert!(info.is_dir());
}

#[tokio::test]
async fn target_deletes_via_sentinel() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let etag = fixture.api.put_raw("f", b"bytes", "application/octet-stream");

    let target_state = fixture.state(
        "f",
        FileInfo::empty().with(PITHOS_ETAG, etag.as_str()).with(PITHOS_TYPE, T_FILE),
    );
    let sync_state = fixture
        .state("f", FileInfo::empty().with(PITHOS_ETAG, etag.as_str()).with(PITHOS_TYPE, T_FILE))
        .with_serial(0);
    let mut source = LocalStub { staged: None, dir: false, deleted: true };
    let mut target = client.prepare_target(target_state);

    let synced = target.pull(&mut source, &sync_state).await.unwrap();
    assert!(synced.info.is_empty());
    assert!(fixture.api.get_raw("f").is_none());
    assert!(fixture.api.object_names().is_empty(), "sentinel left behind");
}

#[tokio::test]
async fn target_delete_tolerates_already_gone() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let target_state = fixture.state(
        "f",
        FileInfo::empty().with(PITHOS_ETAG, "h").with(PITHOS_TYPE, T_FILE),
    );
    let sync_state = fixture
        .state("f", FileInfo::empty().with(PITHOS_ETAG, "h").with(PITHOS_TYPE, T_FILE))
        .with_serial(0);
    let mut source = LocalStub { staged: None, dir: false, deleted: true };
    let mut target = client.prepare_target(target_state);

    let synced = target.pull(&mut source, &sync_state).await.unwrap();
    assert!(synced.info.is_empty());
}

#[tokio::test]
async fn poller_picks_up_new_and_deleted_objects() {
    let fixture = Fixture::new();
    let client = fixture.client();
    // anchor the poller's "updated since" at the current listing
    client.list_candidate_files(true).await.unwrap();

    let notifier = client.notifier().unwrap();
    fixture.api.put_raw("later", b"x", "application/octet-stream");

    let mut found = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if client.candidates.names().iter().any(|n| n.as_str() == "later") {
            found = true;
            break;
        }
    }
    notifier.stop(None).await;
    assert!(found, "poller never reported the new object");
}
