// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::client::TargetHandle as _;
use amphora_core::{next_claim_id, FileInfo, Messager, SyncSettings, T_FILE};
use amphora_storage::StateStore;
use std::fs;
use std::path::Path;
use yare::parameterized;

struct Fixture {
    _tmp: tempfile::TempDir,
    settings: Arc<SyncSettings>,
    store: Arc<StateStore>,
    messager: Arc<Messager>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Arc::new(SyncSettings::new(tmp.path().join("root"), "box"));
        settings.ensure_local_dirs().unwrap();
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store.with_tx(|tx| tx.set_localfs_enabled(true)).unwrap();
        let messager = Arc::new(Messager::default());
        Self { _tmp: tmp, settings, store, messager }
    }

    fn client(&self) -> LocalfsFileClient {
        let client = LocalfsFileClient::new(
            self.settings.clone(),
            self.store.clone(),
            self.messager.clone(),
        )
        .unwrap();
        // drop the enable/disable announcement
        self.messager.drain();
        client
    }

    fn root(&self) -> &Path {
        &self.settings.local_root
    }

    fn state(&self, name: &str, info: FileInfo) -> FileState {
        FileState {
            archive: ArchiveTag::new(LOCALFS_SIGNATURE),
            objname: ObjectName::new(name),
            serial: 0,
            info,
        }
    }

    fn live_state(&self, name: &str) -> FileState {
        let path = ObjectName::new(name).to_local(self.root());
        let info = fsinfo::live_info(&path, false).unwrap();
        self.state(name, info)
    }
}

#[parameterized(
    emacs_lock = { ".#report.txt" },
    emacs_backup = { ".~report.txt" },
    office_owner = { "~$report.docx" },
    office_tmp = { "~report.tmp" },
    vim_swap = { ".report.txt.swp" },
)]
fn excluded_names(name: &str) {
    let fixture = Fixture::new();
    let client = fixture.client();
    assert!(client.exclude_file(&ObjectName::new(name)));
    assert!(client.exclude_file(&ObjectName::new(format!("sub/dir/{name}"))));
}

#[test]
fn cache_tree_and_plain_names_exclusion() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let cache = fixture.settings.cache_name.clone();
    assert!(client.exclude_file(&ObjectName::new(format!("{cache}/staged/x"))));
    assert!(!client.exclude_file(&ObjectName::new("report.txt")));
    assert!(!client.exclude_file(&ObjectName::new("tmp/report.txt")));
}

#[tokio::test]
async fn forced_listing_walks_tree_and_db() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fs::write(fixture.root().join("top.txt"), b"x").unwrap();
    fs::create_dir(fixture.root().join("d")).unwrap();
    fs::write(fixture.root().join("d/inner.txt"), b"y").unwrap();
    // a name only the database knows (deleted while we were not running)
    fixture
        .store
        .with_tx(|tx| {
            tx.put_state(&fixture.state("ghost", FileInfo::empty().with("localfs_type", T_FILE)))
        })
        .unwrap();

    let mut names = client.list_candidate_files(true).await.unwrap();
    names.sort();
    let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
    assert_eq!(names, vec!["d", "d/inner.txt", "ghost", "top.txt"]);
}

#[tokio::test]
async fn forced_listing_skips_cache_tree() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fs::write(fixture.settings.cache_stage_path().join("h"), b"x").unwrap();

    let names = client.list_candidate_files(true).await.unwrap();
    assert!(names.is_empty(), "cache entries leaked: {names:?}");
}

#[tokio::test]
async fn missing_root_disables_localfs() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fs::remove_dir_all(fixture.root()).unwrap();

    let names = client.list_candidate_files(true).await.unwrap();
    assert!(names.is_empty());
    assert!(!fixture.store.with_tx(|tx| tx.localfs_enabled()).unwrap());
    let drained = fixture.messager.drain();
    assert!(drained.contains(&Message::LocalfsSyncDisabled));
}

#[tokio::test]
async fn probe_reports_changes_and_quiesces() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fs::write(fixture.root().join("f"), b"content").unwrap();

    let absent = fixture.state("f", FileInfo::empty());
    let live = client
        .probe_file(&ObjectName::new("f"), &absent, &absent, next_claim_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.info.get_str("localfs_type"), Some(T_FILE));
    assert_eq!(live.info.get_i64("localfs_size"), Some(7));

    // unchanged → no new state
    let unchanged = client
        .probe_file(&ObjectName::new("f"), &live, &live, next_claim_id())
        .await
        .unwrap();
    assert!(unchanged.is_none());
}

#[tokio::test]
async fn probe_excluded_emits_ignore() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let state = fixture.state(".#lock", FileInfo::empty());
    let probed = client
        .probe_file(&ObjectName::new(".#lock"), &state, &state, next_claim_id())
        .await
        .unwrap();
    assert!(probed.is_none());
    let drained = fixture.messager.drain();
    assert!(matches!(drained.first(), Some(Message::IgnoreProbe { .. })));
}

#[tokio::test]
async fn staging_pins_copy_and_reserves_name() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fs::write(fixture.root().join("f"), b"content").unwrap();

    let mut handle = client.stage_file(fixture.live_state("f")).await.unwrap();
    let staged = handle.staged_path().unwrap();
    assert!(staged.starts_with(fixture.settings.cache_stage_path()));
    assert_eq!(fs::read(&staged).unwrap(), b"content");

    let member = fixture.settings.cache_member_name(
        &fixture.settings.cache_stage_name,
        &amphora_core::util::hash_name("f"),
    );
    let row = fixture.store.with_tx(|tx| tx.get_cachename(&member)).unwrap();
    assert!(row.is_some());

    handle.unstage_file().await.unwrap();
    assert!(!staged.exists());
    assert!(fixture.store.with_tx(|tx| tx.get_cachename(&member)).unwrap().is_none());
    // idempotent
    handle.unstage_file().await.unwrap();
}

#[tokio::test]
async fn staging_refreshes_stale_source_info() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fs::write(fixture.root().join("f"), b"changed").unwrap();

    // recorded info is stale (smaller file, older mtime)
    let stale = fixture.state(
        "f",
        FileInfo::empty()
            .with("localfs_type", T_FILE)
            .with("localfs_mtime", 1.0)
            .with("localfs_size", 1),
    );
    let handle = client.stage_file(stale).await.unwrap();
    let refreshed = handle.get_synced_state();
    assert_eq!(refreshed.info.get_i64("localfs_size"), Some(7));

    let drained = fixture.messager.drain();
    assert!(drained.iter().any(|m| matches!(m, Message::LiveInfoUpdate { .. })));
    // the refreshed info also landed in the store
    let row = fixture
        .store
        .with_tx(|tx| tx.get_state(&ArchiveTag::new(LOCALFS_SIGNATURE), &ObjectName::new("f")))
        .unwrap();
    assert_eq!(row.info.get_i64("localfs_size"), Some(7));
}

#[tokio::test]
async fn staging_dir_and_deleted_sources_is_a_no_op() {
    let fixture = Fixture::new();
    let client = fixture.client();

    let dir = fixture.state("d", FileInfo::empty().with("localfs_type", "dir"));
    let handle = client.stage_file(dir).await.unwrap();
    assert!(handle.staged_path().is_none());
    assert!(handle.info_is_dir());

    let deleted = fixture.state("gone", FileInfo::empty());
    let handle = client.stage_file(deleted).await.unwrap();
    assert!(handle.staged_path().is_none());
    assert!(handle.info_is_deleted_or_unhandled());
}

fn fetched_file(fixture: &Fixture, content: &[u8]) -> std::path::PathBuf {
    let path = fixture.settings.cache_fetch_path().join("fetched_test");
    fs::write(&path, content).unwrap();
    path
}

struct StubSource {
    path: std::path::PathBuf,
    state: FileState,
}

#[async_trait]
impl crate::client::SourceHandle for StubSource {
    async fn send_file(&mut self, _sync_state: &FileState) -> Result<std::path::PathBuf, SyncError> {
        Ok(self.path.clone())
    }

    fn get_synced_state(&self) -> FileState {
        self.state.clone()
    }

    async fn unstage_file(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    fn staged_path(&self) -> Option<std::path::PathBuf> {
        Some(self.path.clone())
    }

    fn info_is_dir(&self) -> bool {
        false
    }

    fn info_is_deleted_or_unhandled(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn pull_links_fetched_file_into_place() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let fetched = fetched_file(&fixture, b"upstream");

    let target_state = fixture.state("new/file.txt", FileInfo::empty());
    let sync_state = fixture.state("new/file.txt", FileInfo::empty()).with_serial(-1);
    let mut source = StubSource { path: fetched, state: fixture.state("new/file.txt", FileInfo::empty()) };
    let mut target = client.prepare_target(target_state);

    let synced = target.pull(&mut source, &sync_state).await.unwrap();
    assert_eq!(synced.info.get_str("localfs_type"), Some(T_FILE));
    assert_eq!(fs::read(fixture.root().join("new/file.txt")).unwrap(), b"upstream");
}

#[tokio::test]
async fn pull_stashes_conflicting_local_content() {
    let fixture = Fixture::new();
    let client = fixture.client();
    // local content the sync state has never seen
    fs::write(fixture.root().join("f"), b"local edit").unwrap();
    let fetched = fetched_file(&fixture, b"upstream");

    let target_state = fixture.live_state("f");
    let sync_state = fixture.state("f", FileInfo::empty()).with_serial(-1);
    let mut source = StubSource { path: fetched, state: fixture.state("f", FileInfo::empty()) };
    let mut target = client.prepare_target(target_state);

    target.pull(&mut source, &sync_state).await.unwrap();

    assert_eq!(fs::read(fixture.root().join("f")).unwrap(), b"upstream");
    let stash: Vec<_> = fs::read_dir(fixture.root())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("f_"))
        .collect();
    assert_eq!(stash.len(), 1, "expected one stash, got {stash:?}");
    let stashed = fs::read(fixture.root().join(&stash[0])).unwrap();
    assert_eq!(stashed, b"local edit");

    let drained = fixture.messager.drain();
    assert!(drained.iter().any(|m| matches!(m, Message::ConflictStash { .. })));
}

#[tokio::test]
async fn pull_with_matching_content_produces_no_stash() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fs::write(fixture.root().join("f"), b"same").unwrap();
    let fetched = fetched_file(&fixture, b"same");

    let live = fixture.live_state("f");
    let sync_state = live.clone().with_serial(0);
    let mut source = StubSource { path: fetched, state: live.clone() };
    let mut target = client.prepare_target(live);

    target.pull(&mut source, &sync_state).await.unwrap();
    let stash_count = fs::read_dir(fixture.root())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("f_"))
        .count();
    assert_eq!(stash_count, 0);
    assert_eq!(fs::read(fixture.root().join("f")).unwrap(), b"same");
}

struct DeletedSource;

#[async_trait]
impl crate::client::SourceHandle for DeletedSource {
    async fn send_file(&mut self, _sync_state: &FileState) -> Result<std::path::PathBuf, SyncError> {
        // the remote object is gone; the fetch path does not exist
        Ok(std::path::PathBuf::from("/nonexistent/fetch"))
    }

    fn get_synced_state(&self) -> FileState {
        FileState::absent(ArchiveTag::new("pithos"), ObjectName::new("f"))
    }

    async fn unstage_file(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    fn staged_path(&self) -> Option<std::path::PathBuf> {
        None
    }

    fn info_is_dir(&self) -> bool {
        false
    }

    fn info_is_deleted_or_unhandled(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn pull_deletion_removes_unchanged_local_file() {
    let fixture = Fixture::new();
    let client = fixture.client();
    fs::write(fixture.root().join("f"), b"synced content").unwrap();

    let live = fixture.live_state("f");
    // SYNC knows exactly this content: deletion wins, nothing stashed
    let sync_state = live.clone().with_serial(0);
    let mut source = DeletedSource;
    let mut target = client.prepare_target(live);

    target.pull(&mut source, &sync_state).await.unwrap();
    assert!(!fixture.root().join("f").exists());
    let drained = fixture.messager.drain();
    assert!(!drained.iter().any(|m| matches!(m, Message::ConflictStash { .. })));
}

#[tokio::test]
async fn watcher_enqueues_created_files() {
    let fixture = Fixture::new();
    let client = fixture.client();
    let notifier = client.notifier().unwrap();

    fs::write(fixture.root().join("seen.txt"), b"x").unwrap();

    let mut found = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let names = client.candidates.names();
        if names.iter().any(|n| n.as_str() == "seen.txt") {
            found = true;
            break;
        }
    }
    notifier.stop(None).await;
    assert!(found, "watcher never reported the created file");
}
