use super::*;
use sqlx::SqlitePool;
use std::fs;
use syncprop_core::{ItemType, PROVISIONAL_ETAG, PinState};
use tempfile::{TempDir, tempdir};

use crate::sync::journal::SelectiveSyncList;
use crate::sync::vfs::{DEFAULT_VIRTUAL_FILE_SUFFIX, VfsSetupParams};

struct Fixture {
    dir: TempDir,
    journal: Arc<SyncJournal>,
    propagator: Propagator,
    events: mpsc::UnboundedReceiver<PropagatorEvent>,
}

impl Fixture {
    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    async fn record(&self, path: &str, item_type: ItemType) {
        let item = SyncItem::new(path, Instruction::Mkdir, item_type)
            .with_content(1, 1_700_000_000)
            .with_etag(format!("etag-{path}"));
        self.journal
            .set_record(&FileRecord::from_item(&item, MetadataPhase::Final))
            .await
            .unwrap();
    }

    fn drain(&mut self) -> Vec<PropagatorEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

async fn fixture_with(vfs: Vfs, options: SyncOptions, case_sensitive: bool) -> Fixture {
    let dir = tempdir().unwrap();
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let journal = SyncJournal::from_pool(pool);
    journal.init().await.unwrap();
    let journal = Arc::new(journal);

    let vfs = Arc::new(vfs);
    vfs.start(VfsSetupParams {
        filesystem_path: dir.path().to_path_buf(),
        journal: journal.clone(),
    })
    .await
    .unwrap();

    let (propagator, events) =
        Propagator::new(dir.path(), journal.clone(), vfs, options, case_sensitive);
    Fixture {
        dir,
        journal,
        propagator,
        events,
    }
}

async fn fixture() -> Fixture {
    fixture_with(Vfs::off(), SyncOptions::default(), true).await
}

#[tokio::test]
async fn remove_directory_drops_subtree_from_disk_and_journal() {
    let mut fx = fixture().await;
    fx.write("docs/a.txt", "a");
    fx.write("docs/sub/b.txt", "b");
    fx.record("docs", ItemType::Directory).await;
    fx.record("docs/a.txt", ItemType::File).await;
    fx.record("docs/sub", ItemType::Directory).await;
    fx.record("docs/sub/b.txt", ItemType::File).await;
    fx.record("docs2", ItemType::Directory).await;

    let item = SyncItem::new("docs", Instruction::Remove, ItemType::Directory);
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);

    assert!(!fx.path("docs").exists());
    assert!(fx.journal.get_record("docs").await.unwrap().is_none());
    assert!(fx.journal.get_record("docs/sub/b.txt").await.unwrap().is_none());
    assert!(fx.journal.get_record("docs2").await.unwrap().is_some());

    let events = fx.drain();
    assert!(matches!(
        events.last(),
        Some(PropagatorEvent::ItemCompleted { file, status: JobStatus::Success }) if file == "docs"
    ));
}

#[tokio::test]
async fn remove_of_missing_file_still_clears_journal() {
    let fx = fixture().await;
    fx.record("gone.txt", ItemType::File).await;

    let item = SyncItem::new("gone.txt", Instruction::Remove, ItemType::File);
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);
    assert!(fx.journal.get_record("gone.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn remove_refuses_on_name_clash() {
    let fx = fixture_with(Vfs::off(), SyncOptions::default(), false).await;
    fx.write("Report.txt", "keep");
    fx.record("report.txt", ItemType::File).await;

    let item = SyncItem::new("report.txt", Instruction::Remove, ItemType::File);
    let status = fx.propagator.run(item).await;
    assert!(matches!(&status, JobStatus::NormalError(msg) if msg.contains("local file name clash")));
    assert!(fx.path("Report.txt").exists());
    assert!(fx.journal.get_record("report.txt").await.unwrap().is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn partial_remove_keeps_records_of_survivors() {
    use std::os::unix::fs::PermissionsExt;

    let fx = fixture().await;
    fx.write("docs/a.txt", "a");
    fx.write("docs/locked/b.txt", "b");
    for path in ["docs", "docs/a.txt", "docs/locked", "docs/locked/b.txt"] {
        let item_type = if path.ends_with(".txt") {
            ItemType::File
        } else {
            ItemType::Directory
        };
        fx.record(path, item_type).await;
    }

    let locked = fx.path("docs/locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
    // Privileged users ignore directory permissions.
    if fs::write(locked.join("write-check"), "x").is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let item = SyncItem::new("docs", Instruction::Remove, ItemType::Directory);
    let status = fx.propagator.run(item).await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(matches!(&status, JobStatus::NormalError(msg) if msg.contains("b.txt")));
    assert!(!fx.path("docs/a.txt").exists());
    assert!(fx.journal.get_record("docs/a.txt").await.unwrap().is_none());
    assert!(fx.journal.get_record("docs").await.unwrap().is_some());
    assert!(fx.journal.get_record("docs/locked").await.unwrap().is_some());
    assert!(fx.journal.get_record("docs/locked/b.txt").await.unwrap().is_some());
}

#[tokio::test]
async fn mkdir_writes_provisional_record_and_is_idempotent() {
    let mut fx = fixture().await;
    let item = SyncItem::new("photos/2024", Instruction::Mkdir, ItemType::Directory)
        .with_etag("real-etag");

    assert_eq!(fx.propagator.run(item.clone()).await, JobStatus::Success);
    assert!(fx.path("photos/2024").is_dir());
    let record = fx.journal.get_record("photos/2024").await.unwrap().unwrap();
    assert_eq!(record.etag, PROVISIONAL_ETAG);
    assert!(record.is_directory());

    assert_eq!(fx.propagator.run(item.clone()).await, JobStatus::Success);

    let events = fx.drain();
    assert!(events.contains(&PropagatorEvent::TouchedFile(fx.path("photos/2024"))));

    assert_eq!(fx.propagator.finalize_directory(&item).await, JobStatus::Success);
    let record = fx.journal.get_record("photos/2024").await.unwrap().unwrap();
    assert_eq!(record.etag, "real-etag");
}

#[tokio::test]
async fn mkdir_replaces_file_when_allowed() {
    let options = SyncOptions {
        delete_existing_files: true,
        ..SyncOptions::default()
    };
    let fx = fixture_with(Vfs::off(), options, true).await;
    fx.write("notes", "was a file");

    let item = SyncItem::new("notes", Instruction::Mkdir, ItemType::Directory);
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);
    assert!(fx.path("notes").is_dir());
    let record = fx.journal.get_record("notes").await.unwrap().unwrap();
    assert!(record.is_provisional());
}

#[tokio::test]
async fn mkdir_fails_when_file_is_in_the_way() {
    let fx = fixture().await;
    fx.write("notes", "was a file");

    let item = SyncItem::new("notes", Instruction::Mkdir, ItemType::Directory);
    let status = fx.propagator.run(item).await;
    assert!(matches!(status, JobStatus::NormalError(_)));
    assert!(fx.path("notes").is_file());
    assert!(fx.journal.get_record("notes").await.unwrap().is_none());
}

#[tokio::test]
async fn mkdir_conflict_keeps_a_copy_of_the_file() {
    let fx = fixture().await;
    fx.write("notes", "local edits");
    filesystem::set_mod_time(&fx.path("notes"), 0).unwrap();

    let item = SyncItem::new("notes", Instruction::Conflict, ItemType::Directory);
    assert_eq!(fx.propagator.run(item).await, JobStatus::Conflict);

    assert!(fx.path("notes").is_dir());
    let copy = fx.path("notes (conflicted copy 1970-01-01 000000)");
    assert_eq!(fs::read_to_string(copy).unwrap(), "local edits");

    let conflicts = fx.journal.list_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].path, "notes");
    assert_eq!(conflicts[0].conflict_path, "notes (conflicted copy 1970-01-01 000000)");
}

#[tokio::test]
async fn mkdir_refuses_on_name_clash() {
    let fx = fixture_with(Vfs::off(), SyncOptions::default(), false).await;
    fs::create_dir(fx.path("Music")).unwrap();

    let item = SyncItem::new("music", Instruction::Mkdir, ItemType::Directory);
    let status = fx.propagator.run(item).await;
    assert!(matches!(&status, JobStatus::NormalError(msg) if msg.contains("local file name clash")));
    assert!(fx.journal.get_record("music").await.unwrap().is_none());
}

#[tokio::test]
async fn rename_moves_file_and_carries_checksum() {
    let fx = fixture().await;
    fx.write("a.txt", "hello");
    let old = SyncItem::new("a.txt", Instruction::Mkdir, ItemType::File);
    let mut old_record = FileRecord::from_item(&old, MetadataPhase::Final);
    old_record.checksum_header = Some("SHA1:abc".to_string());
    fx.journal.set_record(&old_record).await.unwrap();

    let item = SyncItem::new("a.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("b.txt")
        .with_content(5, 1_700_000_000)
        .with_etag("e2");
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);

    assert!(!fx.path("a.txt").exists());
    assert_eq!(fs::read_to_string(fx.path("b.txt")).unwrap(), "hello");
    assert!(fx.journal.get_record("a.txt").await.unwrap().is_none());
    let record = fx.journal.get_record("b.txt").await.unwrap().unwrap();
    assert_eq!(record.etag, "e2");
    assert_eq!(record.checksum_header.as_deref(), Some("SHA1:abc"));
}

#[tokio::test]
async fn rename_with_identical_paths_only_updates_journal() {
    let mut fx = fixture().await;
    fx.write("moved/inner.txt", "x");

    let item = SyncItem::new("moved/inner.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("moved/inner.txt")
        .with_etag("e1");
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);
    assert!(fx.path("moved/inner.txt").exists());
    assert_eq!(
        fx.journal.get_record("moved/inner.txt").await.unwrap().unwrap().etag,
        "e1"
    );
    assert!(
        !fx.drain()
            .iter()
            .any(|event| matches!(event, PropagatorEvent::TouchedFile(_)))
    );
}

#[tokio::test]
async fn case_only_rename_is_not_a_clash() {
    let fx = fixture_with(Vfs::off(), SyncOptions::default(), false).await;
    fx.write("foo.txt", "x");

    let item = SyncItem::new("foo.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("FOO.txt");
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);
    assert!(fx.path("FOO.txt").exists());
}

#[tokio::test]
async fn rename_refuses_on_name_clash() {
    let fx = fixture_with(Vfs::off(), SyncOptions::default(), false).await;
    fx.write("a.txt", "a");
    fx.write("B.txt", "b");

    let item = SyncItem::new("a.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("b.txt");
    let status = fx.propagator.run(item).await;
    assert!(matches!(&status, JobStatus::NormalError(msg) if msg.contains("local file name clash")));
    assert!(fx.path("a.txt").exists());
}

#[tokio::test]
async fn rename_of_locked_file_is_retried_later() {
    use fs2::FileExt;

    let mut fx = fixture().await;
    fx.write("busy.txt", "x");
    let holder = fs::File::open(fx.path("busy.txt")).unwrap();
    FileExt::lock_exclusive(&holder).unwrap();

    let item = SyncItem::new("busy.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("free.txt");
    let status = fx.propagator.run(item).await;
    FileExt::unlock(&holder).unwrap();

    assert!(matches!(&status, JobStatus::SoftError(msg) if msg.contains("currently in use")));
    assert!(fx.path("busy.txt").exists());
    assert!(fx.drain().contains(&PropagatorEvent::SeenLockedFile {
        path: fx.path("busy.txt"),
        mode: LockMode::Exclusive,
    }));
}

#[tokio::test]
async fn directory_rename_is_remembered_for_children() {
    let fx = fixture().await;
    fx.write("old/child.txt", "c");
    fx.record("old", ItemType::Directory).await;
    fx.journal
        .set_selective_sync_list(
            SelectiveSyncList::BlackList,
            &["old/skip".to_string(), "other".to_string()],
        )
        .await
        .unwrap();

    let dir_item = SyncItem::new("old", Instruction::Rename, ItemType::Directory)
        .with_rename_target("new");
    assert_eq!(fx.propagator.run(dir_item).await, JobStatus::Success);
    assert!(fx.path("new/child.txt").exists());
    assert!(fx.journal.get_record("old").await.unwrap().is_none());
    assert_eq!(
        fx.propagator.renamed_directories().get("old").map(String::as_str),
        Some("new")
    );
    assert_eq!(
        fx.journal
            .selective_sync_list(SelectiveSyncList::BlackList)
            .await
            .unwrap(),
        vec!["new/skip".to_string(), "other".to_string()]
    );

    // A child renamed in the same run is found at its new parent.
    let child = SyncItem::new("old/child.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("new/renamed.txt");
    assert_eq!(fx.propagator.run(child).await, JobStatus::Success);
    assert!(fx.path("new/renamed.txt").exists());
}

#[tokio::test]
async fn rename_downgrades_pin_of_dehydrated_placeholder() {
    let fx = fixture_with(
        Vfs::with_suffix(DEFAULT_VIRTUAL_FILE_SUFFIX),
        SyncOptions::default(),
        true,
    )
    .await;
    fx.write("a.txt.syncprop", " ");
    fx.journal
        .set_pin_state("a.txt.syncprop", PinState::AlwaysLocal)
        .await
        .unwrap();

    let item = SyncItem::new("a.txt.syncprop", Instruction::Rename, ItemType::VirtualFile)
        .with_rename_target("b.txt.syncprop")
        .with_content(1, 1_700_000_000);
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);

    assert_eq!(fx.journal.raw_pin_state("a.txt.syncprop").await.unwrap(), None);
    assert_eq!(
        fx.journal.raw_pin_state("b.txt.syncprop").await.unwrap(),
        Some(PinState::Unspecified)
    );
}

#[tokio::test]
async fn placeholder_moved_under_always_local_folder_is_downgraded() {
    let fx = fixture_with(
        Vfs::with_suffix(DEFAULT_VIRTUAL_FILE_SUFFIX),
        SyncOptions::default(),
        true,
    )
    .await;
    fx.write("a.txt.syncprop", " ");
    fs::create_dir(fx.path("pinned")).unwrap();
    fx.journal
        .set_pin_state("pinned", PinState::AlwaysLocal)
        .await
        .unwrap();

    let item = SyncItem::new("a.txt.syncprop", Instruction::Rename, ItemType::VirtualFile)
        .with_rename_target("pinned/a.txt.syncprop")
        .with_content(1, 1_700_000_000);
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);

    assert!(
        fx.propagator
            .vfs()
            .is_dehydrated_placeholder(&fx.path("pinned/a.txt.syncprop"))
    );
    assert_eq!(
        fx.journal
            .effective_pin_state("pinned/a.txt.syncprop")
            .await
            .unwrap(),
        Some(PinState::Unspecified)
    );
    assert_eq!(
        fx.journal.raw_pin_state("pinned").await.unwrap(),
        Some(PinState::AlwaysLocal)
    );
}

#[tokio::test]
async fn rename_carries_pin_of_hydrated_file() {
    let fx = fixture_with(
        Vfs::with_suffix(DEFAULT_VIRTUAL_FILE_SUFFIX),
        SyncOptions::default(),
        true,
    )
    .await;
    fx.write("a.txt", "real contents");
    fx.journal
        .set_pin_state("a.txt", PinState::OnlineOnly)
        .await
        .unwrap();

    let item = SyncItem::new("a.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("b.txt")
        .with_content(13, 1_700_000_000);
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);
    assert_eq!(
        fx.journal.raw_pin_state("b.txt").await.unwrap(),
        Some(PinState::OnlineOnly)
    );
    assert_eq!(filesystem::mod_time(&fx.path("b.txt")).unwrap(), 1_700_000_000);
}

#[tokio::test]
async fn empty_path_never_removes_the_sync_root() {
    let fx = fixture().await;
    fx.write("keep/a.txt", "a");
    fx.record("keep/a.txt", ItemType::File).await;

    let item = SyncItem::new("", Instruction::Remove, ItemType::Directory);
    let status = fx.propagator.run(item).await;

    assert!(matches!(status, JobStatus::NormalError(_)));
    assert!(fx.path("keep/a.txt").exists());
    assert!(fx.journal.get_record("keep/a.txt").await.unwrap().is_some());
}

#[tokio::test]
async fn paths_escaping_the_root_are_refused() {
    let fx = fixture().await;
    fx.write("inside/a.txt", "a");
    let outside = tempdir().unwrap();
    let victim = outside.path().join("victim.txt");
    fs::write(&victim, "untouched").unwrap();

    let remove = SyncItem::new(
        victim.to_string_lossy().into_owned(),
        Instruction::Remove,
        ItemType::File,
    );
    assert!(matches!(fx.propagator.run(remove).await, JobStatus::NormalError(_)));
    assert!(victim.exists());

    let rename = SyncItem::new("inside/a.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("../escaped.txt");
    assert!(matches!(fx.propagator.run(rename).await, JobStatus::NormalError(_)));
    assert!(fx.path("inside/a.txt").exists());

    let mut mkdir = SyncItem::new("inside/new", Instruction::Mkdir, ItemType::Directory);
    mkdir.original_file = "inside/../..".to_string();
    assert!(matches!(fx.propagator.run(mkdir).await, JobStatus::NormalError(_)));
    assert!(!fx.path("inside/new").exists());

    let no_target = SyncItem::new("inside/a.txt", Instruction::Rename, ItemType::File);
    assert!(matches!(fx.propagator.run(no_target).await, JobStatus::NormalError(_)));
    assert!(fx.path("inside/a.txt").exists());
}

#[tokio::test]
async fn conflict_on_file_item_does_not_create_a_folder() {
    let fx = fixture().await;
    fx.write("notes.txt", "local");

    let item = SyncItem::new("notes.txt", Instruction::Conflict, ItemType::File);
    let status = fx.propagator.run(item).await;

    assert!(matches!(status, JobStatus::NormalError(_)));
    assert!(fx.path("notes.txt").is_file());
    assert!(fx.journal.list_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_announces_the_path_before_deleting() {
    let mut fx = fixture().await;
    fx.write("old.txt", "x");

    let item = SyncItem::new("old.txt", Instruction::Remove, ItemType::File);
    assert_eq!(fx.propagator.run(item).await, JobStatus::Success);
    assert!(fx.drain().contains(&PropagatorEvent::TouchedFile(fx.path("old.txt"))));
}

#[tokio::test]
async fn aborted_jobs_leave_everything_alone() {
    let fx = fixture().await;
    fx.write("a.txt", "a");
    fx.record("a.txt", ItemType::File).await;
    fx.propagator.abort();

    let remove = SyncItem::new("a.txt", Instruction::Remove, ItemType::File);
    assert_eq!(
        fx.propagator.run(remove).await,
        JobStatus::SoftError(ABORTED.to_string())
    );
    let mkdir = SyncItem::new("dir", Instruction::Mkdir, ItemType::Directory);
    assert!(matches!(fx.propagator.run(mkdir).await, JobStatus::SoftError(_)));
    let rename = SyncItem::new("a.txt", Instruction::Rename, ItemType::File)
        .with_rename_target("b.txt");
    assert!(matches!(fx.propagator.run(rename).await, JobStatus::SoftError(_)));

    assert!(fx.path("a.txt").exists());
    assert!(!fx.path("dir").exists());
    assert!(fx.journal.get_record("a.txt").await.unwrap().is_some());
}

#[tokio::test]
async fn renamed_path_uses_longest_known_parent() {
    let fx = fixture().await;
    fx.propagator.record_renamed_directory("a", "x");
    fx.propagator.record_renamed_directory("a/b", "y/z");

    assert_eq!(fx.propagator.adjust_renamed_path("a/b/c.txt"), "y/z/c.txt");
    assert_eq!(fx.propagator.adjust_renamed_path("a/c.txt"), "x/c.txt");
    assert_eq!(fx.propagator.adjust_renamed_path("ab/c.txt"), "ab/c.txt");
    assert_eq!(fx.propagator.adjust_renamed_path("a"), "a");
}

#[tokio::test]
async fn update_metadata_requires_the_file() {
    let fx = fixture().await;
    let item = SyncItem::new("missing", Instruction::Mkdir, ItemType::Directory);
    assert!(
        fx.propagator
            .update_metadata(&item, MetadataPhase::Provisional)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn job_kind_follows_instruction() {
    let options = SyncOptions {
        delete_existing_files: true,
        ..SyncOptions::default()
    };
    let conflict = SyncItem::new("d", Instruction::Conflict, ItemType::Directory);
    assert!(matches!(LocalJob::for_item(conflict, &options), LocalJob::Mkdir(_)));
    let rename = SyncItem::new("d", Instruction::Rename, ItemType::Directory);
    assert!(matches!(LocalJob::for_item(rename, &options), LocalJob::Rename(_)));
    let remove = SyncItem::new("d", Instruction::Remove, ItemType::Directory);
    let job = LocalJob::for_item(remove, &options);
    assert_eq!(job.item().file, "d");
}
