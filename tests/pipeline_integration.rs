use async_trait::async_trait;
use librarian::error::LibraryError;
use librarian::extract::{ExtractError, TextExtractor};
use librarian::index::sqlite::SqliteIndex;
use librarian::index::store::{DocumentIdentifier, DocumentRecord, IndexStore, StoreError};
use librarian::library::Library;
use librarian::library::config::LibraryConfig;
use librarian::sync::{Pipeline, PipelineState, SyncReport};
use librarian::tree::diff::{ChangeOperation, verify_order};
use librarian::tree::snapshot::SnapshotError;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use tokio_util::sync::CancellationToken;

async fn setup() -> Result<(TempDir, Library, SqliteIndex), LibraryError> {
    let tmpdir = TempDir::new()?;
    let library = Library::init(tmpdir.path())?;
    let index = library.open_index().await?;
    Ok((tmpdir, library, index))
}

async fn update(library: &Library, index: &SqliteIndex) -> Result<SyncReport, LibraryError> {
    Pipeline::new(library, index)?.run().await
}

/// Store that rejects writes for one path, or every call when `down` is set.
struct FlakyStore<'a> {
    inner: &'a SqliteIndex,
    reject: Option<&'a str>,
    down: bool,
}

#[async_trait]
impl<'a> IndexStore for FlakyStore<'a> {
    async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        if self.down {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        if self.reject == Some(record.path.as_str()) {
            return Err(StoreError::Write {
                path: record.path.clone(),
                reason: "constraint violated".into(),
            });
        }
        self.inner.upsert(record).await
    }

    async fn remove(&self, path: &str) -> Result<bool, StoreError> {
        self.inner.remove(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.inner.exists(path).await
    }

    async fn get(&self, path: &str) -> Result<Option<DocumentRecord>, StoreError> {
        self.inner.get(path).await
    }

    async fn list_identifiers(&self) -> Result<Vec<DocumentIdentifier>, StoreError> {
        self.inner.list_identifiers().await
    }
}

struct BrokenExtractor;

impl TextExtractor for BrokenExtractor {
    fn extract_text(&self, _path: &Path, extension: &str) -> Result<String, ExtractError> {
        Err(ExtractError::Unsupported(extension.to_string()))
    }
}

#[tokio::test]
async fn empty_library_update_reports_nothing() -> Result<(), LibraryError> {
    let (_tmpdir, library, index) = setup().await?;

    let report = update(&library, &index).await?;

    assert_eq!(report, SyncReport::default());
    assert!(library.snapshot_store().load()?.is_empty());
    assert_eq!(index.count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn new_file_is_created_in_store_and_snapshot() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("a.txt"), "0123456789")?;

    let pipeline = Pipeline::new(&library, &index)?;
    let planned = pipeline.plan().await?;
    assert_eq!(planned.len(), 1);
    assert!(matches!(&planned[0], ChangeOperation::CreateFile(e) if e.relative_path == "a.txt"));

    let report = update(&library, &index).await?;
    assert_eq!(report.created, 1);
    assert_eq!(report.operations(), 1);

    let doc = index.get("a.txt").await?.expect("a.txt should be indexed");
    assert_eq!(doc.path, "a.txt");
    assert_eq!(doc.filename, "a.txt");
    assert_eq!(doc.extension, "txt");
    assert_eq!(doc.size, 10);
    assert_eq!(doc.text, "0123456789");
    assert_eq!(doc.hash, "");

    let snapshot = library.snapshot_store().load()?;
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].relative_path, "a.txt");

    Ok(())
}

#[tokio::test]
async fn deleted_file_is_removed_from_store_and_snapshot() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    let file = tmpdir.path().join("a.txt");
    fs::write(&file, "0123456789")?;
    update(&library, &index).await?;

    fs::remove_file(&file)?;
    let report = update(&library, &index).await?;

    assert_eq!(report.removed, 1);
    assert_eq!(report.operations(), 1);
    assert!(!index.exists("a.txt").await?);
    assert!(library.snapshot_store().load()?.is_empty());

    Ok(())
}

#[tokio::test]
async fn modified_file_is_updated() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    let file = tmpdir.path().join("notes.md");
    fs::write(&file, "first draft")?;
    update(&library, &index).await?;

    fs::write(&file, "second, longer draft")?;
    let report = update(&library, &index).await?;

    assert_eq!(report.updated, 1);
    let doc = index.get("notes.md").await?.unwrap();
    assert_eq!(doc.text, "second, longer draft");
    assert_eq!(doc.size, 20);

    Ok(())
}

#[tokio::test]
async fn second_run_without_changes_is_a_no_op() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::create_dir_all(tmpdir.path().join("papers/2024"))?;
    fs::write(tmpdir.path().join("papers/2024/draft.md"), "# Draft")?;
    fs::write(tmpdir.path().join("papers/index.json"), "{}")?;
    fs::write(tmpdir.path().join("cover.png"), [0u8; 16])?;

    let first = update(&library, &index).await?;
    assert_eq!(first.created, 3);
    assert_eq!(first.directories, 2);

    let snapshot_before = fs::read(library.snapshot_path())?;
    let mut records_before = Vec::new();
    for id in index.list_identifiers().await? {
        records_before.push(index.get(&id.path).await?);
    }

    let second = update(&library, &index).await?;
    assert_eq!(second.operations(), 0);
    assert_eq!(second, SyncReport::default());

    assert_eq!(fs::read(library.snapshot_path())?, snapshot_before);
    let mut records_after = Vec::new();
    for id in index.list_identifiers().await? {
        records_after.push(index.get(&id.path).await?);
    }
    assert_eq!(records_after, records_before);

    Ok(())
}

#[tokio::test]
async fn renamed_file_is_moved_without_losing_text() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("notes.md"), "rename me")?;
    update(&library, &index).await?;

    fs::rename(tmpdir.path().join("notes.md"), tmpdir.path().join("renamed.md"))?;
    let report = update(&library, &index).await?;

    assert_eq!(report.moved, 1);
    assert_eq!(report.operations(), 1);
    assert!(!index.exists("notes.md").await?);
    let doc = index.get("renamed.md").await?.unwrap();
    assert_eq!(doc.filename, "renamed.md");
    assert_eq!(doc.text, "rename me");

    Ok(())
}

#[tokio::test]
async fn rename_without_move_detection_has_the_same_effect() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    let config = LibraryConfig {
        detect_moves: false,
        ..LibraryConfig::default()
    };
    fs::create_dir(tmpdir.path().join("old"))?;
    fs::write(tmpdir.path().join("old/notes.md"), "rename me")?;
    Pipeline::new(&library, &index)?
        .with_config(config.clone())
        .run()
        .await?;

    fs::rename(tmpdir.path().join("old"), tmpdir.path().join("new"))?;
    let report = Pipeline::new(&library, &index)?
        .with_config(config)
        .run()
        .await?;

    assert_eq!(report.moved, 0);
    assert_eq!(report.removed, 1);
    assert_eq!(report.created, 1);

    let ids: Vec<_> = index
        .list_identifiers()
        .await?
        .into_iter()
        .map(|id| id.path)
        .collect();
    assert_eq!(ids, vec!["new/notes.md"]);
    assert_eq!(index.get("new/notes.md").await?.unwrap().text, "rename me");

    Ok(())
}

#[tokio::test]
async fn rejected_write_is_reported_and_run_continues() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    for name in ["a.txt", "b.txt", "c.txt"] {
        fs::write(tmpdir.path().join(name), name)?;
    }

    let store = FlakyStore {
        inner: &index,
        reject: Some("b.txt"),
        down: false,
    };
    let mut pipeline = Pipeline::new(&library, &store)?;
    let report = pipeline.run().await?;

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].path, "b.txt");
    assert_eq!(report.failures[0].operation, "create");

    assert!(index.exists("a.txt").await?);
    assert!(!index.exists("b.txt").await?);
    assert!(index.exists("c.txt").await?);

    // snapshot tracks the filesystem, not what the store accepted
    let snapshot = library.snapshot_store().load()?;
    assert_eq!(snapshot.entries.len(), 3);

    Ok(())
}

#[tokio::test]
async fn unavailable_store_fails_the_run_and_keeps_snapshot() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("a.txt"), "a")?;
    let snapshot_before = fs::read(library.snapshot_path())?;

    let store = FlakyStore {
        inner: &index,
        reject: None,
        down: true,
    };
    let mut pipeline = Pipeline::new(&library, &store)?;
    let result = pipeline.run().await;

    assert!(matches!(result, Err(LibraryError::Store(StoreError::Unavailable(_)))));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(fs::read(library.snapshot_path())?, snapshot_before);
    assert!(!library.lock_path().exists());

    Ok(())
}

#[tokio::test]
async fn failed_extraction_still_indexes_the_file() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("paper.pdf"), b"%PDF-1.4 not really")?;
    fs::write(tmpdir.path().join("readme.txt"), "hello")?;

    let report = Pipeline::new(&library, &index)?
        .with_extractor(Arc::new(BrokenExtractor))
        .run()
        .await?;

    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 0);
    let doc = index.get("paper.pdf").await?.unwrap();
    assert_eq!(doc.extension, "pdf");
    assert_eq!(doc.text, "");

    Ok(())
}

#[tokio::test]
async fn fingerprints_are_stored_when_enabled() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("a.txt"), "abc")?;

    let config = LibraryConfig {
        fingerprint: true,
        ..LibraryConfig::default()
    };
    Pipeline::new(&library, &index)?
        .with_config(config)
        .run()
        .await?;

    let ids = index.list_identifiers().await?;
    assert_eq!(ids.len(), 1);
    assert_eq!(
        ids[0].hash,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );

    Ok(())
}

#[tokio::test]
async fn concurrent_run_is_rejected_as_busy() -> Result<(), LibraryError> {
    let (_tmpdir, library, index) = setup().await?;
    let _held = library.lock()?;

    let mut pipeline = Pipeline::new(&library, &index)?;
    let result = pipeline.run().await;

    assert!(matches!(result, Err(LibraryError::LibraryBusy(_))));
    assert_eq!(pipeline.state(), PipelineState::Failed);

    Ok(())
}

#[tokio::test]
async fn cancelled_run_leaves_snapshot_untouched() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("a.txt"), "a")?;
    let snapshot_before = fs::read(library.snapshot_path())?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = Pipeline::new(&library, &index)?
        .run_with_cancel(&cancel)
        .await;

    assert!(matches!(result, Err(LibraryError::Cancelled)));
    assert_eq!(fs::read(library.snapshot_path())?, snapshot_before);

    Ok(())
}

#[tokio::test]
async fn interrupted_snapshot_write_leaves_previous_snapshot() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("a.txt"), "a")?;
    update(&library, &index).await?;
    let committed = library.snapshot_store().load()?;

    // a crash between writing the temp file and renaming it into place
    let mut partial = NamedTempFile::new_in(library.control_dir())?;
    partial.write_all(br#"{"version": 1, "entries": [{"relativePath": "b.t"#)?;
    let (_file, _kept) = partial.keep().map_err(|e| e.error)?;

    assert_eq!(library.snapshot_store().load()?, committed);

    fs::write(tmpdir.path().join("b.txt"), "b")?;
    let report = update(&library, &index).await?;
    assert_eq!(report.created, 1);

    Ok(())
}

#[tokio::test]
async fn corrupt_snapshot_fails_without_overwriting() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("a.txt"), "a")?;
    fs::write(library.snapshot_path(), "not json")?;

    let result = update(&library, &index).await;

    assert!(matches!(
        result,
        Err(LibraryError::Snapshot(SnapshotError::Corrupt { .. }))
    ));
    assert_eq!(fs::read_to_string(library.snapshot_path())?, "not json");
    assert_eq!(index.count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn missing_snapshot_bootstraps_a_full_index() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::remove_file(library.snapshot_path())?;
    fs::create_dir(tmpdir.path().join("docs"))?;
    fs::write(tmpdir.path().join("docs/a.md"), "# a")?;

    let report = update(&library, &index).await?;

    assert_eq!(report.created, 1);
    assert_eq!(report.directories, 1);
    assert_eq!(library.snapshot_store().load()?.entries.len(), 2);

    Ok(())
}

#[tokio::test]
async fn file_replaced_by_directory_is_reindexed() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    let x = tmpdir.path().join("x");
    fs::write(&x, "was a file")?;
    update(&library, &index).await?;

    fs::remove_file(&x)?;
    fs::create_dir(&x)?;
    fs::write(x.join("inner.txt"), "now a directory")?;

    let planned = Pipeline::new(&library, &index)?.plan().await?;
    verify_order(&planned).expect("patch must be safely ordered");

    let report = update(&library, &index).await?;
    assert_eq!(report.removed, 1);
    assert_eq!(report.created, 1);
    assert!(!index.exists("x").await?);
    assert!(index.exists("x/inner.txt").await?);

    Ok(())
}

#[tokio::test]
async fn control_folder_is_never_indexed() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("a.md"), "a")?;

    update(&library, &index).await?;

    let snapshot = library.snapshot_store().load()?;
    assert!(
        snapshot
            .entries
            .iter()
            .all(|e| !e.relative_path.starts_with(".doc"))
    );
    assert_eq!(index.count().await?, 1);

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn special_files_are_indexed_without_reading_them() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    let status = std::process::Command::new("mkfifo")
        .arg(tmpdir.path().join("pipe.txt"))
        .status()?;
    assert!(status.success());
    std::os::unix::fs::symlink("/dev/zero", tmpdir.path().join("zero.txt"))?;
    fs::write(tmpdir.path().join("real.txt"), "real")?;

    let config = LibraryConfig {
        fingerprint: true,
        ..LibraryConfig::default()
    };
    let mut pipeline = Pipeline::new(&library, &index)?.with_config(config);
    let report = tokio::time::timeout(std::time::Duration::from_secs(10), pipeline.run())
        .await
        .expect("update must not block on special files")?;

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(report.created, 3);
    assert_eq!(report.failed, 0);

    for name in ["pipe.txt", "zero.txt"] {
        let doc = index.get(name).await?.unwrap();
        assert_eq!(doc.text, "");
        assert_eq!(doc.hash, "");
    }
    let real = index.get("real.txt").await?.unwrap();
    assert_eq!(real.text, "real");
    assert_eq!(real.hash.len(), 64);
    assert!(!library.lock_path().exists());

    Ok(())
}

/// Store that swaps the control folder for a plain file on its first write,
/// so the snapshot can no longer be written next to itself.
#[cfg(unix)]
struct ControlDirVanishes<'a> {
    inner: &'a SqliteIndex,
    control_dir: std::path::PathBuf,
    parked: std::path::PathBuf,
}

#[cfg(unix)]
#[async_trait]
impl<'a> IndexStore for ControlDirVanishes<'a> {
    async fn upsert(&self, _record: &DocumentRecord) -> Result<(), StoreError> {
        let vanish = || -> std::io::Result<()> {
            fs::rename(&self.control_dir, &self.parked)?;
            fs::write(&self.control_dir, "")
        };
        vanish().map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<bool, StoreError> {
        self.inner.remove(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.inner.exists(path).await
    }

    async fn get(&self, path: &str) -> Result<Option<DocumentRecord>, StoreError> {
        self.inner.get(path).await
    }

    async fn list_identifiers(&self) -> Result<Vec<DocumentIdentifier>, StoreError> {
        self.inner.list_identifiers().await
    }
}

#[cfg(unix)]
#[tokio::test]
async fn failed_snapshot_write_keeps_previous_snapshot() -> Result<(), LibraryError> {
    let (tmpdir, library, index) = setup().await?;
    fs::write(tmpdir.path().join("a.txt"), "a")?;
    update(&library, &index).await?;
    let snapshot_before = fs::read(library.snapshot_path())?;

    fs::write(tmpdir.path().join("b.txt"), "b")?;
    let store = ControlDirVanishes {
        inner: &index,
        control_dir: library.control_dir(),
        parked: tmpdir.path().join("parked-control-dir"),
    };
    let mut pipeline = Pipeline::new(&library, &store)?;
    let result = pipeline.run().await;

    fs::remove_file(library.control_dir())?;
    fs::rename(&store.parked, library.control_dir())?;

    let err = result.expect_err("snapshot write should fail");
    assert!(matches!(err, LibraryError::SnapshotPersist(_)));
    assert!(err.to_string().contains("previous snapshot remains valid"));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert_eq!(fs::read(library.snapshot_path())?, snapshot_before);

    Ok(())
}

#[tokio::test]
async fn move_with_different_content_is_reextracted_when_fingerprinting() -> Result<(), LibraryError>
{
    let (tmpdir, library, index) = setup().await?;
    let config = LibraryConfig {
        fingerprint: true,
        ..LibraryConfig::default()
    };
    let old = tmpdir.path().join("a.md");
    fs::write(&old, "aaaa")?;
    Pipeline::new(&library, &index)?
        .with_config(config.clone())
        .run()
        .await?;

    // same size, mtime and mode, different bytes
    let mtime = fs::metadata(&old)?.modified()?;
    fs::remove_file(&old)?;
    let new = tmpdir.path().join("b.md");
    fs::write(&new, "bbbb")?;
    fs::File::options().write(true).open(&new)?.set_modified(mtime)?;

    let report = Pipeline::new(&library, &index)?
        .with_config(config)
        .run()
        .await?;

    assert_eq!(report.moved, 1);
    assert!(!index.exists("a.md").await?);
    let doc = index.get("b.md").await?.unwrap();
    assert_eq!(doc.text, "bbbb");
    assert_eq!(doc.hash, librarian::sync::applier::fingerprint(&new)?);

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_directory_is_reported() -> Result<(), LibraryError> {
    use std::os::unix::fs::PermissionsExt;

    let (tmpdir, library, index) = setup().await?;
    let docs = tmpdir.path().join("docs");
    fs::create_dir(&docs)?;
    fs::write(docs.join("a.txt"), "a")?;
    update(&library, &index).await?;

    fs::set_permissions(&docs, fs::Permissions::from_mode(0o000))?;
    // permission bits do not apply to privileged users
    if fs::read_dir(&docs).is_ok() {
        fs::set_permissions(&docs, fs::Permissions::from_mode(0o755))?;
        return Ok(());
    }

    let result = update(&library, &index).await;
    fs::set_permissions(&docs, fs::Permissions::from_mode(0o755))?;
    let report = result?;

    assert_eq!(report.unreadable, vec!["docs"]);
    assert_eq!(report.removed, 1);
    assert!(!index.exists("docs/a.txt").await?);

    Ok(())
}
