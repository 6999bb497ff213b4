use crate::extract::{TextExtractor, truncate_text};
use crate::index::store::{DocumentRecord, IndexStore, StoreError};
use crate::library::config::LibraryConfig;
use crate::tree::diff::ChangeOperation;
use crate::tree::entry::PathEntry;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Result of applying one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Nothing to do, e.g. removing a path the store never held.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyFailure {
    pub path: String,
    pub operation: &'static str,
    pub reason: String,
}

/// Per-run tally of applied operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub moved: usize,
    /// Directory creates, updates and removals; these never touch the store.
    pub directories: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<ApplyFailure>,
    /// Paths the scan could not read; anything previously indexed beneath
    /// them was removed by this run.
    pub unreadable: Vec<String>,
}

impl SyncReport {
    pub fn record(&mut self, op: &ChangeOperation, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Failed(reason) => {
                self.failed += 1;
                self.failures.push(ApplyFailure {
                    path: op.path().to_string(),
                    operation: op.kind(),
                    reason: reason.clone(),
                });
            }
            ApplyOutcome::Skipped => self.skipped += 1,
            ApplyOutcome::Applied => match op {
                ChangeOperation::CreateDirectory(_) => self.directories += 1,
                ChangeOperation::Update(e) if e.is_directory => self.directories += 1,
                ChangeOperation::Remove {
                    is_directory: true,
                    ..
                } => self.directories += 1,
                ChangeOperation::CreateFile(_) => self.created += 1,
                ChangeOperation::Update(_) => self.updated += 1,
                ChangeOperation::Remove { .. } => self.removed += 1,
                ChangeOperation::Move { .. } => self.moved += 1,
            },
        }
    }

    /// Total number of operations recorded.
    pub fn operations(&self) -> usize {
        self.created
            + self.updated
            + self.removed
            + self.moved
            + self.directories
            + self.skipped
            + self.failed
    }
}

/// Applies change operations to an index store, one at a time.
///
/// Per-operation problems (a rejected write, unreadable content) are turned
/// into [`ApplyOutcome`]s. Only store faults that make further progress
/// pointless are returned as errors.
pub struct ChangeApplier<'a, S: IndexStore + ?Sized> {
    root: PathBuf,
    store: &'a S,
    extractor: Arc<dyn TextExtractor>,
    config: LibraryConfig,
}

impl<'a, S: IndexStore + ?Sized> ChangeApplier<'a, S> {
    pub fn new(
        root: &Path,
        store: &'a S,
        extractor: Arc<dyn TextExtractor>,
        config: LibraryConfig,
    ) -> Self {
        ChangeApplier {
            root: root.to_path_buf(),
            store,
            extractor,
            config,
        }
    }

    pub async fn apply(&self, op: &ChangeOperation) -> Result<ApplyOutcome, StoreError> {
        let outcome = match op {
            ChangeOperation::CreateDirectory(_) => Ok(ApplyOutcome::Applied),
            ChangeOperation::Update(entry) if entry.is_directory => Ok(ApplyOutcome::Applied),
            ChangeOperation::Remove {
                is_directory: true,
                ..
            } => Ok(ApplyOutcome::Applied),

            ChangeOperation::CreateFile(entry) | ChangeOperation::Update(entry) => {
                let record = self.build_record(entry).await;
                self.upsert(&record).await
            }

            ChangeOperation::Remove { path, .. } => match self.store.remove(path).await {
                Ok(true) => Ok(ApplyOutcome::Applied),
                Ok(false) => Ok(ApplyOutcome::Skipped),
                Err(e) => failed_unless_fatal(e),
            },

            ChangeOperation::Move { from, entry } => self.apply_move(from, entry).await,
        }?;

        match &outcome {
            ApplyOutcome::Failed(reason) => {
                error!(op = op.kind(), path = op.path(), reason = %reason, "Operation failed")
            }
            _ => debug!(op = op.kind(), path = op.path(), outcome = ?outcome, "Applied operation"),
        }
        Ok(outcome)
    }

    /// Re-keys the stored record without re-extracting its content.
    ///
    /// Falls back to a full rebuild when the old record is missing or the
    /// extension changed (the new name may not even be indexable). With
    /// fingerprinting enabled the target is hashed first and the old content
    /// is only carried over if the hashes agree; otherwise a move is trusted
    /// on its size, mtime and mode alone.
    async fn apply_move(&self, from: &str, entry: &PathEntry) -> Result<ApplyOutcome, StoreError> {
        let previous = match self.store.get(from).await {
            Ok(previous) => previous,
            Err(e) if e.is_infrastructure() => return Err(e),
            Err(e) => {
                warn!(path = from, error = %e, "Could not read moved record, rebuilding");
                None
            }
        };

        let fresh = DocumentRecord::from_entry(entry);
        let carried = match previous {
            Some(old) if old.extension == fresh.extension => {
                let unchanged = !self.config.fingerprint
                    || self.content_hash(entry).await.as_deref() == Some(old.hash.as_str());
                if !unchanged {
                    debug!(from, to = %fresh.path, "Moved content differs, rebuilding");
                }
                unchanged.then_some(old)
            }
            _ => None,
        };
        let record = match carried {
            Some(old) => DocumentRecord {
                hash: old.hash,
                text: old.text,
                ..fresh
            },
            None => self.build_record(entry).await,
        };

        if let ApplyOutcome::Failed(reason) = self.upsert(&record).await? {
            return Ok(ApplyOutcome::Failed(reason));
        }

        match self.store.remove(from).await {
            Ok(_) => Ok(ApplyOutcome::Applied),
            Err(e) if e.is_infrastructure() => Err(e),
            Err(e) => Ok(ApplyOutcome::Failed(format!(
                "stale record left at {from}: {e}"
            ))),
        }
    }

    async fn upsert(&self, record: &DocumentRecord) -> Result<ApplyOutcome, StoreError> {
        match self.store.upsert(record).await {
            Ok(()) => Ok(ApplyOutcome::Applied),
            Err(e) => failed_unless_fatal(e),
        }
    }

    /// Builds the record for a scanned file, extracting text when the
    /// extension is indexable and fingerprinting when enabled.
    ///
    /// Only regular files are read; FIFOs, sockets, devices and symlinks are
    /// indexed by metadata alone. Extraction and hashing failures degrade to
    /// empty values.
    async fn build_record(&self, entry: &PathEntry) -> DocumentRecord {
        let mut record = DocumentRecord::from_entry(entry);
        let wants_text = self.config.is_indexable(&record.extension);
        let wants_hash = self.config.fingerprint;
        if !wants_text && !wants_hash {
            return record;
        }

        let path = self.root.join(&entry.relative_path);
        let extension = record.extension.clone();
        let extractor = Arc::clone(&self.extractor);
        let max_text_bytes = self.config.max_text_bytes;

        let work = tokio::task::spawn_blocking(move || {
            if !is_regular_file(&path) {
                return None;
            }
            let text = if wants_text {
                extractor
                    .extract_text(&path, &extension)
                    .map(|text| truncate_text(text, max_text_bytes))
                    .map_err(|e| e.to_string())
            } else {
                Ok(String::new())
            };
            let hash = if wants_hash {
                fingerprint(&path).map_err(|e| e.to_string())
            } else {
                Ok(String::new())
            };
            Some((text, hash))
        })
        .await;

        match work {
            Ok(Some((text, hash))) => {
                record.text = text.unwrap_or_else(|reason| {
                    warn!(path = %record.path, reason = %reason, "Text extraction failed, indexing without text");
                    String::new()
                });
                record.hash = hash.unwrap_or_else(|reason| {
                    warn!(path = %record.path, reason = %reason, "Fingerprinting failed");
                    String::new()
                });
            }
            Ok(None) => debug!(path = %record.path, "Not a regular file, indexing metadata only"),
            Err(e) => warn!(path = %record.path, error = %e, "Extraction task failed"),
        }
        record
    }

    /// Fingerprint of a scanned regular file, or `None` if it cannot be read.
    async fn content_hash(&self, entry: &PathEntry) -> Option<String> {
        let path = self.root.join(&entry.relative_path);
        let work = tokio::task::spawn_blocking(move || {
            if is_regular_file(&path) {
                fingerprint(&path).ok()
            } else {
                None
            }
        });
        work.await.ok().flatten()
    }
}

/// True for regular files only; symlinks are not followed.
fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|metadata| metadata.file_type().is_file())
        .unwrap_or(false)
}

fn failed_unless_fatal(e: StoreError) -> Result<ApplyOutcome, StoreError> {
    if e.is_infrastructure() {
        Err(e)
    } else {
        Ok(ApplyOutcome::Failed(e.to_string()))
    }
}

/// SHA-256 of the file's contents as lowercase hex.
pub fn fingerprint(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
