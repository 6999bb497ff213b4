use crate::error::{LibraryError, LibraryResult};
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::index::store::IndexStore;
use crate::library::Library;
use crate::library::config::LibraryConfig;
use crate::sync::applier::{ChangeApplier, SyncReport};
use crate::tree::diff::{ChangeOperation, DiffOptions, diff_with_options};
use crate::tree::entry::{PathEntry, Snapshot};
use crate::tree::walker::Scan;
use crate::tree::snapshot::SnapshotError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Where a reconciliation run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    LoadingSnapshot,
    Scanning,
    Diffing,
    Applying,
    PersistingSnapshot,
    Done,
    Failed,
}

/// Runs load -> scan -> diff -> apply -> persist for one library.
///
/// The snapshot is replaced only after every operation has been offered to
/// the store. It records what is on disk, not what the store accepted, so
/// per-operation failures show up in the [`SyncReport`] rather than being
/// retried implicitly.
pub struct Pipeline<'a, S: IndexStore + ?Sized> {
    library: Library,
    store: &'a S,
    extractor: Arc<dyn TextExtractor>,
    config: LibraryConfig,
    state: PipelineState,
}

impl<'a, S: IndexStore + ?Sized> Pipeline<'a, S> {
    /// Creates a pipeline using the library's own configuration and the
    /// plain-text extractor.
    pub fn new(library: &Library, store: &'a S) -> LibraryResult<Self> {
        Ok(Pipeline {
            library: library.clone(),
            store,
            extractor: Arc::new(PlainTextExtractor),
            config: library.config()?,
            state: PipelineState::Idle,
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_config(mut self, config: LibraryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub async fn run(&mut self) -> LibraryResult<SyncReport> {
        self.run_with_cancel(&CancellationToken::new()).await
    }

    /// Runs one reconciliation pass.
    ///
    /// Cancellation is honoured up to the start of `PersistingSnapshot`;
    /// once the new snapshot is being written the write is allowed to finish.
    /// On any error the previously persisted snapshot is left untouched.
    pub async fn run_with_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> LibraryResult<SyncReport> {
        self.state = PipelineState::Idle;

        let result = self.execute(cancel).await;
        match &result {
            Ok(report) => {
                self.transition(PipelineState::Done);
                info!(
                    created = report.created,
                    updated = report.updated,
                    removed = report.removed,
                    moved = report.moved,
                    failed = report.failed,
                    unreadable = report.unreadable.len(),
                    "Library updated"
                );
            }
            Err(e) => {
                self.transition(PipelineState::Failed);
                error!(error = %e, "Library update failed");
            }
        }
        result
    }

    /// Computes the pending operations without applying or persisting them.
    pub async fn plan(&self) -> LibraryResult<Vec<ChangeOperation>> {
        let previous = self.load_previous().await?;
        let current = self.scan().await?;
        Ok(self.diff(&previous, &current.entries))
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> LibraryResult<SyncReport> {
        let _lock = self.library.lock()?;

        self.transition(PipelineState::LoadingSnapshot);
        let previous = self.load_previous().await?;
        check_cancelled(cancel)?;

        self.transition(PipelineState::Scanning);
        let current = self.scan().await?;
        check_cancelled(cancel)?;

        self.transition(PipelineState::Diffing);
        let ops = self.diff(&previous, &current.entries);
        info!(operations = ops.len(), "Computed file tree changes");
        check_cancelled(cancel)?;

        self.transition(PipelineState::Applying);
        let applier = ChangeApplier::new(
            &self.library.root,
            self.store,
            Arc::clone(&self.extractor),
            self.config.clone(),
        );
        let mut report = SyncReport {
            unreadable: current.unreadable,
            ..SyncReport::default()
        };
        for op in &ops {
            check_cancelled(cancel)?;
            let outcome = applier.apply(op).await?;
            report.record(op, &outcome);
        }

        self.transition(PipelineState::PersistingSnapshot);
        let snapshots = self.library.snapshot_store();
        let next = Snapshot::from_entries(current.entries);
        tokio::task::spawn_blocking(move || snapshots.save(&next))
            .await?
            .map_err(LibraryError::SnapshotPersist)?;

        Ok(report)
    }

    /// Loads the last snapshot; a missing one means this is the first run.
    async fn load_previous(&self) -> LibraryResult<Snapshot> {
        let snapshots = self.library.snapshot_store();
        match tokio::task::spawn_blocking(move || snapshots.load()).await? {
            Ok(snapshot) => Ok(snapshot),
            Err(SnapshotError::NotFound(path)) => {
                info!(path = %path.display(), "No previous snapshot, indexing from scratch");
                Ok(Snapshot::empty())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn scan(&self) -> LibraryResult<Scan> {
        let walker = self.library.walker();
        Ok(tokio::task::spawn_blocking(move || walker.collect_scan()).await??)
    }

    fn diff(&self, previous: &Snapshot, current: &[PathEntry]) -> Vec<ChangeOperation> {
        let options = DiffOptions {
            detect_moves: self.config.detect_moves,
        };
        diff_with_options(&previous.entries, current, &options)
    }

    fn transition(&mut self, next: PipelineState) {
        info!(from = ?self.state, to = ?next, "Pipeline state");
        self.state = next;
    }
}

fn check_cancelled(cancel: &CancellationToken) -> LibraryResult<()> {
    if cancel.is_cancelled() {
        Err(LibraryError::Cancelled)
    } else {
        Ok(())
    }
}
