use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Snapshot(#[from] crate::tree::snapshot::SnapshotError),

    #[error("failed to persist snapshot, previous snapshot remains valid: {0}")]
    SnapshotPersist(#[source] crate::tree::snapshot::SnapshotError),

    #[error("library root not found from {0} (no ancestor contains a .doc folder)")]
    LibraryRootNotFound(PathBuf),

    #[error("library is busy, another run holds {0}")]
    LibraryBusy(PathBuf),

    #[error(transparent)]
    Config(#[from] crate::library::config::ConfigError),

    #[error(transparent)]
    Walk(#[from] crate::tree::walker::WalkError),

    #[error(transparent)]
    Store(#[from] crate::index::store::StoreError),

    #[error("run cancelled before the snapshot was persisted")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type LibraryResult<T> = Result<T, LibraryError>;
