use crate::tree::entry::{SNAPSHOT_VERSION, Snapshot, sort_entries};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(PathBuf),

    #[error("snapshot is corrupt: {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot {path} has unsupported version {found}")]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads and writes the persisted file tree snapshot of one library.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store backed by the snapshot file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Loads the last persisted snapshot.
    ///
    /// - Returns [`SnapshotError::NotFound`] if no snapshot was ever written,
    ///   which callers treat as a first run.
    /// - Returns [`SnapshotError::Corrupt`] if the file cannot be parsed.
    /// - Returns [`SnapshotError::UnsupportedVersion`] for snapshots written
    ///   by a newer schema.
    ///
    /// Entries are returned in tree order regardless of how they were stored.
    pub fn load(&self) -> Result<Snapshot, SnapshotError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut snapshot: Snapshot =
            serde_json::from_slice(&data).map_err(|source| SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                path: self.path.clone(),
                found: snapshot.version,
            });
        }

        sort_entries(&mut snapshot.entries);
        snapshot.version = SNAPSHOT_VERSION;

        debug!(path = %self.path.display(), entries = snapshot.entries.len(), "Loaded snapshot");
        Ok(snapshot)
    }

    /// Replaces the persisted snapshot.
    ///
    /// The new content is written to a temporary file next to the snapshot
    /// and renamed over it, so readers only ever see the old or the new file.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let data = serde_json::to_vec_pretty(snapshot).map_err(io::Error::from)?;
        write_atomic(&self.path, &data)?;

        debug!(path = %self.path.display(), entries = snapshot.entries.len(), "Saved snapshot");
        Ok(())
    }

    /// Deletes the snapshot file. Returns false if there was nothing to delete.
    pub fn remove(&self) -> Result<bool, SnapshotError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Atomically replaces `path` with `data` (tempfile in the same directory,
/// fsync, rename).
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
