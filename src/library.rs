//! A library: a directory tree marked by a `.doc` control folder.

pub mod config;
pub mod lock;

use crate::error::LibraryError;
use crate::index::sqlite::SqliteIndex;
use crate::library::config::LibraryConfig;
use crate::library::lock::LibraryLock;
use crate::tree::entry::Snapshot;
use crate::tree::snapshot::{SnapshotError, SnapshotStore};
use crate::tree::walker::TreeWalker;
use std::fs;
use std::io;
use std::path::{self, Path, PathBuf};
use tracing::info;

pub const CONTROL_DIR: &str = ".doc";
pub const CONFIG_FILE: &str = "library.json";
pub const SNAPSHOT_FILE: &str = "filetree.json";
pub const DATABASE_FILE: &str = "library.sqlite";
pub const LOCK_FILE: &str = "library.lock";

#[derive(Debug, Clone)]
pub struct Library {
    pub root: PathBuf,
}

/// Summary of a library's persisted state.
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub root: PathBuf,
    pub config: LibraryConfig,
    /// `None` if the library has never been scanned.
    pub files: Option<usize>,
    pub directories: Option<usize>,
    pub total_size: Option<u64>,
    pub locked: bool,
}

impl Library {
    /// Initializes `path` as a library.
    ///
    /// Creates the root, the control folder, a default `library.json` and an
    /// empty snapshot, each only if missing. Running it again is harmless.
    pub fn init(path: &Path) -> Result<Self, LibraryError> {
        let library = Library {
            root: path::absolute(path)?,
        };

        fs::create_dir_all(library.control_dir())?;
        LibraryConfig::load(&library.config_path())?;

        let snapshots = library.snapshot_store();
        if !snapshots.exists() {
            snapshots.save(&Snapshot::empty())?;
        }

        info!(root = %library.root.display(), "Initialized library directory");
        Ok(library)
    }

    /// Opens the library rooted exactly at `path`.
    ///
    /// Returns [`LibraryError::LibraryRootNotFound`] if `path` has no
    /// control folder.
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let root = path::absolute(path)?;
        if !root.join(CONTROL_DIR).is_dir() {
            return Err(LibraryError::LibraryRootNotFound(root));
        }
        Ok(Library { root })
    }

    /// Opens the nearest library containing `start`, searching `start`
    /// itself and then each parent directory.
    pub fn find_root(start: &Path) -> Result<Self, LibraryError> {
        let start = path::absolute(start)?;
        start
            .ancestors()
            .find(|dir| dir.join(CONTROL_DIR).is_dir())
            .map(|root| Library {
                root: root.to_path_buf(),
            })
            .ok_or(LibraryError::LibraryRootNotFound(start))
    }

    pub fn control_dir(&self) -> PathBuf {
        self.root.join(CONTROL_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.control_dir().join(CONFIG_FILE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.control_dir().join(SNAPSHOT_FILE)
    }

    pub fn database_path(&self) -> PathBuf {
        self.control_dir().join(DATABASE_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.control_dir().join(LOCK_FILE)
    }

    pub fn config(&self) -> Result<LibraryConfig, LibraryError> {
        Ok(LibraryConfig::load(&self.config_path())?)
    }

    pub fn snapshot_store(&self) -> SnapshotStore {
        SnapshotStore::new(self.snapshot_path())
    }

    /// A walker over the library that skips its control folder and those of
    /// any libraries nested inside it.
    pub fn walker(&self) -> TreeWalker {
        TreeWalker::new(&self.root).exclude_dirs_named(CONTROL_DIR)
    }

    pub async fn open_index(&self) -> Result<SqliteIndex, LibraryError> {
        Ok(SqliteIndex::open(&self.database_path()).await?)
    }

    pub fn lock(&self) -> Result<LibraryLock, LibraryError> {
        LibraryLock::acquire(&self.lock_path())
    }

    /// Deletes the index database and the snapshot.
    ///
    /// Refuses while a run holds the lock unless `force` is set, in which
    /// case the lock is treated as stale and removed. With `reset` an empty
    /// snapshot is written back so the next run indexes everything.
    /// Returns the files that were deleted.
    pub fn purge(&self, reset: bool, force: bool) -> Result<Vec<PathBuf>, LibraryError> {
        if force {
            LibraryLock::break_stale(&self.lock_path())?;
        }
        let _lock = self.lock()?;

        let mut removed = Vec::new();
        if self.snapshot_store().remove()? {
            removed.push(self.snapshot_path());
        }

        let db = self.database_path();
        let mut candidates = vec![db.clone()];
        for suffix in ["-wal", "-shm", "-journal"] {
            let mut side = db.clone().into_os_string();
            side.push(suffix);
            candidates.push(PathBuf::from(side));
        }

        for path in candidates {
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if reset {
            self.snapshot_store().save(&Snapshot::empty())?;
        }

        info!(root = %self.root.display(), removed = removed.len(), "Purged library index");
        Ok(removed)
    }

    /// Reads configuration and snapshot statistics without scanning.
    pub fn info(&self) -> Result<LibraryInfo, LibraryError> {
        let config = self.config()?;
        let snapshot = match self.snapshot_store().load() {
            Ok(snapshot) => Some(snapshot),
            Err(SnapshotError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(LibraryInfo {
            root: self.root.clone(),
            config,
            files: snapshot.as_ref().map(Snapshot::file_count),
            directories: snapshot.as_ref().map(Snapshot::directory_count),
            total_size: snapshot.as_ref().map(Snapshot::total_size),
            locked: self.lock_path().exists(),
        })
    }
}
