use crate::error::LibraryError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Exclusive claim on a library for the duration of one sync run.
///
/// Backed by a lock file created with `create_new`; a second claim fails
/// with [`LibraryError::LibraryBusy`] instead of waiting. The file is removed
/// on drop, but only while it still carries this claim's token.
#[derive(Debug)]
pub struct LibraryLock {
    path: PathBuf,
    token: String,
}

impl LibraryLock {
    pub fn acquire(path: &Path) -> Result<Self, LibraryError> {
        let token = Uuid::new_v4().to_string();

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LibraryError::LibraryBusy(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let written = writeln!(file, "{token}")
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(path);
            return Err(e.into());
        }

        debug!(path = %path.display(), "Acquired library lock");
        Ok(LibraryLock {
            path: path.to_path_buf(),
            token,
        })
    }

    /// Removes a lock left behind by a run that did not exit cleanly.
    /// Returns false if no lock file existed.
    pub fn break_stale(path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                warn!(path = %path.display(), "Removed stale library lock");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LibraryLock {
    fn drop(&mut self) {
        let owned = fs::read_to_string(&self.path)
            .map(|content| content.lines().next() == Some(self.token.as_str()))
            .unwrap_or(false);

        if owned {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to release library lock");
            }
        }
    }
}
