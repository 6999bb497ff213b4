use crate::tree::entry::{PathEntry, sort_entries};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, error, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("library root is not readable: {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read entry: {0}")]
    Entry(#[from] walkdir::Error),
}

/// Result of a full scan.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub entries: Vec<PathEntry>,
    /// Paths below the root that could not be read. Their previously known
    /// contents look deleted to the differ.
    pub unreadable: Vec<String>,
}

/// Produces the current state of a library's file tree.
///
/// Every call to [`TreeWalker::scan`] starts a fresh traversal; nothing is
/// cached between scans. Symbolic links are reported as their own entry and
/// never followed.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    excluded_names: Vec<String>,
}

impl TreeWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TreeWalker {
            root: root.into(),
            excluded_names: Vec::new(),
        }
    }

    /// Skips every directory called `name`, at any depth, with its contents.
    pub fn exclude_dirs_named(mut self, name: impl Into<String>) -> Self {
        self.excluded_names.push(name.into());
        self
    }

    /// Lazily walks the tree in component-sorted order.
    ///
    /// Directories are yielded before their contents. Entries whose path is
    /// not valid UTF-8 are skipped with a warning.
    pub fn scan(&self) -> impl Iterator<Item = Result<PathEntry, WalkError>> + '_ {
        WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !self.is_excluded(entry))
            .filter_map(move |result| match result {
                Ok(entry) => self.to_path_entry(&entry).transpose(),
                Err(e) => Some(Err(WalkError::Entry(e))),
            })
    }

    /// Runs a full scan and collects the entries.
    pub fn collect(&self) -> Result<Vec<PathEntry>, WalkError> {
        Ok(self.collect_scan()?.entries)
    }

    /// Runs a full scan, also returning what could not be read.
    ///
    /// An unreadable root fails the scan. Unreadable entries below the root
    /// are logged and left out so one bad subdirectory does not abort a run.
    pub fn collect_scan(&self) -> Result<Scan, WalkError> {
        fs::read_dir(&self.root).map_err(|source| WalkError::RootUnreadable {
            path: self.root.clone(),
            source,
        })?;

        let mut scan = Scan::default();
        for result in self.scan() {
            match result {
                Ok(entry) => scan.entries.push(entry),
                Err(WalkError::Entry(e)) => {
                    let path = e
                        .path()
                        .map(|p| self.relative(p).unwrap_or_else(|| p.display().to_string()))
                        .unwrap_or_default();
                    error!(path = %path, error = %e, "Unreadable entry, its contents are treated as removed");
                    scan.unreadable.push(path);
                }
                Err(e) => warn!(error = %e, "Skipping entry"),
            }
        }
        sort_entries(&mut scan.entries);
        scan.unreadable.sort();
        scan.unreadable.dedup();

        debug!(root = %self.root.display(), entries = scan.entries.len(), "Scanned library tree");
        Ok(scan)
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.excluded_names.iter().any(|ex| ex == name))
    }

    /// Converts an absolute path under the root into a `/`-separated
    /// relative path. Returns `None` for the root itself and for paths that
    /// are not valid UTF-8.
    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_str()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    fn to_path_entry(&self, entry: &DirEntry) -> Result<Option<PathEntry>, WalkError> {
        let Some(relative_path) = self.relative(entry.path()) else {
            warn!(path = %entry.path().display(), "Skipping path that is not valid UTF-8");
            return Ok(None);
        };

        let metadata = entry.metadata()?;
        let is_directory = entry.file_type().is_dir();

        Ok(Some(PathEntry {
            relative_path,
            is_directory,
            size: if is_directory { 0 } else { metadata.len() },
            mtime: modified_millis(&metadata),
            mode: mode_bits(&metadata),
        }))
    }
}

fn modified_millis(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    let kind = if metadata.is_dir() { 0o040000 } else { 0o100000 };
    let perm = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    kind | perm
}
