use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Schema version written into every persisted [`Snapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// One filesystem node as observed during a scan.
///
/// `relative_path` is relative to the library root and always uses `/` as
/// the separator. `mtime` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathEntry {
    pub relative_path: String,
    pub is_directory: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub mode: u32,
}

impl PathEntry {
    /// True when size, mtime and mode are all equal.
    ///
    /// The type flag is compared separately by the differ because a type
    /// change is a remove + create, not an update.
    pub fn same_content_metadata(&self, other: &PathEntry) -> bool {
        self.size == other.size && self.mtime == other.mtime && self.mode == other.mode
    }
}

/// The persisted "last known state" of a library's file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(alias = "__version", default = "default_version")]
    pub version: u32,
    pub entries: Vec<PathEntry>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Snapshot {
    /// A snapshot with no entries, used on `init` and for the first run.
    pub fn empty() -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            entries: Vec::new(),
        }
    }

    /// Builds a snapshot from scanned entries, putting them in tree order.
    pub fn from_entries(mut entries: Vec<PathEntry>) -> Self {
        sort_entries(&mut entries);
        Snapshot {
            version: SNAPSHOT_VERSION,
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_directory).count()
    }

    pub fn directory_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_directory).count()
    }

    pub fn total_size(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.size)
            .sum()
    }
}

/// Orders relative paths component by component.
///
/// This is the order a depth-first walk with name-sorted siblings produces,
/// so a directory always sorts immediately before its own descendants
/// (`a`, `a/b`, `a-c`), which a plain string comparison does not guarantee.
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    a.split('/').cmp(b.split('/'))
}

/// Sorts entries into tree order and drops repeated paths.
pub fn sort_entries(entries: &mut Vec<PathEntry>) {
    entries.sort_by(|a, b| compare_paths(&a.relative_path, &b.relative_path));
    entries.dedup_by(|a, b| a.relative_path == b.relative_path);
}

/// Returns true when `ancestor` is a strict parent directory of `path`.
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Final component of a relative path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Lowercased extension of the final component, or an empty string.
///
/// Dotfiles such as `.gitignore` have no extension.
pub fn extension(path: &str) -> String {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(i) => name[i + 1..].to_ascii_lowercase(),
    }
}
