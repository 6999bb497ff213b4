use crate::tree::entry::{PathEntry, extension, file_name};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl StoreError {
    /// True for faults that make the whole store unusable (closed pool,
    /// I/O, unreachable backend) as opposed to a single rejected write.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Write { .. } => false,
            StoreError::Db(e) => matches!(
                e,
                sqlx::Error::PoolClosed
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::WorkerCrashed
            ),
        }
    }
}

/// One indexed document, keyed by its path relative to the library root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub path: String,
    pub filename: String,
    pub extension: String,
    /// Content fingerprint; empty when fingerprinting is disabled.
    pub hash: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub text: String,
}

impl DocumentRecord {
    /// Builds a record from scanned metadata with no fingerprint or text.
    pub fn from_entry(entry: &PathEntry) -> Self {
        DocumentRecord {
            path: entry.relative_path.clone(),
            filename: file_name(&entry.relative_path).to_string(),
            extension: extension(&entry.relative_path),
            hash: String::new(),
            size: entry.size,
            last_modified: entry.mtime,
            text: String::new(),
        }
    }
}

/// The key and fingerprint of one stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIdentifier {
    pub path: String,
    pub hash: String,
}

/// The narrow contract the sync pipeline needs from a persistent index.
///
/// Implementations must treat `remove` of an absent path as success.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Inserts the record or replaces the one stored under the same path.
    async fn upsert(&self, record: &DocumentRecord) -> Result<(), StoreError>;

    /// Removes the record at `path`. Returns false if nothing was stored.
    async fn remove(&self, path: &str) -> Result<bool, StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    async fn get(&self, path: &str) -> Result<Option<DocumentRecord>, StoreError>;

    /// Every stored path with its fingerprint, ordered by path.
    async fn list_identifiers(&self) -> Result<Vec<DocumentIdentifier>, StoreError>;
}
