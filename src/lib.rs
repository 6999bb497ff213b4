//! # librarian
//!
//! Incremental indexing of a document library: a directory tree whose state
//! is tracked in a hidden `.doc` control folder and mirrored into a
//! searchable SQLite index.
//!
//! ## Features
//!
//! - **Snapshots**: the last known file tree is persisted as JSON and replaced atomically
//! - **Tree diffing**: changes since the last run become an ordered patch of creates, updates, removals and moves
//! - **Safe ordering**: parents are created before their contents and removed after them
//! - **Partial failure**: a rejected document is reported, the rest of the run continues
//! - **Full-text search**: SQLite FTS5 over file names and extracted text
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use librarian::library::Library;
//! use librarian::sync::Pipeline;
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), librarian::LibraryError> {
//! let library = Library::init(Path::new("/path/to/papers"))?;
//! let index = library.open_index().await?;
//!
//! let report = Pipeline::new(&library, &index)?.run().await?;
//! println!("{} created, {} removed", report.created, report.removed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[`tree`]**: scanning, snapshot persistence and diffing
//! - **[`index`]**: the index store contract, its SQLite implementation and search
//! - **[`extract`]**: text extraction for indexable file types
//! - **[`sync`]**: applying changes and the run state machine
//! - **[`library`]**: control folder layout, configuration and the run lock
//! - **[`error`]**: unified error handling
//!
//! ## Error Handling
//!
//! Library operations return [`LibraryResult<T>`]. Errors raised by the
//! sub-modules convert into [`LibraryError`] automatically, so `?` works
//! throughout. Per-document problems during a run are not errors; they are
//! collected in the run's [`sync::SyncReport`].

pub mod error;
pub mod extract;
pub mod index;
pub mod library;
pub mod sync;
pub mod tree;

/// Re-exports the most commonly used types for convenience.
pub use error::{LibraryError, LibraryResult};
