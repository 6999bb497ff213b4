//! File tree state: scanning, persisting and diffing.

pub mod diff;
pub mod entry;
pub mod snapshot;
pub mod walker;

pub use diff::{ChangeOperation, DiffOptions, diff, diff_with_options};
pub use entry::{PathEntry, Snapshot};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use walker::{Scan, TreeWalker, WalkError};
