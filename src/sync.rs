//! Incremental reconciliation of a library's index with its file tree.

pub mod applier;
pub mod pipeline;

pub use applier::{ApplyFailure, ApplyOutcome, ChangeApplier, SyncReport};
pub use pipeline::{Pipeline, PipelineState};
