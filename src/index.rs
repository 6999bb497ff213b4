//! The persistent document index the sync pipeline writes into.

pub mod query;
pub mod sqlite;
pub mod store;

pub use query::{Query, SearchOptions, SearchResult};
pub use sqlite::SqliteIndex;
pub use store::{DocumentIdentifier, DocumentRecord, IndexStore, StoreError};
