//! Storage backend traits.

mod cursor;
mod repository;

pub use cursor::{BatchFetch, DEFAULT_HISTORY_BATCH, HistoryCursor};
pub use repository::{Hop, HopFilter, PurgeReport, Record, RepositoryBackend, VersionKey};
