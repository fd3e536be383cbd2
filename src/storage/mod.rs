//! Storage layer.
//!
//! Two interchangeable backends implement [`RepositoryBackend`]:
//!
//! | Backend | Store | Query form |
//! |---------|-------|------------|
//! | [`SqliteBackend`] | five-table relational schema | SQL via [`crate::query::SqlTranslator`] |
//! | [`DocumentStore`] | in-process document map | query maps via [`crate::query::DatalogTranslator`] |
//!
//! Both answer the same searches with the same results; only the order of
//! results under [`crate::models::SequencingOrder::Any`] may differ.

// Allow significant_drop_tightening - holding the connection guard across a
// whole load keeps batched reads consistent.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

pub mod document;
pub mod relational;
pub mod traits;

pub use document::DocumentStore;
pub use relational::SqliteBackend;
pub use traits::{
    HistoryCursor, Hop, HopFilter, PurgeReport, Record, RepositoryBackend, VersionKey,
};

use crate::regex_guard::RegexGuard;
use crate::types::TypeRegistry;
use std::sync::Arc;

/// Settings shared by every backend instance.
#[derive(Debug, Clone)]
pub struct BackendContext {
    /// Repository name used in error context and logs.
    pub repository_name: String,
    /// Metadata collection that owns instances written here.
    pub metadata_collection_id: String,
    /// Type definitions used to expand type filters.
    pub types: Arc<TypeRegistry>,
    /// Regex probe applied to LIKE and text patterns.
    pub guard: RegexGuard,
}

impl BackendContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        repository_name: impl Into<String>,
        metadata_collection_id: impl Into<String>,
        types: Arc<TypeRegistry>,
        guard: RegexGuard,
    ) -> Self {
        Self {
            repository_name: repository_name.into(),
            metadata_collection_id: metadata_collection_id.into(),
            types,
            guard,
        }
    }
}
