//! # Metarepo
//!
//! Connector layer for a federated, bitemporal metadata repository.
//!
//! Metarepo stores typed, versioned graph instances (entities, relationships
//! and classifications) and answers point-in-time and graph-traversal queries
//! against them. Abstract search conditions are translated into the native
//! query language of the configured backend.
//!
//! ## Features
//!
//! - Append-only version chains with storage-time visibility (`[start, end)`)
//! - Relational backend over a fixed five-table `SQLite` schema
//! - Bitemporal document backend queried with Datalog-style pattern maps
//! - Neighborhood and path search with cycle-safe, depth-capped traversal
//! - Regex-cost probing for LIKE conditions and text search
//! - History retrieval over lazy, most-recent-first version cursors
//!
//! ## Example
//!
//! ```rust,ignore
//! use metarepo::{MetadataRepository, NewEntity, RepositoryConfig};
//!
//! let config = RepositoryConfig::load_from_file(path)?.apply_env_overrides();
//! let repo = MetadataRepository::open(&config, types)?;
//! let person = repo.add_entity("alice", NewEntity::new("Person").with_property("name", "Ann"))?;
//! let current = repo.get_entity_detail(&person.header.guid, None)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod convert;
pub mod deadline;
pub mod models;
pub mod observability;
pub mod paging;
pub mod query;
pub mod regex_guard;
pub mod services;
pub mod storage;
pub mod types;

// Re-exports for convenience
pub use config::{BackendKind, RepositoryConfig};
pub use convert::{Element, ElementKind};
pub use models::{
    Classification, EffectivityWindow, Entity, EntityProxy, Guid, InstanceHeader, InstanceKind,
    InstanceProperties, InstanceStatus, PropertyValue, Relationship, Snapshot, StorageWindow,
    Timestamp,
};
pub use observability::{LoggingConfig, init_logging};
pub use services::{
    FindRequest, HistoryRequest, InstanceGraph, MetadataRepository, NeighborhoodRequest,
    NewEntity, NewRelationship,
};
pub use storage::{DocumentStore, RepositoryBackend, SqliteBackend};
pub use types::{TypeCategory, TypeDefSummary, TypeRegistry};

/// Error type for repository operations.
///
/// Every backend failure is converted into one of these variants at the point
/// of I/O, so callers never see `rusqlite` or serde error types.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotKnown` | GUID absent at the requested time, or soft-deleted for writes |
/// | `ProxyOnly` | Entity exists only as a stub and detail was requested |
/// | `TypeError` | Type GUID or name cannot be resolved in the type registry |
/// | `Repository` | Backend I/O failure or data-integrity fault while reassembling |
/// | `Timeout` | Regex probe or query execution exceeded its wall-clock budget |
/// | `BadSearchProperty` | Operator used against a value type it cannot support |
/// | `InvalidParameter` | Caller mistake unrelated to search operators |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The instance is not known at the requested time.
    ///
    /// Recoverable by the caller: retry with another time or GUID.
    #[error("{kind} '{guid}' is not known")]
    NotKnown {
        /// Instance kind (`entity`, `relationship`, `classification`).
        kind: &'static str,
        /// The GUID that was looked up.
        guid: String,
    },

    /// The entity only exists as a proxy; detail is unavailable.
    #[error("entity '{guid}' is only known as a proxy")]
    ProxyOnly {
        /// GUID of the proxy entity.
        guid: String,
    },

    /// A type reference could not be resolved.
    ///
    /// Not retryable without correcting the request.
    #[error("type '{type_ref}' cannot be used: {reason}")]
    TypeError {
        /// Type GUID or name as supplied by the caller.
        type_ref: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A backend operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail to prepare or execute
    /// - A lock is poisoned beyond recovery
    /// - Stored rows cannot be decoded or reassembled
    #[error("operation '{operation}' failed in repository '{repository}': {cause}")]
    Repository {
        /// The operation that failed.
        operation: String,
        /// Name of the repository the operation ran against.
        repository: String,
        /// The underlying cause.
        cause: String,
    },

    /// A wall-clock budget was exceeded.
    #[error("operation '{operation}' exceeded its {budget_ms}ms budget")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Budget in milliseconds.
        budget_ms: u64,
    },

    /// A search condition cannot be applied to the supplied value.
    #[error("search property '{property}' is invalid: {reason}")]
    BadSearchProperty {
        /// Property name or path.
        property: String,
        /// Why the condition was rejected.
        reason: String,
    },

    /// Invalid parameter supplied by the caller.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// Builds a [`Error::Repository`] from any displayable cause.
    pub fn repository(
        operation: impl Into<String>,
        repository: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        Self::Repository {
            operation: operation.into(),
            repository: repository.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns `true` for errors a caller may retry with narrower criteria.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotKnown {
            kind: "entity",
            guid: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "entity 'abc' is not known");

        let err = Error::repository("insert_entity", "local", "disk full");
        assert_eq!(
            err.to_string(),
            "operation 'insert_entity' failed in repository 'local': disk full"
        );

        let err = Error::Timeout {
            operation: "regex_probe".to_string(),
            budget_ms: 500,
        };
        assert_eq!(
            err.to_string(),
            "operation 'regex_probe' exceeded its 500ms budget"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn test_bad_search_property_display() {
        let err = Error::BadSearchProperty {
            property: "age".to_string(),
            reason: "LIKE requires a string value".to_string(),
        };
        assert!(err.to_string().contains("age"));
        assert!(!err.is_timeout());
    }
}
