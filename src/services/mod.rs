//! Repository services.
//!
//! Services build versions, resolve types and page results on top of a
//! [`crate::storage::RepositoryBackend`].

mod clock;
pub mod history;
pub mod repository;
pub mod traversal;

pub use history::HistoryRequest;
pub use repository::{FindRequest, MetadataRepository, NewEntity, NewRelationship};
pub use traversal::{InstanceGraph, NeighborhoodRequest, Traversal};
