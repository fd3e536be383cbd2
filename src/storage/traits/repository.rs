//! Versioned store backend contract.
//!
//! A backend persists version chains for the three instance kinds and runs
//! translated searches against them. It never decides *what* to write: the
//! repository service builds every version and hands it over.
//!
//! # Guarantees
//!
//! | Operation | Guarantee |
//! |-----------|-----------|
//! | `supersede` | closing the previous version and inserting the next one is atomic |
//! | `close_out` | idempotent; closing an already-closed version is a no-op |
//! | `insert_relationship` | end proxies and the relationship land together |
//! | `purge_entity` | removes classifications and touching relationships too |
//! | `neighbors` | honours the deadline; no partial result on timeout |
//! | `*_history` | each batch honours the deadline |
//!
//! # Implementor Notes
//!
//! - Methods use `&self` so a backend can be shared via `Arc`
//! - Use interior mutability (`Mutex<Connection>`, `RwLock`) for state
//! - Reassemble property rows strictly; orphaned rows are a
//!   [`crate::Error::Repository`], never silently dropped
//! - Entities are returned with the classifications visible under the same
//!   snapshot attached

use super::cursor::HistoryCursor;
use crate::Result;
use crate::deadline::Deadline;
use crate::models::{
    Classification, Entity, Guid, InstanceHeader, InstanceKind, Relationship,
    SearchClassifications, Snapshot, StatusFilter, Timestamp, TypeFilter, Versioned,
};
use crate::query::SearchRequest;

/// Borrowed view of any storable version.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    /// Entity version (full or proxy).
    Entity(&'a Entity),
    /// Relationship version.
    Relationship(&'a Relationship),
    /// Classification version.
    Classification(&'a Classification),
}

impl Record<'_> {
    /// Instance kind.
    #[must_use]
    pub const fn kind(&self) -> InstanceKind {
        match self {
            Self::Entity(_) => InstanceKind::Entity,
            Self::Relationship(_) => InstanceKind::Relationship,
            Self::Classification(_) => InstanceKind::Classification,
        }
    }

    /// Version header.
    #[must_use]
    pub fn header(&self) -> &InstanceHeader {
        match self {
            Self::Entity(e) => e.header(),
            Self::Relationship(r) => r.header(),
            Self::Classification(c) => c.header(),
        }
    }

    /// Key of this version.
    #[must_use]
    pub fn key(&self) -> VersionKey {
        let header = self.header();
        VersionKey {
            kind: self.kind(),
            guid: header.guid.clone(),
            classification: match self {
                Self::Classification(c) => Some(c.name().to_string()),
                _ => None,
            },
            version: header.version,
        }
    }
}

/// Identifies one stored version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionKey {
    /// Instance kind.
    pub kind: InstanceKind,
    /// Instance GUID (classified entity for classifications).
    pub guid: Guid,
    /// Classification name, for classifications only.
    pub classification: Option<String>,
    /// Version number.
    pub version: i64,
}

/// Filters applied to one hop of a graph traversal.
#[derive(Debug, Clone, Default)]
pub struct HopFilter {
    /// Accepted types of the entity across the hop.
    pub entity_types: TypeFilter,
    /// Accepted relationship types.
    pub relationship_types: TypeFilter,
    /// Accepted status of both the relationship and the entity.
    pub status: StatusFilter,
    /// Classification conditions on the entity across the hop.
    pub classifications: Option<SearchClassifications>,
}

/// One edge out of an entity and the entity at its other end.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    /// Relationship version.
    pub relationship: Relationship,
    /// Entity at the other end; may be a proxy.
    pub entity: Entity,
}

/// Outcome of a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Instance versions removed.
    pub versions: usize,
    /// Classification versions removed with an entity.
    pub classifications: usize,
    /// Relationships removed because they touched a purged entity.
    pub relationships: usize,
}

/// Backend for versioned instance storage.
pub trait RepositoryBackend: Send + Sync {
    /// Repository name used in error context.
    fn repository_name(&self) -> &str;

    /// Metadata collection that owns instances written here.
    fn metadata_collection_id(&self) -> &str;

    // ========================================================================
    // Point reads
    // ========================================================================

    /// Entity version visible under `snapshot`, proxies included.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn get_entity(&self, guid: &Guid, snapshot: Snapshot) -> Result<Option<Entity>>;

    /// Entity versions visible under `snapshot` for many GUIDs, in one
    /// batched round trip. Unknown GUIDs are absent from the result.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn get_entities(&self, guids: &[Guid], snapshot: Snapshot) -> Result<Vec<Entity>>;

    /// Relationship version visible under `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn get_relationship(&self, guid: &Guid, snapshot: Snapshot) -> Result<Option<Relationship>>;

    /// Classification version visible under `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn get_classification(
        &self,
        entity: &Guid,
        name: &str,
        snapshot: Snapshot,
    ) -> Result<Option<Classification>>;

    /// Returns `true` if any version of the entity GUID is stored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn entity_exists(&self, guid: &Guid) -> Result<bool>;

    // ========================================================================
    // History
    // ========================================================================

    /// Entity versions, newest first, each with the classifications visible
    /// at its own start time.
    ///
    /// Every batch the cursor fetches honours `deadline`; an expired
    /// deadline is yielded as [`crate::Error::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] if the cursor cannot be opened.
    fn entity_history(&self, guid: &Guid, deadline: Deadline) -> Result<HistoryCursor<'_, Entity>>;

    /// Relationship versions, newest first, bounded like
    /// [`Self::entity_history`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] if the cursor cannot be opened.
    fn relationship_history(
        &self,
        guid: &Guid,
        deadline: Deadline,
    ) -> Result<HistoryCursor<'_, Relationship>>;

    /// Classification versions, newest first, bounded like
    /// [`Self::entity_history`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] if the cursor cannot be opened.
    fn classification_history(
        &self,
        entity: &Guid,
        name: &str,
        deadline: Deadline,
    ) -> Result<HistoryCursor<'_, Classification>>;

    // ========================================================================
    // Writes
    // ========================================================================

    /// Inserts a version; it must not already exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure or a clash
    /// with an existing version.
    fn insert(&self, record: Record<'_>) -> Result<()>;

    /// Ends the storage window of a version at `end`. Already-closed
    /// versions are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn close_out(&self, key: &VersionKey, end: Timestamp) -> Result<()>;

    /// Closes `previous` at the start of `next` and inserts `next`, as one unit.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure; nothing is
    /// written in that case.
    fn supersede(&self, previous: &VersionKey, next: Record<'_>) -> Result<()>;

    /// Inserts each proxy whose GUID is entirely unknown, then the
    /// relationship, as one unit. Returns the number of proxies created.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn insert_relationship(&self, relationship: &Relationship, proxies: &[Entity]) -> Result<usize>;

    /// Removes every version of an entity, its classifications and every
    /// relationship touching it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn purge_entity(&self, guid: &Guid) -> Result<PurgeReport>;

    /// Removes every version of a relationship.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Repository`] on backend failure.
    fn purge_relationship(&self, guid: &Guid) -> Result<PurgeReport>;

    // ========================================================================
    // Search
    // ========================================================================

    /// Entities matching a search, in the request's order.
    ///
    /// # Errors
    ///
    /// Returns translation errors, [`crate::Error::Timeout`] when the
    /// request deadline passes, or [`crate::Error::Repository`].
    fn find_entities(&self, request: &SearchRequest) -> Result<Vec<Entity>>;

    /// Relationships matching a search, in the request's order.
    ///
    /// # Errors
    ///
    /// Same as [`Self::find_entities`].
    fn find_relationships(&self, request: &SearchRequest) -> Result<Vec<Relationship>>;

    /// Single-hop primitive: relationships touching `guid` and the entity at
    /// each one's other end, both visible under `snapshot` and accepted by
    /// `filter`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::find_entities`].
    fn neighbors(
        &self,
        guid: &Guid,
        filter: &HopFilter,
        snapshot: Snapshot,
        deadline: Deadline,
    ) -> Result<Vec<Hop>>;
}
