//! Metadata-collection API over one backend.
//!
//! [`MetadataRepository`] builds every version it writes and hands it to the
//! backend; the backend only persists and reads.
//!
//! # Version Rules
//!
//! | Operation | Effect on the chain |
//! |-----------|---------------------|
//! | add | version 1, or the next version over an existing proxy |
//! | update, delete, restore | next version; the previous one ends where it starts |
//! | declassify | current classification version is closed, nothing new is written |
//! | purge | every version removed, no soft delete required first |
//!
//! A new version starts at `max(now, previous start + 1ms)`.
//!
//! # Snapshots
//!
//! Reads that touch the backend more than once (searches, graph traversals,
//! element descriptions) pin "current" to one instant before their first
//! read. Writes take their start times from the same clock, which keeps
//! every version written after a pin out of that pinned read.
//!
//! # Read Rules
//!
//! | Read | Deleted | Proxy |
//! |------|---------|-------|
//! | `is_*_known` | `None` | returned |
//! | `get_entity_summary` | `NotKnown` | returned |
//! | `get_entity_detail`, `get_relationship` | `NotKnown` | `ProxyOnly` |
//! | writes other than restore and purge | `NotKnown` | `ProxyOnly` |

use super::clock::{Clock, WriteTicket};
use super::history::{self, HistoryRequest};
use super::traversal::{InstanceGraph, NeighborhoodRequest, Traversal};
use crate::config::{BackendKind, RepositoryConfig};
use crate::convert::{self, ConversionContext, Element, ElementKind};
use crate::deadline::Deadline;
use crate::models::{
    Classification, ClassificationCondition, EffectivityWindow, Entity, EntityProxy, Guid,
    InstanceHeader, InstanceProperties, InstanceStatus, MatchCriteria, PageRequest, PropertyValue,
    Relationship, SearchClassifications, SearchProperties, SequencingOrder, Snapshot,
    StatusFilter, StorageWindow, Timestamp, TypeFilter, Versioned,
};
use crate::paging::Pager;
use crate::query::SearchRequest;
use crate::storage::{
    DocumentStore, HopFilter, PurgeReport, Record, RepositoryBackend, SqliteBackend,
};
use crate::types::{TypeCategory, TypeRegistry};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Request to create an entity.
#[derive(Debug, Clone)]
pub struct NewEntity {
    /// Entity type name.
    pub type_name: String,
    /// Initial properties.
    pub properties: InstanceProperties,
    /// Initial status.
    pub status: InstanceStatus,
    /// Business effectivity.
    pub effective: EffectivityWindow,
    /// Caller-chosen GUID; generated when `None`.
    pub guid: Option<Guid>,
}

impl NewEntity {
    /// Active entity of `type_name` with no properties.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: InstanceProperties::new(),
            status: InstanceStatus::Active,
            effective: EffectivityWindow::unbounded(),
            guid: None,
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name, value);
        self
    }

    /// Replaces all properties.
    #[must_use]
    pub fn with_properties(mut self, properties: InstanceProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the effectivity window.
    #[must_use]
    pub const fn with_effectivity(mut self, effective: EffectivityWindow) -> Self {
        self.effective = effective;
        self
    }

    /// Uses a known GUID, e.g. to promote a proxy.
    #[must_use]
    pub fn with_guid(mut self, guid: Guid) -> Self {
        self.guid = Some(guid);
        self
    }
}

/// Request to create a relationship.
#[derive(Debug, Clone)]
pub struct NewRelationship {
    /// Relationship type name.
    pub type_name: String,
    /// First end.
    pub end1: EntityProxy,
    /// Second end.
    pub end2: EntityProxy,
    /// Initial properties.
    pub properties: InstanceProperties,
    /// Initial status.
    pub status: InstanceStatus,
    /// Business effectivity.
    pub effective: EffectivityWindow,
}

impl NewRelationship {
    /// Active relationship between two ends.
    #[must_use]
    pub fn new(type_name: impl Into<String>, end1: EntityProxy, end2: EntityProxy) -> Self {
        Self {
            type_name: type_name.into(),
            end1,
            end2,
            properties: InstanceProperties::new(),
            status: InstanceStatus::Active,
            effective: EffectivityWindow::unbounded(),
        }
    }

    /// Relationship between two locally held entities.
    #[must_use]
    pub fn between(type_name: impl Into<String>, end1: &Entity, end2: &Entity) -> Self {
        Self::new(type_name, end1.to_proxy(), end2.to_proxy())
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name, value);
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }
}

/// Search over entities or relationships, with paging.
#[derive(Debug, Clone, Default)]
pub struct FindRequest {
    /// Type restriction.
    pub types: TypeFilter,
    /// Property conditions.
    pub properties: Option<SearchProperties>,
    /// Classification conditions (entities only).
    pub classifications: Option<SearchClassifications>,
    /// Status restriction; excludes `DELETED` when empty.
    pub status: StatusFilter,
    /// Read time; current versions when `None`.
    pub as_of: Option<Timestamp>,
    /// Result order.
    pub order: SequencingOrder,
    /// Requested page.
    pub page: PageRequest,
}

impl FindRequest {
    /// Unrestricted request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the type filter.
    #[must_use]
    pub fn with_types(mut self, types: TypeFilter) -> Self {
        self.types = types;
        self
    }

    /// Sets property conditions.
    #[must_use]
    pub fn with_properties(mut self, properties: SearchProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Sets classification conditions.
    #[must_use]
    pub fn with_classifications(mut self, classifications: SearchClassifications) -> Self {
        self.classifications = Some(classifications);
        self
    }

    /// Sets the status filter.
    #[must_use]
    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    /// Reads as of `at`.
    #[must_use]
    pub const fn as_of(mut self, at: Timestamp) -> Self {
        self.as_of = Some(at);
        self
    }

    /// Sets the order.
    #[must_use]
    pub fn with_order(mut self, order: SequencingOrder) -> Self {
        self.order = order;
        self
    }

    /// Sets the page.
    #[must_use]
    pub const fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    fn search(&self, snapshot: Snapshot, deadline: Deadline) -> SearchRequest {
        let mut request = SearchRequest::new()
            .with_types(self.types.clone())
            .with_status(self.status.clone())
            .with_snapshot(snapshot)
            .with_order(self.page.effective_order(&self.order))
            .with_deadline(deadline);
        request.properties.clone_from(&self.properties);
        request.classifications.clone_from(&self.classifications);
        request
    }
}

/// Versioned instances that the repository revises.
trait Revisable: Versioned + Clone {
    fn header_mut(&mut self) -> &mut InstanceHeader;
    fn record(&self) -> Record<'_>;
}

impl Revisable for Entity {
    fn header_mut(&mut self) -> &mut InstanceHeader {
        &mut self.header
    }

    fn record(&self) -> Record<'_> {
        Record::Entity(self)
    }
}

impl Revisable for Relationship {
    fn header_mut(&mut self) -> &mut InstanceHeader {
        &mut self.header
    }

    fn record(&self) -> Record<'_> {
        Record::Relationship(self)
    }
}

impl Revisable for Classification {
    fn header_mut(&mut self) -> &mut InstanceHeader {
        &mut self.header
    }

    fn record(&self) -> Record<'_> {
        Record::Classification(self)
    }
}

const fn not_known(kind: &'static str, guid: String) -> Error {
    Error::NotKnown { kind, guid }
}

fn not_deleted<T: Versioned>(instance: Option<T>) -> Option<T> {
    instance.filter(|i| i.header().status != InstanceStatus::Deleted)
}

/// Metadata collection over a [`RepositoryBackend`].
///
/// # Thread Safety
///
/// The repository is `Send + Sync` when the backend is; both bundled
/// backends are. Writers to the same GUID must be serialised by the caller.
pub struct MetadataRepository<B: RepositoryBackend + ?Sized = dyn RepositoryBackend> {
    backend: Arc<B>,
    types: Arc<TypeRegistry>,
    pager: Pager,
    max_traversal_depth: usize,
    query_timeout: Duration,
    clock: Clock,
}

impl MetadataRepository {
    /// Opens the backend selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] if the `SQLite` database cannot be opened.
    pub fn open(config: &RepositoryConfig, types: Arc<TypeRegistry>) -> Result<Self> {
        let context = config.backend_context(Arc::clone(&types));
        let backend: Arc<dyn RepositoryBackend> = match &config.backend {
            BackendKind::Sqlite { path: Some(path) } => {
                Arc::new(SqliteBackend::open(path.clone(), context)?)
            },
            BackendKind::Sqlite { path: None } => Arc::new(SqliteBackend::in_memory(context)?),
            BackendKind::Document => Arc::new(DocumentStore::new(context)),
        };
        tracing::info!(
            repository = %config.repository_name,
            backend = ?config.backend,
            "Opened metadata repository"
        );
        Ok(Self::with_backend(backend, types, config))
    }
}

impl<B: RepositoryBackend + ?Sized> MetadataRepository<B> {
    /// Wraps an existing backend.
    #[must_use]
    pub fn with_backend(backend: Arc<B>, types: Arc<TypeRegistry>, config: &RepositoryConfig) -> Self {
        Self {
            backend,
            types,
            pager: config.pager(),
            max_traversal_depth: config.max_traversal_depth,
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            clock: Clock::default(),
        }
    }

    /// The underlying backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The type registry.
    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.query_timeout)
    }

    /// Snapshot for a read spanning several backend calls.
    fn read_snapshot(&self, as_of: Option<Timestamp>) -> Snapshot {
        match as_of {
            Some(at) => Snapshot::AsOf(at),
            None => Snapshot::Current.pinned(self.clock.pin()),
        }
    }

    fn search(&self, request: &FindRequest) -> SearchRequest {
        request.search(self.read_snapshot(request.as_of), self.deadline())
    }

    fn header(
        &self,
        guid: Guid,
        type_guid: String,
        type_name: String,
        status: InstanceStatus,
        user: &str,
        now: Timestamp,
    ) -> InstanceHeader {
        InstanceHeader {
            guid,
            type_guid,
            type_name,
            version: 1,
            status,
            metadata_collection_id: self.backend.metadata_collection_id().to_string(),
            created_by: user.to_string(),
            updated_by: None,
            create_time: now,
            update_time: None,
            effective: EffectivityWindow::unbounded(),
            storage: StorageWindow::open(now),
        }
    }

    /// Writes the next version of `current` after applying `change`.
    fn revise<T: Revisable>(&self, current: &T, user: &str, change: impl FnOnce(&mut T)) -> Result<T> {
        let mut ticket = self.clock.write();
        let header = current.header();
        let start = header.successor_start(ticket.now());
        let mut next = current.clone();
        *next.header_mut() = header.next_version(user, start);
        change(&mut next);
        self.backend.supersede(&current.record().key(), next.record())?;
        ticket.stamp(start);
        Ok(next)
    }

    // =========================================================================
    // Entity reads
    // =========================================================================

    /// Current, non-deleted, full entity.
    fn writable_entity(&self, guid: &Guid) -> Result<Entity> {
        let entity = not_deleted(self.backend.get_entity(guid, Snapshot::Current)?)
            .ok_or_else(|| not_known("entity", guid.to_string()))?;
        if entity.is_proxy {
            return Err(Error::ProxyOnly {
                guid: guid.to_string(),
            });
        }
        Ok(entity)
    }

    /// Returns the entity if it is known and not deleted; proxies included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] on backend failure.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn is_entity_known(&self, guid: &Guid, as_of: Option<Timestamp>) -> Result<Option<Entity>> {
        Ok(not_deleted(
            self.backend.get_entity(guid, Snapshot::from_as_of(as_of))?,
        ))
    }

    /// Entity header and properties, proxies included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if the entity is unknown or deleted at
    /// the requested time.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn get_entity_summary(&self, guid: &Guid, as_of: Option<Timestamp>) -> Result<Entity> {
        self.is_entity_known(guid, as_of)?
            .ok_or_else(|| not_known("entity", guid.to_string()))
    }

    /// Full entity with its classifications.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if the entity is unknown or deleted at the
    /// requested time, [`Error::ProxyOnly`] if only a proxy is held.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn get_entity_detail(&self, guid: &Guid, as_of: Option<Timestamp>) -> Result<Entity> {
        let entity = self.get_entity_summary(guid, as_of)?;
        if entity.is_proxy {
            return Err(Error::ProxyOnly {
                guid: guid.to_string(),
            });
        }
        Ok(entity)
    }

    /// Entity versions in a time range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if no version falls in the range.
    #[instrument(skip(self, request), fields(guid = %guid))]
    pub fn get_entity_history(&self, guid: &Guid, request: &HistoryRequest) -> Result<Vec<Entity>> {
        history::collect(
            self.backend.entity_history(guid, self.deadline())?,
            request,
            &self.pager,
            "entity",
            guid,
        )
    }

    /// Builds a caller-facing element for an entity.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_entity_detail`], plus search errors when related
    /// elements are requested.
    #[instrument(skip(self, classification_filter), fields(guid = %guid))]
    pub fn describe_entity(
        &self,
        guid: &Guid,
        kind: ElementKind,
        as_of: Option<Timestamp>,
        classification_filter: Option<&[String]>,
    ) -> Result<Element> {
        let snapshot = self.read_snapshot(as_of);
        let entity = self.get_entity_detail(guid, snapshot.as_of())?;
        let relationships = match kind {
            ElementKind::Summary => Vec::new(),
            ElementKind::Related => {
                let request = FindRequest::new().with_order(SequencingOrder::Guid);
                self.backend.find_relationships(
                    &request
                        .search(snapshot, self.deadline())
                        .with_end_entity(guid.clone()),
                )?
            },
        };
        let mut context = ConversionContext::for_entity(&entity).with_relationships(&relationships);
        context.classification_filter = classification_filter;
        convert::convert(kind, &context)
    }

    // =========================================================================
    // Entity writes
    // =========================================================================

    /// Creates an entity, promoting an existing proxy with the same GUID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] for an unknown type,
    /// [`Error::InvalidParameter`] if a full entity with the GUID exists or
    /// the properties are malformed.
    #[instrument(skip(self, new), fields(type_name = %new.type_name))]
    pub fn add_entity(&self, user: &str, new: NewEntity) -> Result<Entity> {
        let def = self.types.by_name(&new.type_name, TypeCategory::Entity)?;
        new.properties.validate()?;
        let guid = new.guid.unwrap_or_else(Guid::generate);
        let mut ticket = self.clock.write();
        let now = ticket.now();
        let mut entity = Entity {
            header: self.header(guid.clone(), def.guid, def.name, new.status, user, now),
            properties: new.properties,
            classifications: Vec::new(),
            is_proxy: false,
        };
        entity.header.effective = new.effective;

        match self.backend.get_entity(&guid, Snapshot::Current)? {
            None => self.backend.insert(Record::Entity(&entity))?,
            Some(proxy) if proxy.is_proxy => {
                let start = proxy.header.successor_start(now);
                entity.header.version = proxy.header.version + 1;
                entity.header.storage = StorageWindow::open(start);
                self.backend
                    .supersede(&Record::Entity(&proxy).key(), Record::Entity(&entity))?;
                tracing::debug!(guid = %guid, "Promoted proxy to full entity");
            },
            Some(_) => {
                return Err(Error::InvalidParameter(format!(
                    "entity '{guid}' already exists"
                )));
            },
        }
        ticket.stamp(entity.header.storage.start);
        Ok(entity)
    }

    /// Replaces the properties of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] for unknown or deleted entities,
    /// [`Error::ProxyOnly`] for proxies.
    #[instrument(skip(self, properties), fields(guid = %guid))]
    pub fn update_entity_properties(
        &self,
        user: &str,
        guid: &Guid,
        properties: InstanceProperties,
    ) -> Result<Entity> {
        properties.validate()?;
        let current = self.writable_entity(guid)?;
        self.revise(&current, user, |next| next.properties = properties)
    }

    /// Changes the status of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for `DELETED` (use
    /// [`Self::delete_entity`]), plus the errors of
    /// [`Self::update_entity_properties`].
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn update_entity_status(
        &self,
        user: &str,
        guid: &Guid,
        status: InstanceStatus,
    ) -> Result<Entity> {
        if status == InstanceStatus::Deleted {
            return Err(Error::InvalidParameter(
                "use delete to set DELETED".to_string(),
            ));
        }
        let current = self.writable_entity(guid)?;
        self.revise(&current, user, |next| next.header.status = status)
    }

    /// Soft-deletes an entity.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_entity_properties`].
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn delete_entity(&self, user: &str, guid: &Guid) -> Result<Entity> {
        let current = self.writable_entity(guid)?;
        self.revise(&current, user, |next| {
            next.header.status = InstanceStatus::Deleted;
        })
    }

    /// Undoes a soft delete, restoring the status held before it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if the entity is unknown and
    /// [`Error::InvalidParameter`] if it is not deleted.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn restore_entity(&self, user: &str, guid: &Guid) -> Result<Entity> {
        let current = self
            .backend
            .get_entity(guid, Snapshot::Current)?
            .ok_or_else(|| not_known("entity", guid.to_string()))?;
        if current.header.status != InstanceStatus::Deleted {
            return Err(Error::InvalidParameter(format!(
                "entity '{guid}' is not deleted"
            )));
        }
        let status =
            restored_status(&current, self.backend.entity_history(guid, self.deadline())?)?;
        self.revise(&current, user, |next| next.header.status = status)
    }

    /// Removes every version of an entity, its classifications and every
    /// relationship touching it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if no version of the entity is stored.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn purge_entity(&self, guid: &Guid) -> Result<PurgeReport> {
        if !self.backend.entity_exists(guid)? {
            return Err(not_known("entity", guid.to_string()));
        }
        let report = self.backend.purge_entity(guid)?;
        metrics::counter!("metarepo_purges_total", "kind" => "entity").increment(1);
        tracing::info!(
            guid = %guid,
            versions = report.versions,
            relationships = report.relationships,
            "Purged entity"
        );
        Ok(report)
    }

    /// Stores a copy of an entity owned by another metadata collection.
    ///
    /// Inserts it when unknown, replaces a local proxy, and ignores copies
    /// that are not newer than the local version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for a proxy copy and
    /// [`Error::TypeError`] for an unknown type.
    #[instrument(skip(self, copy), fields(guid = %copy.header.guid))]
    pub fn save_entity_reference_copy(&self, copy: &Entity) -> Result<()> {
        if copy.is_proxy {
            return Err(Error::InvalidParameter(
                "a reference copy must be a full entity".to_string(),
            ));
        }
        self.types
            .by_name(&copy.header.type_name, TypeCategory::Entity)?;
        copy.properties.validate()?;

        let mut ticket = self.clock.write();
        let now = ticket.now();
        let guid = &copy.header.guid;
        let mut stored = copy.clone();
        stored.is_proxy = false;
        match self.backend.get_entity(guid, Snapshot::Current)? {
            None => {
                stored.header.storage = StorageWindow::open(now);
                self.backend.insert(Record::Entity(&stored))?;
            },
            Some(local) if local.is_proxy || copy.header.version > local.header.version => {
                stored.header.version = copy.header.version.max(local.header.version + 1);
                stored.header.storage =
                    StorageWindow::open(local.header.successor_start(now));
                self.backend
                    .supersede(&Record::Entity(&local).key(), Record::Entity(&stored))?;
            },
            Some(local) => {
                tracing::debug!(
                    guid = %guid,
                    local = local.header.version,
                    copy = copy.header.version,
                    "Ignoring reference copy that is not newer"
                );
                return Ok(());
            },
        }

        ticket.stamp(stored.header.storage.start);

        for classification in &copy.classifications {
            self.save_classification_copy(&mut ticket, classification)?;
        }
        Ok(())
    }

    /// Stores one classification of a reference copy: inserted when the
    /// chain is unknown, superseding or continuing the local chain when the
    /// copy is newer, ignored otherwise.
    fn save_classification_copy(
        &self,
        ticket: &mut WriteTicket<'_>,
        copy: &Classification,
    ) -> Result<()> {
        let now = ticket.now();
        let guid = &copy.header.guid;
        let latest = self
            .backend
            .classification_history(guid, copy.name(), self.deadline())?
            .next()
            .transpose()?;
        let mut stored = copy.clone();
        match latest {
            None => {
                stored.header.storage = StorageWindow::open(now);
                self.insert_classification(ticket, &stored)?;
            },
            Some(local) if copy.header.version > local.header.version => {
                let start = local.header.successor_start(now);
                if local.header.storage.is_current() {
                    stored.header.storage = StorageWindow::open(start);
                    self.backend.supersede(
                        &Record::Classification(&local).key(),
                        Record::Classification(&stored),
                    )?;
                    ticket.stamp(start);
                } else {
                    let start = local.header.storage.end.map_or(start, |end| start.max(end));
                    stored.header.storage = StorageWindow::open(start);
                    self.insert_classification(ticket, &stored)?;
                }
            },
            Some(local) => {
                tracing::debug!(
                    guid = %guid,
                    classification = copy.name(),
                    local = local.header.version,
                    copy = copy.header.version,
                    "Ignoring classification copy that is not newer"
                );
            },
        }
        Ok(())
    }

    // =========================================================================
    // Entity search
    // =========================================================================

    fn find_entity_page(&self, request: &FindRequest, search: &SearchRequest) -> Result<Vec<Entity>> {
        let entities = self.backend.find_entities(search)?;
        Ok(self
            .pager
            .page(entities, &request.page, |e| e.header.guid.clone()))
    }

    /// Entities matching properties, classifications, type and status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`], [`Error::BadSearchProperty`] or
    /// [`Error::Timeout`] from translation and execution.
    #[instrument(skip(self, request))]
    pub fn find_entities(&self, request: &FindRequest) -> Result<Vec<Entity>> {
        self.find_entity_page(request, &self.search(request))
    }

    /// Entities with any string property fully matching `pattern`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::find_entities`].
    #[instrument(skip(self, request))]
    pub fn find_entities_by_property_value(
        &self,
        pattern: &str,
        request: &FindRequest,
    ) -> Result<Vec<Entity>> {
        let search = self.search(request).with_text(pattern);
        self.find_entity_page(request, &search)
    }

    /// Entities carrying the named classification, optionally restricted
    /// by its properties.
    ///
    /// # Errors
    ///
    /// Same as [`Self::find_entities`].
    #[instrument(skip(self, properties, request))]
    pub fn find_entities_by_classification(
        &self,
        name: &str,
        properties: Option<SearchProperties>,
        request: &FindRequest,
    ) -> Result<Vec<Entity>> {
        let mut condition = ClassificationCondition::named(name);
        condition.properties = properties;
        let search = self
            .search(request)
            .with_classifications(SearchClassifications::new([condition], MatchCriteria::All));
        self.find_entity_page(request, &search)
    }

    // =========================================================================
    // Classifications
    // =========================================================================

    fn insert_classification(
        &self,
        ticket: &mut WriteTicket<'_>,
        classification: &Classification,
    ) -> Result<()> {
        self.backend
            .insert(Record::Classification(classification))?;
        ticket.stamp(classification.header.storage.start);
        Ok(())
    }

    fn current_classification(&self, entity: &Guid, name: &str) -> Result<Classification> {
        not_deleted(
            self.backend
                .get_classification(entity, name, Snapshot::Current)?,
        )
        .ok_or_else(|| not_known("classification", format!("{entity}/{name}")))
    }

    /// Attaches a classification to an entity.
    ///
    /// A previously declassified chain continues with the next version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] for an unknown classification,
    /// [`Error::InvalidParameter`] if the entity already carries it, and the
    /// entity write errors.
    #[instrument(skip(self, properties), fields(guid = %entity))]
    pub fn classify_entity(
        &self,
        user: &str,
        entity: &Guid,
        name: &str,
        properties: InstanceProperties,
    ) -> Result<Classification> {
        self.writable_entity(entity)?;
        let def = self.types.by_name(name, TypeCategory::Classification)?;
        properties.validate()?;

        let previous = self
            .backend
            .classification_history(entity, name, self.deadline())?
            .next()
            .transpose()?;
        if let Some(previous) = &previous
            && previous.header.storage.is_current()
            && previous.header.status != InstanceStatus::Deleted
        {
            return Err(Error::InvalidParameter(format!(
                "entity '{entity}' is already classified as '{name}'"
            )));
        }

        let mut ticket = self.clock.write();
        let now = ticket.now();
        let mut classification = Classification {
            header: self.header(entity.clone(), def.guid, def.name, InstanceStatus::Active, user, now),
            properties,
        };
        match previous {
            Some(previous) if previous.header.storage.is_current() => {
                let start = previous.header.successor_start(now);
                classification.header.version = previous.header.version + 1;
                classification.header.storage = StorageWindow::open(start);
                self.backend.supersede(
                    &Record::Classification(&previous).key(),
                    Record::Classification(&classification),
                )?;
                ticket.stamp(start);
            },
            Some(previous) => {
                let start = previous.header.successor_start(now);
                let start = previous.header.storage.end.map_or(start, |end| start.max(end));
                classification.header.version = previous.header.version + 1;
                classification.header.storage = StorageWindow::open(start);
                self.insert_classification(&mut ticket, &classification)?;
            },
            None => self.insert_classification(&mut ticket, &classification)?,
        }
        Ok(classification)
    }

    /// Replaces the properties of a classification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if the entity or the classification is
    /// not current.
    #[instrument(skip(self, properties), fields(guid = %entity))]
    pub fn update_entity_classification(
        &self,
        user: &str,
        entity: &Guid,
        name: &str,
        properties: InstanceProperties,
    ) -> Result<Classification> {
        self.writable_entity(entity)?;
        properties.validate()?;
        let current = self.current_classification(entity, name)?;
        self.revise(&current, user, |next| next.properties = properties)
    }

    /// Removes a classification by closing its chain now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if the entity or the classification is
    /// not current.
    #[instrument(skip(self), fields(guid = %entity))]
    pub fn declassify_entity(&self, user: &str, entity: &Guid, name: &str) -> Result<Entity> {
        self.writable_entity(entity)?;
        let current = self.current_classification(entity, name)?;
        {
            let mut ticket = self.clock.write();
            let end = current.header.successor_start(ticket.now());
            self.backend
                .close_out(&Record::Classification(&current).key(), end)?;
            ticket.stamp(end);
        }
        tracing::debug!(user, "Declassified entity");
        self.writable_entity(entity)
    }

    /// Classification versions in a time range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if no version falls in the range.
    #[instrument(skip(self, request), fields(guid = %entity))]
    pub fn get_classification_history(
        &self,
        entity: &Guid,
        name: &str,
        request: &HistoryRequest,
    ) -> Result<Vec<Classification>> {
        history::collect(
            self.backend
                .classification_history(entity, name, self.deadline())?,
            request,
            &self.pager,
            "classification",
            entity,
        )
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    fn writable_relationship(&self, guid: &Guid) -> Result<Relationship> {
        not_deleted(self.backend.get_relationship(guid, Snapshot::Current)?)
            .ok_or_else(|| not_known("relationship", guid.to_string()))
    }

    /// Proxy entity for an end that is not held locally.
    fn end_proxy(&self, end: &EntityProxy, user: &str, now: Timestamp) -> Result<Option<Entity>> {
        self.types.by_name(&end.type_name, TypeCategory::Entity)?;
        match self.backend.get_entity(&end.guid, Snapshot::Current)? {
            Some(local) if local.header.status == InstanceStatus::Deleted => {
                Err(not_known("entity", end.guid.to_string()))
            },
            Some(local) if local.header.type_name != end.type_name => Err(Error::TypeError {
                type_ref: end.type_name.clone(),
                reason: format!(
                    "entity '{}' is a '{}'",
                    end.guid, local.header.type_name
                ),
            }),
            Some(_) => Ok(None),
            None if self.backend.entity_exists(&end.guid)? => Ok(None),
            None => Ok(Some(Entity {
                header: self.header(
                    end.guid.clone(),
                    end.type_guid.clone(),
                    end.type_name.clone(),
                    InstanceStatus::Active,
                    user,
                    now,
                ),
                properties: end.unique_properties.clone(),
                classifications: Vec::new(),
                is_proxy: true,
            })),
        }
    }

    /// Creates a relationship, creating proxies for unknown ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] for unknown relationship or end types,
    /// [`Error::NotKnown`] if an end is deleted.
    #[instrument(skip(self, new), fields(type_name = %new.type_name, end1 = %new.end1.guid, end2 = %new.end2.guid))]
    pub fn add_relationship(&self, user: &str, new: NewRelationship) -> Result<Relationship> {
        let def = self
            .types
            .by_name(&new.type_name, TypeCategory::Relationship)?;
        new.properties.validate()?;
        let mut ticket = self.clock.write();
        let now = ticket.now();
        let proxies: Vec<Entity> = [&new.end1, &new.end2]
            .into_iter()
            .map(|end| self.end_proxy(end, user, now))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();

        let mut relationship = Relationship {
            header: self.header(Guid::generate(), def.guid, def.name, new.status, user, now),
            properties: new.properties,
            end1: new.end1,
            end2: new.end2,
        };
        relationship.header.effective = new.effective;
        let created = self.backend.insert_relationship(&relationship, &proxies)?;
        ticket.stamp(now);
        if created > 0 {
            tracing::debug!(created, "Created proxies for unknown relationship ends");
        }
        Ok(relationship)
    }

    /// Replaces the properties of a relationship.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] for unknown or deleted relationships.
    #[instrument(skip(self, properties), fields(guid = %guid))]
    pub fn update_relationship_properties(
        &self,
        user: &str,
        guid: &Guid,
        properties: InstanceProperties,
    ) -> Result<Relationship> {
        properties.validate()?;
        let current = self.writable_relationship(guid)?;
        self.revise(&current, user, |next| next.properties = properties)
    }

    /// Changes the status of a relationship.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for `DELETED`, plus the errors of
    /// [`Self::update_relationship_properties`].
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn update_relationship_status(
        &self,
        user: &str,
        guid: &Guid,
        status: InstanceStatus,
    ) -> Result<Relationship> {
        if status == InstanceStatus::Deleted {
            return Err(Error::InvalidParameter(
                "use delete to set DELETED".to_string(),
            ));
        }
        let current = self.writable_relationship(guid)?;
        self.revise(&current, user, |next| next.header.status = status)
    }

    /// Soft-deletes a relationship.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_relationship_properties`].
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn delete_relationship(&self, user: &str, guid: &Guid) -> Result<Relationship> {
        let current = self.writable_relationship(guid)?;
        self.revise(&current, user, |next| {
            next.header.status = InstanceStatus::Deleted;
        })
    }

    /// Undoes a soft delete of a relationship.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if the relationship is unknown and
    /// [`Error::InvalidParameter`] if it is not deleted.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn restore_relationship(&self, user: &str, guid: &Guid) -> Result<Relationship> {
        let current = self
            .backend
            .get_relationship(guid, Snapshot::Current)?
            .ok_or_else(|| not_known("relationship", guid.to_string()))?;
        if current.header.status != InstanceStatus::Deleted {
            return Err(Error::InvalidParameter(format!(
                "relationship '{guid}' is not deleted"
            )));
        }
        let status = restored_status(
            &current,
            self.backend.relationship_history(guid, self.deadline())?,
        )?;
        self.revise(&current, user, |next| next.header.status = status)
    }

    /// Removes every version of a relationship.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if no version is stored.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn purge_relationship(&self, guid: &Guid) -> Result<PurgeReport> {
        let report = self.backend.purge_relationship(guid)?;
        if report.versions == 0 {
            return Err(not_known("relationship", guid.to_string()));
        }
        metrics::counter!("metarepo_purges_total", "kind" => "relationship").increment(1);
        Ok(report)
    }

    /// Returns the relationship if it is known and not deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Repository`] on backend failure.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn is_relationship_known(
        &self,
        guid: &Guid,
        as_of: Option<Timestamp>,
    ) -> Result<Option<Relationship>> {
        Ok(not_deleted(
            self.backend
                .get_relationship(guid, Snapshot::from_as_of(as_of))?,
        ))
    }

    /// Relationship version visible at the requested time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if it is unknown or deleted at that time.
    #[instrument(skip(self), fields(guid = %guid))]
    pub fn get_relationship(&self, guid: &Guid, as_of: Option<Timestamp>) -> Result<Relationship> {
        self.is_relationship_known(guid, as_of)?
            .ok_or_else(|| not_known("relationship", guid.to_string()))
    }

    /// Relationship versions in a time range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if no version falls in the range.
    #[instrument(skip(self, request), fields(guid = %guid))]
    pub fn get_relationship_history(
        &self,
        guid: &Guid,
        request: &HistoryRequest,
    ) -> Result<Vec<Relationship>> {
        history::collect(
            self.backend.relationship_history(guid, self.deadline())?,
            request,
            &self.pager,
            "relationship",
            guid,
        )
    }

    fn find_relationship_page(
        &self,
        request: &FindRequest,
        search: &SearchRequest,
    ) -> Result<Vec<Relationship>> {
        let relationships = self.backend.find_relationships(search)?;
        Ok(self
            .pager
            .page(relationships, &request.page, |r| r.header.guid.clone()))
    }

    /// Relationships matching properties, type and status.
    ///
    /// # Errors
    ///
    /// Same as [`Self::find_entities`].
    #[instrument(skip(self, request))]
    pub fn find_relationships(&self, request: &FindRequest) -> Result<Vec<Relationship>> {
        self.find_relationship_page(request, &self.search(request))
    }

    /// Relationships with any string property fully matching `pattern`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::find_entities`].
    #[instrument(skip(self, request))]
    pub fn find_relationships_by_property_value(
        &self,
        pattern: &str,
        request: &FindRequest,
    ) -> Result<Vec<Relationship>> {
        let search = self.search(request).with_text(pattern);
        self.find_relationship_page(request, &search)
    }

    /// Relationships touching an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if the entity is unknown or deleted at the
    /// requested time, plus the errors of [`Self::find_entities`].
    #[instrument(skip(self, request), fields(guid = %entity))]
    pub fn get_relationships_for_entity(
        &self,
        entity: &Guid,
        request: &FindRequest,
    ) -> Result<Vec<Relationship>> {
        let snapshot = self.read_snapshot(request.as_of);
        self.get_entity_summary(entity, snapshot.as_of())?;
        let search = request
            .search(snapshot, self.deadline())
            .with_end_entity(entity.clone());
        self.find_relationship_page(request, &search)
    }

    // =========================================================================
    // Graph
    // =========================================================================

    /// Entities and relationships within `request.depth` hops of `seed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] or [`Error::ProxyOnly`] for a bad seed,
    /// and [`Error::Timeout`] if the traversal exceeds the query timeout.
    pub fn get_entity_neighborhood(
        &self,
        seed: &Guid,
        request: &NeighborhoodRequest,
    ) -> Result<InstanceGraph> {
        Traversal::new(
            self.backend.as_ref(),
            request.hop_filter(),
            self.read_snapshot(request.as_of),
            self.deadline(),
        )
        .neighborhood(seed, request.depth_limit(self.max_traversal_depth))
    }

    /// Entities and relationships on routes from `start` to `end` of at most
    /// the configured maximum depth; empty when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if either end is unknown and
    /// [`Error::Timeout`] if the search exceeds the query timeout.
    pub fn get_linking_entities(
        &self,
        start: &Guid,
        end: &Guid,
        status: &StatusFilter,
        as_of: Option<Timestamp>,
    ) -> Result<InstanceGraph> {
        let filter = HopFilter {
            status: status.clone(),
            ..HopFilter::default()
        };
        Traversal::new(
            self.backend.as_ref(),
            filter,
            self.read_snapshot(as_of),
            self.deadline(),
        )
        .linking(start, end, self.max_traversal_depth)
    }
}

/// Status of the newest version older than `current`, the deleted one.
///
/// The scan is anchored on `current`, so versions written after it was read
/// are skipped rather than mistaken for its predecessors.
fn restored_status<T: Versioned>(
    current: &T,
    history: impl IntoIterator<Item = Result<T>>,
) -> Result<InstanceStatus> {
    let deleted = current.header().version;
    for version in history {
        let version = version?;
        let header = version.header();
        if header.version < deleted && header.status != InstanceStatus::Deleted {
            return Ok(header.status);
        }
    }
    Ok(InstanceStatus::Active)
}

impl<B: RepositoryBackend + ?Sized> std::fmt::Debug for MetadataRepository<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRepository")
            .field("repository", &self.backend.repository_name())
            .field("pager", &self.pager)
            .field("max_traversal_depth", &self.max_traversal_depth)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyCondition;
    use crate::types::TypeDefSummary;

    fn repository() -> MetadataRepository {
        let types = TypeRegistry::with_types([
            TypeDefSummary::new("t-person", "Person", TypeCategory::Entity),
            TypeDefSummary::new("t-friend", "Friendship", TypeCategory::Relationship),
            TypeDefSummary::new("t-conf", "Confidential", TypeCategory::Classification),
        ])
        .unwrap();
        let config = RepositoryConfig::default().with_backend(BackendKind::Document);
        MetadataRepository::open(&config, Arc::new(types)).unwrap()
    }

    fn ann(repo: &MetadataRepository) -> Entity {
        repo.add_entity("alice", NewEntity::new("Person").with_property("name", "Ann"))
            .unwrap()
    }

    #[test]
    fn test_add_and_update_entity() {
        let repo = repository();
        let v1 = ann(&repo);
        let v2 = repo
            .update_entity_properties(
                "bob",
                &v1.header.guid,
                InstanceProperties::new().with("name", "Anne"),
            )
            .unwrap();
        assert_eq!(v2.header.version, 2);
        assert_eq!(v2.header.updated_by.as_deref(), Some("bob"));
        assert!(v2.header.storage.start > v1.header.storage.start);

        let as_of = repo
            .get_entity_detail(&v1.header.guid, Some(v1.header.storage.start))
            .unwrap();
        assert_eq!(as_of.properties.get("name"), Some(&PropertyValue::string("Ann")));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let repo = repository();
        let result = repo.add_entity("alice", NewEntity::new("Spaceship"));
        assert!(matches!(result, Err(Error::TypeError { .. })));
    }

    #[test]
    fn test_delete_restore_and_write_rules() {
        let repo = repository();
        let entity = ann(&repo);
        let guid = &entity.header.guid;
        repo.update_entity_status("alice", guid, InstanceStatus::Proposed)
            .unwrap();
        repo.delete_entity("alice", guid).unwrap();

        assert!(repo.is_entity_known(guid, None).unwrap().is_none());
        assert!(matches!(
            repo.get_entity_detail(guid, None),
            Err(Error::NotKnown { .. })
        ));
        assert!(matches!(
            repo.update_entity_properties("alice", guid, InstanceProperties::new()),
            Err(Error::NotKnown { .. })
        ));

        let restored = repo.restore_entity("alice", guid).unwrap();
        assert_eq!(restored.header.status, InstanceStatus::Proposed);
        assert_eq!(restored.header.version, 4);
        assert!(matches!(
            repo.restore_entity("alice", guid),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            repo.update_entity_status("alice", guid, InstanceStatus::Deleted),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_classification_lifecycle() {
        let repo = repository();
        let entity = ann(&repo);
        let guid = &entity.header.guid;

        let c1 = repo
            .classify_entity("alice", guid, "Confidential", InstanceProperties::new().with("level", 1_i64))
            .unwrap();
        assert_eq!(c1.header.version, 1);
        assert!(matches!(
            repo.classify_entity("alice", guid, "Confidential", InstanceProperties::new()),
            Err(Error::InvalidParameter(_))
        ));
        repo.update_entity_classification(
            "alice",
            guid,
            "Confidential",
            InstanceProperties::new().with("level", 2_i64),
        )
        .unwrap();

        let detail = repo.get_entity_detail(guid, None).unwrap();
        assert_eq!(detail.classification_names().collect::<Vec<_>>(), vec!["Confidential"]);

        let declassified = repo.declassify_entity("alice", guid, "Confidential").unwrap();
        assert!(declassified.classifications.is_empty());

        let again = repo
            .classify_entity("alice", guid, "Confidential", InstanceProperties::new())
            .unwrap();
        assert_eq!(again.header.version, 3);

        let history = repo
            .get_classification_history(guid, "Confidential", &HistoryRequest::new())
            .unwrap();
        assert_eq!(
            history.iter().map(|c| c.header.version).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
    }

    #[test]
    fn test_relationship_with_unknown_end_creates_proxy() {
        let repo = repository();
        let entity = ann(&repo);
        let stranger = EntityProxy::new(Guid::new("remote-1"), "t-person", "Person");
        let relationship = repo
            .add_relationship(
                "alice",
                NewRelationship::new("Friendship", entity.to_proxy(), stranger),
            )
            .unwrap();

        let remote = Guid::new("remote-1");
        assert!(repo.get_entity_summary(&remote, None).unwrap().is_proxy);
        assert!(matches!(
            repo.get_entity_detail(&remote, None),
            Err(Error::ProxyOnly { .. })
        ));

        let full = repo
            .add_entity(
                "alice",
                NewEntity::new("Person")
                    .with_guid(remote.clone())
                    .with_property("name", "Bo"),
            )
            .unwrap();
        assert_eq!(full.header.version, 2);
        assert!(!repo.get_entity_detail(&remote, None).unwrap().is_proxy);

        let touching = repo
            .get_relationships_for_entity(&remote, &FindRequest::new())
            .unwrap();
        assert_eq!(touching.len(), 1);
        assert_eq!(touching[0].header.guid, relationship.header.guid);
    }

    #[test]
    fn test_purge_cascades_and_reports_unknown() {
        let repo = repository();
        let a = ann(&repo);
        let b = ann(&repo);
        let relationship = repo
            .add_relationship("alice", NewRelationship::between("Friendship", &a, &b))
            .unwrap();

        let report = repo.purge_entity(&a.header.guid).unwrap();
        assert_eq!(report.relationships, 1);
        assert!(repo
            .is_relationship_known(&relationship.header.guid, None)
            .unwrap()
            .is_none());
        assert!(matches!(
            repo.purge_entity(&a.header.guid),
            Err(Error::NotKnown { .. })
        ));
        assert!(matches!(
            repo.purge_relationship(&relationship.header.guid),
            Err(Error::NotKnown { .. })
        ));
    }

    #[test]
    fn test_find_pages_with_default_order() {
        let repo = repository();
        for name in ["a", "b", "c"] {
            repo.add_entity("alice", NewEntity::new("Person").with_property("name", name))
                .unwrap();
        }
        let all = repo.find_entities(&FindRequest::new()).unwrap();
        assert_eq!(all.len(), 3);

        let page = repo
            .find_entities(&FindRequest::new().with_page(PageRequest::new(1, 1)))
            .unwrap();
        assert_eq!(page.len(), 1);

        let found = repo
            .find_entities(
                &FindRequest::new().with_properties(SearchProperties::all([PropertyCondition::eq(
                    "name", "b",
                )])),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_reference_copy_is_not_downgraded() {
        let repo = repository();
        let local = ann(&repo);
        let mut stale = local.clone();
        stale.properties = InstanceProperties::new().with("name", "Old");
        repo.save_entity_reference_copy(&stale).unwrap();
        let current = repo.get_entity_detail(&local.header.guid, None).unwrap();
        assert_eq!(current.properties.get("name"), Some(&PropertyValue::string("Ann")));
    }

    #[test]
    fn test_second_restore_uses_latest_live_status() {
        let repo = repository();
        let guid = ann(&repo).header.guid;
        repo.update_entity_status("alice", &guid, InstanceStatus::Proposed)
            .unwrap();
        repo.delete_entity("alice", &guid).unwrap();
        repo.restore_entity("alice", &guid).unwrap();
        repo.update_entity_status("alice", &guid, InstanceStatus::Active)
            .unwrap();
        repo.delete_entity("alice", &guid).unwrap();

        let restored = repo.restore_entity("alice", &guid).unwrap();
        assert_eq!(restored.header.status, InstanceStatus::Active);
        assert_eq!(restored.header.version, 7);
    }

    fn level(classification: &Classification) -> Option<&PropertyValue> {
        classification.properties.get("level")
    }

    #[test]
    fn test_reference_copy_carries_newer_classifications() {
        let repo = repository();
        let guid = ann(&repo).header.guid;
        repo.classify_entity("alice", &guid, "Confidential", InstanceProperties::new().with("level", 1_i64))
            .unwrap();

        let mut copy = repo.get_entity_detail(&guid, None).unwrap();
        copy.header.version += 1;
        copy.classifications[0].header.version += 1;
        copy.classifications[0].properties = InstanceProperties::new().with("level", 2_i64);
        repo.save_entity_reference_copy(&copy).unwrap();

        let detail = repo.get_entity_detail(&guid, None).unwrap();
        assert_eq!(detail.header.version, 2);
        assert_eq!(level(&detail.classifications[0]), Some(&PropertyValue::from(2_i64)));
        let history = repo
            .get_classification_history(&guid, "Confidential", &HistoryRequest::new())
            .unwrap();
        assert_eq!(
            history.iter().map(|c| c.header.version).collect::<Vec<_>>(),
            vec![2, 1]
        );

        let mut stale = detail.clone();
        stale.header.version += 1;
        stale.classifications[0].header.version = 1;
        stale.classifications[0].properties = InstanceProperties::new().with("level", 9_i64);
        repo.save_entity_reference_copy(&stale).unwrap();

        let detail = repo.get_entity_detail(&guid, None).unwrap();
        assert_eq!(detail.header.version, 3);
        assert_eq!(level(&detail.classifications[0]), Some(&PropertyValue::from(2_i64)));
    }

    #[test]
    fn test_describe_entity() {
        let repo = repository();
        let entity = repo
            .add_entity(
                "alice",
                NewEntity::new("Person")
                    .with_property("qualifiedName", "person::ann")
                    .with_property("age", 41_i64),
            )
            .unwrap();
        let Element::Summary(summary) = repo
            .describe_entity(&entity.header.guid, ElementKind::Summary, None, None)
            .unwrap()
        else {
            panic!("expected a summary");
        };
        assert_eq!(summary.qualified_name.as_deref(), Some("person::ann"));
        assert_eq!(summary.extended_properties.len(), 1);
    }
}
