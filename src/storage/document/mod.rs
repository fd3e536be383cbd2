//! In-process bitemporal document store.
//!
//! Holds one document per instance version, keyed by a reference derived
//! from the GUID (`entity/<guid>`, `relationship/<guid>`,
//! `classification/<guid>/<name>`). Each document keeps its record and the
//! flattened property rows that queries run against.
//!
//! Searches are rendered by [`DatalogTranslator`] into a [`DatalogQuery`]
//! and evaluated document by document; the deadline is checked between
//! documents.
//!
//! # Concurrency
//!
//! A single `RwLock` guards the document map. Reads of one operation share
//! one read guard so they see a consistent snapshot; every write takes the
//! write guard once, which makes multi-step writes atomic.

mod eval;

pub use eval::Evaluator;

use super::BackendContext;
use super::traits::{
    DEFAULT_HISTORY_BATCH, HistoryCursor, Hop, HopFilter, PurgeReport, Record, RepositoryBackend,
    VersionKey,
};
use crate::deadline::Deadline;
use crate::models::{
    Classification, Entity, FlatProperty, Guid, InstanceHeader, InstanceKind, Relationship,
    SequencingOrder, Snapshot, Timestamp, Versioned,
};
use crate::paging::{self, HasProperties};
use crate::query::{
    Clause, Conditions, DatalogQuery, DatalogTranslator, QueryTranslator, SearchRequest,
};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;

/// Version chains by reference, each ordered by storage start.
pub type Documents = BTreeMap<String, Vec<Document>>;

const ENTITY_PREFIX: &str = "entity/";
const RELATIONSHIP_PREFIX: &str = "relationship/";

fn entity_reference(guid: &Guid) -> String {
    format!("{ENTITY_PREFIX}{guid}")
}

fn relationship_reference(guid: &Guid) -> String {
    format!("{RELATIONSHIP_PREFIX}{guid}")
}

fn classification_prefix(guid: &Guid) -> String {
    format!("classification/{guid}/")
}

/// Reference of one classification chain.
pub fn classification_reference(guid: &Guid, name: &str) -> String {
    format!("{}{name}", classification_prefix(guid))
}

fn reference(key: &VersionKey) -> String {
    match (key.kind, &key.classification) {
        (InstanceKind::Entity, _) => entity_reference(&key.guid),
        (InstanceKind::Relationship, _) => relationship_reference(&key.guid),
        (InstanceKind::Classification, name) => {
            classification_reference(&key.guid, name.as_deref().unwrap_or_default())
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Stored {
    Entity(Entity),
    Relationship(Relationship),
    Classification(Classification),
}

/// One stored version and its flattened property rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    stored: Stored,
    rows: Vec<FlatProperty>,
}

impl Document {
    /// Builds a document from a record. Entity classifications are not
    /// embedded; they live in their own chains.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the property bag is malformed.
    pub fn new(record: Record<'_>) -> Result<Self> {
        let (stored, rows) = match record {
            Record::Entity(entity) => {
                let rows = entity.properties.flatten()?;
                let mut entity = entity.clone();
                entity.classifications.clear();
                (Stored::Entity(entity), rows)
            },
            Record::Relationship(relationship) => (
                Stored::Relationship(relationship.clone()),
                relationship.properties.flatten()?,
            ),
            Record::Classification(classification) => (
                Stored::Classification(classification.clone()),
                classification.properties.flatten()?,
            ),
        };
        Ok(Self { stored, rows })
    }

    /// Version header.
    #[must_use]
    pub fn header(&self) -> &InstanceHeader {
        match &self.stored {
            Stored::Entity(e) => &e.header,
            Stored::Relationship(r) => &r.header,
            Stored::Classification(c) => &c.header,
        }
    }

    fn header_mut(&mut self) -> &mut InstanceHeader {
        match &mut self.stored {
            Stored::Entity(e) => &mut e.header,
            Stored::Relationship(r) => &mut r.header,
            Stored::Classification(c) => &mut c.header,
        }
    }

    /// All flattened property rows.
    #[must_use]
    pub fn rows(&self) -> &[FlatProperty] {
        &self.rows
    }

    /// Rows at one path.
    pub fn rows_at<'d>(&'d self, path: &'d str) -> impl Iterator<Item = &'d FlatProperty> + 'd {
        self.rows.iter().filter(move |r| r.path == path)
    }

    /// The entity record, if this is an entity version.
    #[must_use]
    pub const fn as_entity(&self) -> Option<&Entity> {
        match &self.stored {
            Stored::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// The relationship record, if this is a relationship version.
    #[must_use]
    pub const fn as_relationship(&self) -> Option<&Relationship> {
        match &self.stored {
            Stored::Relationship(r) => Some(r),
            _ => None,
        }
    }

    const fn as_classification(&self) -> Option<&Classification> {
        match &self.stored {
            Stored::Classification(c) => Some(c),
            _ => None,
        }
    }
}

/// Document-backed versioned store.
#[derive(Debug)]
pub struct DocumentStore {
    documents: RwLock<Documents>,
    context: BackendContext,
}

impl DocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(context: BackendContext) -> Self {
        tracing::info!(
            repository = %context.repository_name,
            metadata_collection_id = %context.metadata_collection_id,
            "Opened document repository"
        );
        Self {
            documents: RwLock::new(Documents::new()),
            context,
        }
    }

    /// Number of stored versions of all kinds.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.documents
            .read()
            .map(|d| d.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn read(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, Documents>> {
        self.documents.read().map_err(|_| {
            Error::repository(operation, &self.context.repository_name, "lock poisoned")
        })
    }

    fn write(&self, operation: &'static str) -> Result<RwLockWriteGuard<'_, Documents>> {
        self.documents.write().map_err(|_| {
            Error::repository(operation, &self.context.repository_name, "lock poisoned")
        })
    }

    fn translator(&self, snapshot: Snapshot) -> DatalogTranslator<'_> {
        DatalogTranslator::new(&self.context.types, self.context.guard, snapshot)
    }

    fn conflict(&self, operation: &'static str, key: &VersionKey, reason: &str) -> Error {
        Error::repository(
            operation,
            &self.context.repository_name,
            format!("{} {} version {}: {reason}", key.kind, key.guid, key.version),
        )
    }

    /// Checks that `record` can be appended to `chain` once `closing` (if
    /// any) has been closed.
    fn check_insert(
        &self,
        operation: &'static str,
        chain: Option<&Vec<Document>>,
        record: Record<'_>,
        closing: Option<&VersionKey>,
    ) -> Result<()> {
        let key = record.key();
        let header = record.header();
        for existing in chain.into_iter().flatten() {
            let existing = existing.header();
            if existing.version == header.version {
                return Err(self.conflict(operation, &key, "version already stored"));
            }
            let closed = closing.is_some_and(|c| c.version == existing.version);
            if existing.storage.end.is_none() && header.storage.end.is_none() && !closed {
                return Err(self.conflict(operation, &key, "chain already has a current version"));
            }
        }
        Ok(())
    }

    fn append(documents: &mut Documents, record: Record<'_>) -> Result<()> {
        let document = Document::new(record)?;
        let chain = documents.entry(reference(&record.key())).or_default();
        let start = document.header().storage.start;
        let at = chain.partition_point(|d| d.header().storage.start <= start);
        chain.insert(at, document);
        Ok(())
    }

    fn close(documents: &mut Documents, key: &VersionKey, end: Timestamp) {
        let Some(chain) = documents.get_mut(&reference(key)) else {
            return;
        };
        if let Some(document) = chain
            .iter_mut()
            .find(|d| d.header().version == key.version)
        {
            let header = document.header_mut();
            if header.storage.end.is_none() {
                header.storage.end = Some(end);
            }
        }
    }

    fn visible_version<'d>(chain: Option<&'d Vec<Document>>, snapshot: Snapshot) -> Option<&'d Document> {
        chain?.iter().rev().find(|d| d.header().visible(snapshot))
    }

    /// Classification versions of `guid`, ordered by name then start.
    fn classifications_of<'d>(
        documents: &'d Documents,
        guid: &Guid,
    ) -> impl Iterator<Item = &'d Classification> + 'd {
        let prefix = classification_prefix(guid);
        documents
            .range(prefix.clone()..)
            .take_while(move |(reference, _)| reference.starts_with(&prefix))
            .flat_map(|(_, chain)| chain.iter().filter_map(Document::as_classification))
    }

    /// Copies an entity version and attaches its classifications.
    fn hydrate(documents: &Documents, document: &Document, snapshot: Option<Snapshot>) -> Option<Entity> {
        let mut entity = document.as_entity()?.clone();
        if !entity.is_proxy {
            let start = entity.header.storage.start;
            entity.classifications = Self::classifications_of(documents, &entity.header.guid)
                .filter(|c| match snapshot {
                    Some(snapshot) => c.header.visible(snapshot),
                    None => c.header.storage.contains(start),
                })
                .cloned()
                .collect();
        }
        Some(entity)
    }

    /// Evaluates `query` over every chain under `prefix`.
    fn evaluate<'d>(
        &self,
        documents: &'d Documents,
        prefix: &str,
        query: &DatalogQuery,
        deadline: Deadline,
        operation: &'static str,
    ) -> Result<Vec<&'d Document>> {
        tracing::debug!(operation, query = %query, "Evaluating query map");
        let evaluator = Evaluator::new(documents, self.context.guard);
        let mut found = Vec::new();
        for (_, chain) in documents
            .range(prefix.to_string()..)
            .take_while(|(reference, _)| reference.starts_with(prefix))
        {
            for document in chain {
                deadline.check(operation)?;
                if evaluator.holds(&query.where_clause, document)? {
                    found.push(document);
                }
            }
        }
        Ok(found)
    }

    fn history<T, F>(
        &self,
        reference: String,
        deadline: Deadline,
        operation: &'static str,
        extract: F,
    ) -> HistoryCursor<'_, T>
    where
        T: Versioned + 'static,
        F: Fn(&Documents, &Document) -> Option<T> + 'static,
    {
        HistoryCursor::new(
            DEFAULT_HISTORY_BATCH,
            Box::new(move |before: Option<Timestamp>, limit: usize| {
                deadline.check(operation)?;
                let documents = self.read(operation)?;
                Ok(documents
                    .get(&reference)
                    .into_iter()
                    .flatten()
                    .rev()
                    .filter(|d| before.is_none_or(|b| d.header().storage.start < b))
                    .take(limit)
                    .filter_map(|d| extract(&*documents, d))
                    .collect())
            }),
        )
    }

    fn hop_clause(
        &self,
        filter: &HopFilter,
        snapshot: Snapshot,
        target: InstanceKind,
    ) -> Result<Clause> {
        let translator = self.translator(snapshot);
        let (types, classifications) = match target {
            InstanceKind::Relationship => (&filter.relationship_types, None),
            _ => (&filter.entity_types, filter.classifications.as_ref()),
        };
        let mut clauses = vec![
            translator.render(Conditions::AsOf(snapshot), target)?,
            translator.render(Conditions::Types(types), target)?,
            translator.render(Conditions::Status(&filter.status), target)?,
        ];
        if let Some(classifications) = classifications {
            clauses.push(translator.render(Conditions::Classifications(classifications), target)?);
        }
        Ok(translator.conjoin(clauses))
    }
}

fn check_order(order: &SequencingOrder) -> Result<()> {
    if let SequencingOrder::PropertyAscending(name) | SequencingOrder::PropertyDescending(name) =
        order
        && (name.is_empty() || name.contains(crate::models::PATH_SEPARATOR))
    {
        return Err(Error::BadSearchProperty {
            property: name.clone(),
            reason: "only top-level properties can be used for sequencing".to_string(),
        });
    }
    Ok(())
}

fn sorted<T: HasProperties>(mut items: Vec<T>, order: &SequencingOrder) -> Vec<T> {
    paging::sort(&mut items, order);
    items
}

impl RepositoryBackend for DocumentStore {
    fn repository_name(&self) -> &str {
        &self.context.repository_name
    }

    fn metadata_collection_id(&self) -> &str {
        &self.context.metadata_collection_id
    }

    #[instrument(skip(self), fields(guid = %guid))]
    fn get_entity(&self, guid: &Guid, snapshot: Snapshot) -> Result<Option<Entity>> {
        let documents = self.read("get_entity")?;
        Ok(
            Self::visible_version(documents.get(&entity_reference(guid)), snapshot)
                .and_then(|d| Self::hydrate(&documents, d, Some(snapshot))),
        )
    }

    #[instrument(skip(self, guids), fields(count = guids.len()))]
    fn get_entities(&self, guids: &[Guid], snapshot: Snapshot) -> Result<Vec<Entity>> {
        let documents = self.read("get_entities")?;
        Ok(guids
            .iter()
            .filter_map(|guid| Self::visible_version(documents.get(&entity_reference(guid)), snapshot))
            .filter_map(|d| Self::hydrate(&documents, d, Some(snapshot)))
            .collect())
    }

    #[instrument(skip(self), fields(guid = %guid))]
    fn get_relationship(&self, guid: &Guid, snapshot: Snapshot) -> Result<Option<Relationship>> {
        let documents = self.read("get_relationship")?;
        Ok(
            Self::visible_version(documents.get(&relationship_reference(guid)), snapshot)
                .and_then(Document::as_relationship)
                .cloned(),
        )
    }

    #[instrument(skip(self), fields(guid = %entity))]
    fn get_classification(
        &self,
        entity: &Guid,
        name: &str,
        snapshot: Snapshot,
    ) -> Result<Option<Classification>> {
        let documents = self.read("get_classification")?;
        Ok(Self::visible_version(
            documents.get(&classification_reference(entity, name)),
            snapshot,
        )
        .and_then(Document::as_classification)
        .cloned())
    }

    fn entity_exists(&self, guid: &Guid) -> Result<bool> {
        Ok(self
            .read("entity_exists")?
            .get(&entity_reference(guid))
            .is_some_and(|chain| !chain.is_empty()))
    }

    fn entity_history(&self, guid: &Guid, deadline: Deadline) -> Result<HistoryCursor<'_, Entity>> {
        Ok(self.history(entity_reference(guid), deadline, "entity_history", |documents, d| {
            Self::hydrate(documents, d, None)
        }))
    }

    fn relationship_history(
        &self,
        guid: &Guid,
        deadline: Deadline,
    ) -> Result<HistoryCursor<'_, Relationship>> {
        Ok(self.history(relationship_reference(guid), deadline, "relationship_history", |_, d| {
            d.as_relationship().cloned()
        }))
    }

    fn classification_history(
        &self,
        entity: &Guid,
        name: &str,
        deadline: Deadline,
    ) -> Result<HistoryCursor<'_, Classification>> {
        Ok(self.history(
            classification_reference(entity, name),
            deadline,
            "classification_history",
            |_, d| d.as_classification().cloned(),
        ))
    }

    #[instrument(skip(self, record), fields(kind = %record.kind(), guid = %record.header().guid))]
    fn insert(&self, record: Record<'_>) -> Result<()> {
        let mut documents = self.write("insert")?;
        self.check_insert("insert", documents.get(&reference(&record.key())), record, None)?;
        Self::append(&mut documents, record)?;
        metrics::counter!("metarepo_versions_written_total", "kind" => record.kind().as_str(), "backend" => "document")
            .increment(1);
        Ok(())
    }

    #[instrument(skip(self), fields(guid = %key.guid, version = key.version))]
    fn close_out(&self, key: &VersionKey, end: Timestamp) -> Result<()> {
        let mut documents = self.write("close_out")?;
        Self::close(&mut documents, key, end);
        Ok(())
    }

    #[instrument(skip(self, previous, next), fields(kind = %next.kind(), guid = %previous.guid, version = next.header().version))]
    fn supersede(&self, previous: &VersionKey, next: Record<'_>) -> Result<()> {
        let mut documents = self.write("supersede")?;
        self.check_insert(
            "supersede",
            documents.get(&reference(&next.key())),
            next,
            Some(previous),
        )?;
        let document = Document::new(next)?;
        Self::close(&mut documents, previous, next.header().storage.start);
        let chain = documents.entry(reference(&next.key())).or_default();
        let start = document.header().storage.start;
        let at = chain.partition_point(|d| d.header().storage.start <= start);
        chain.insert(at, document);
        metrics::counter!("metarepo_versions_written_total", "kind" => next.kind().as_str(), "backend" => "document")
            .increment(1);
        Ok(())
    }

    #[instrument(skip(self, relationship, proxies), fields(guid = %relationship.header.guid))]
    fn insert_relationship(&self, relationship: &Relationship, proxies: &[Entity]) -> Result<usize> {
        let record = Record::Relationship(relationship);
        let mut documents = self.write("insert_relationship")?;
        self.check_insert(
            "insert_relationship",
            documents.get(&reference(&record.key())),
            record,
            None,
        )?;
        let relationship_document = Document::new(record)?;
        let mut missing: Vec<Document> = Vec::new();
        for proxy in proxies {
            let guid = &proxy.header.guid;
            let known = documents.contains_key(&entity_reference(guid))
                || missing.iter().any(|d| &d.header().guid == guid);
            if !known {
                missing.push(Document::new(Record::Entity(proxy))?);
            }
        }

        let created = missing.len();
        for proxy in missing {
            documents
                .entry(entity_reference(&proxy.header().guid))
                .or_default()
                .push(proxy);
        }
        documents
            .entry(relationship_reference(&relationship.header.guid))
            .or_default()
            .push(relationship_document);

        metrics::counter!("metarepo_versions_written_total", "kind" => "relationship", "backend" => "document")
            .increment(1);
        if created > 0 {
            metrics::counter!("metarepo_proxies_created_total", "backend" => "document")
                .increment(created as u64);
        }
        Ok(created)
    }

    #[instrument(skip(self), fields(guid = %guid))]
    fn purge_entity(&self, guid: &Guid) -> Result<PurgeReport> {
        let mut documents = self.write("purge_entity")?;
        let versions = documents
            .remove(&entity_reference(guid))
            .map_or(0, |chain| chain.len());

        let prefix = classification_prefix(guid);
        let classification_chains: Vec<String> = documents
            .range(prefix.clone()..)
            .take_while(|(reference, _)| reference.starts_with(&prefix))
            .map(|(reference, _)| reference.clone())
            .collect();
        let classifications = classification_chains
            .iter()
            .filter_map(|reference| documents.remove(reference))
            .map(|chain| chain.len())
            .sum();

        let touching: Vec<String> = documents
            .range(RELATIONSHIP_PREFIX.to_string()..)
            .take_while(|(reference, _)| reference.starts_with(RELATIONSHIP_PREFIX))
            .filter(|(_, chain)| {
                chain
                    .iter()
                    .filter_map(Document::as_relationship)
                    .any(|r| r.touches(guid))
            })
            .map(|(reference, _)| reference.clone())
            .collect();
        for reference in &touching {
            documents.remove(reference);
        }

        Ok(PurgeReport {
            versions,
            classifications,
            relationships: touching.len(),
        })
    }

    #[instrument(skip(self), fields(guid = %guid))]
    fn purge_relationship(&self, guid: &Guid) -> Result<PurgeReport> {
        let versions = self
            .write("purge_relationship")?
            .remove(&relationship_reference(guid))
            .map_or(0, |chain| chain.len());
        Ok(PurgeReport {
            versions,
            ..PurgeReport::default()
        })
    }

    #[instrument(skip(self, request), fields(snapshot = ?request.snapshot))]
    fn find_entities(&self, request: &SearchRequest) -> Result<Vec<Entity>> {
        request.deadline.check("find_entities")?;
        check_order(&request.order)?;
        let query = DatalogQuery::new(
            InstanceKind::Entity,
            self.translator(request.snapshot)
                .render_request(request, InstanceKind::Entity)?,
            request.order.clone(),
        );
        metrics::counter!("metarepo_searches_total", "kind" => "entity", "backend" => "document")
            .increment(1);

        let documents = self.read("find_entities")?;
        let found = self.evaluate(&documents, ENTITY_PREFIX, &query, request.deadline, "find_entities")?;
        let entities = found
            .into_iter()
            .filter_map(|d| Self::hydrate(&documents, d, Some(request.snapshot)))
            .collect();
        Ok(sorted(entities, &query.order))
    }

    #[instrument(skip(self, request), fields(snapshot = ?request.snapshot))]
    fn find_relationships(&self, request: &SearchRequest) -> Result<Vec<Relationship>> {
        request.deadline.check("find_relationships")?;
        check_order(&request.order)?;
        let query = DatalogQuery::new(
            InstanceKind::Relationship,
            self.translator(request.snapshot)
                .render_request(request, InstanceKind::Relationship)?,
            request.order.clone(),
        );
        metrics::counter!("metarepo_searches_total", "kind" => "relationship", "backend" => "document")
            .increment(1);

        let documents = self.read("find_relationships")?;
        let found = self.evaluate(
            &documents,
            RELATIONSHIP_PREFIX,
            &query,
            request.deadline,
            "find_relationships",
        )?;
        let relationships = found
            .into_iter()
            .filter_map(Document::as_relationship)
            .cloned()
            .collect();
        Ok(sorted(relationships, &query.order))
    }

    #[instrument(skip(self, filter, deadline), fields(guid = %guid))]
    fn neighbors(
        &self,
        guid: &Guid,
        filter: &HopFilter,
        snapshot: Snapshot,
        deadline: Deadline,
    ) -> Result<Vec<Hop>> {
        deadline.check("neighbors")?;
        let edge = Clause::and(vec![
            Clause::EitherEnd { guid: guid.clone() },
            self.hop_clause(filter, snapshot, InstanceKind::Relationship)?,
        ]);
        let neighbor = self.hop_clause(filter, snapshot, InstanceKind::Entity)?;
        tracing::debug!(edge = %edge, neighbor = %neighbor, "Evaluating neighbor query");

        let documents = self.read("neighbors")?;
        let evaluator = Evaluator::new(&documents, self.context.guard);
        let mut hops = Vec::new();
        for (_, chain) in documents
            .range(RELATIONSHIP_PREFIX.to_string()..)
            .take_while(|(reference, _)| reference.starts_with(RELATIONSHIP_PREFIX))
        {
            for document in chain {
                deadline.check("neighbors")?;
                if !evaluator.holds(&edge, document)? {
                    continue;
                }
                let Some(relationship) = document.as_relationship() else {
                    continue;
                };
                let Some(end) = relationship.other_end(guid) else {
                    continue;
                };
                let Some(entity_document) =
                    Self::visible_version(documents.get(&entity_reference(&end.guid)), snapshot)
                else {
                    continue;
                };
                if !evaluator.holds(&neighbor, entity_document)? {
                    continue;
                }
                if let Some(entity) = Self::hydrate(&documents, entity_document, Some(snapshot)) {
                    hops.push(Hop {
                        relationship: relationship.clone(),
                        entity,
                    });
                }
            }
        }
        Ok(hops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EffectivityWindow, EntityProxy, InstanceProperties, InstanceStatus, PropertyCondition,
        SearchProperties, StorageWindow,
    };
    use crate::regex_guard::RegexGuard;
    use crate::types::{TypeCategory, TypeDefSummary, TypeRegistry};
    use std::sync::Arc;

    fn store() -> DocumentStore {
        let types = TypeRegistry::with_types([
            TypeDefSummary::new("t-person", "Person", TypeCategory::Entity),
            TypeDefSummary::new("t-knows", "Knows", TypeCategory::Relationship),
        ])
        .unwrap();
        DocumentStore::new(BackendContext::new(
            "docs",
            "mc-1",
            Arc::new(types),
            RegexGuard::default(),
        ))
    }

    fn header(guid: &str, type_name: &str, version: i64, start: i64) -> InstanceHeader {
        InstanceHeader {
            guid: Guid::new(guid),
            type_guid: format!("t-{}", type_name.to_lowercase()),
            type_name: type_name.to_string(),
            version,
            status: InstanceStatus::Active,
            metadata_collection_id: "mc-1".to_string(),
            created_by: "tester".to_string(),
            updated_by: None,
            create_time: Timestamp::from_millis(100),
            update_time: None,
            effective: EffectivityWindow::unbounded(),
            storage: StorageWindow::open(Timestamp::from_millis(start)),
        }
    }

    fn person(guid: &str, name: &str, version: i64, start: i64) -> Entity {
        Entity {
            header: header(guid, "Person", version, start),
            properties: InstanceProperties::new().with("name", name),
            classifications: Vec::new(),
            is_proxy: false,
        }
    }

    #[test]
    fn test_second_current_version_is_rejected() {
        let store = store();
        store.insert(Record::Entity(&person("e1", "Ann", 1, 100))).unwrap();
        let err = store
            .insert(Record::Entity(&person("e1", "Anne", 2, 200)))
            .unwrap_err();
        assert!(matches!(err, Error::Repository { .. }));
        assert_eq!(store.version_count(), 1);
    }

    #[test]
    fn test_supersede_and_as_of_reads() {
        let store = store();
        let v1 = person("e1", "Ann", 1, 100);
        store.insert(Record::Entity(&v1)).unwrap();
        store
            .supersede(&Record::Entity(&v1).key(), Record::Entity(&person("e1", "Anne", 2, 200)))
            .unwrap();

        let at = |ms| {
            store
                .get_entity(&Guid::new("e1"), Snapshot::AsOf(Timestamp::from_millis(ms)))
                .unwrap()
                .map(|e| e.header.version)
        };
        assert_eq!(at(99), None);
        assert_eq!(at(100), Some(1));
        assert_eq!(at(199), Some(1));
        assert_eq!(at(200), Some(2));

        let history: Vec<i64> = store
            .entity_history(&Guid::new("e1"), Deadline::unbounded())
            .unwrap()
            .map(|e| e.unwrap().header.version)
            .collect();
        assert_eq!(history, vec![2, 1]);
    }

    #[test]
    fn test_history_stops_at_deadline() {
        let store = store();
        store.insert(Record::Entity(&person("e1", "Ann", 1, 100))).unwrap();
        let mut cursor = store
            .entity_history(&Guid::new("e1"), Deadline::after(std::time::Duration::ZERO))
            .unwrap();
        assert!(cursor.next().unwrap().unwrap_err().is_timeout());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_proxy_never_overwrites_full_record() {
        let store = store();
        let e1 = person("e1", "Ann", 1, 100);
        store.insert(Record::Entity(&e1)).unwrap();
        let mut thin = e1.clone();
        thin.is_proxy = true;
        let mut e2 = person("e2", "Bob", 1, 100);
        e2.is_proxy = true;
        let relationship = Relationship {
            header: header("r1", "Knows", 1, 100),
            properties: InstanceProperties::new(),
            end1: e1.to_proxy(),
            end2: EntityProxy::new(Guid::new("e2"), "t-person", "Person"),
        };
        assert_eq!(store.insert_relationship(&relationship, &[thin, e2]).unwrap(), 1);
        let e1 = store.get_entity(&Guid::new("e1"), Snapshot::Current).unwrap().unwrap();
        assert!(!e1.is_proxy);

        let hops = store
            .neighbors(&Guid::new("e2"), &HopFilter::default(), Snapshot::Current, Deadline::unbounded())
            .unwrap();
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].entity.header.guid, Guid::new("e1"));

        let report = store.purge_entity(&Guid::new("e2")).unwrap();
        assert_eq!(report.relationships, 1);
        assert!(store.get_relationship(&Guid::new("r1"), Snapshot::Current).unwrap().is_none());
    }

    #[test]
    fn test_find_and_sequencing() {
        let store = store();
        store.insert(Record::Entity(&person("b", "Bea", 1, 100))).unwrap();
        store.insert(Record::Entity(&person("a", "Ann", 1, 100))).unwrap();
        store.insert(Record::Entity(&person("c", "Cy", 1, 100))).unwrap();
        let request = SearchRequest::new()
            .with_properties(SearchProperties::any([
                PropertyCondition::like("name", "A.*"),
                PropertyCondition::like("name", "B.*"),
            ]))
            .with_order(SequencingOrder::PropertyDescending("name".to_string()));
        let found: Vec<String> = store
            .find_entities(&request)
            .unwrap()
            .into_iter()
            .map(|e| e.header.guid.as_str().to_string())
            .collect();
        assert_eq!(found, vec!["b", "a"]);

        let dotted = SearchRequest::new()
            .with_order(SequencingOrder::PropertyAscending("a.b".to_string()));
        assert!(matches!(
            store.find_entities(&dotted),
            Err(Error::BadSearchProperty { .. })
        ));
    }
}
