//! Repository integration tests.
//!
//! Runs the same scenarios against both backends:
//! - Version chains and point-in-time reads
//! - Proxies created for unknown relationship ends
//! - Neighborhood and path search
//! - History retrieval in both directions and under a query timeout
//! - Traversals racing a writer
//! - `SQLite` persistence across reopen

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use metarepo::models::{HistoryOrder, PageRequest, StatusFilter};
use metarepo::{
    BackendKind, DocumentStore, EntityProxy, Error, Guid, HistoryRequest, InstanceGraph,
    InstanceProperties, InstanceStatus, MetadataRepository, NeighborhoodRequest, NewEntity,
    NewRelationship, PropertyValue, RepositoryBackend, RepositoryConfig, SqliteBackend,
    StorageWindow, Timestamp, TypeCategory, TypeDefSummary, TypeRegistry,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;
use test_case::test_case;

// ============================================================================
// Test Helpers
// ============================================================================

fn types() -> Arc<TypeRegistry> {
    Arc::new(
        TypeRegistry::with_types([
            TypeDefSummary::new("t-person", "Person", TypeCategory::Entity),
            TypeDefSummary::new("t-team", "Team", TypeCategory::Entity),
            TypeDefSummary::new("t-knows", "Knows", TypeCategory::Relationship),
            TypeDefSummary::new("t-member", "Membership", TypeCategory::Relationship),
            TypeDefSummary::new("t-conf", "Confidential", TypeCategory::Classification),
        ])
        .expect("valid type registry"),
    )
}

fn open(backend: BackendKind) -> MetadataRepository {
    let config = RepositoryConfig::default().with_backend(backend);
    MetadataRepository::open(&config, types()).expect("repository opens")
}

fn person(repo: &MetadataRepository, id: &str) -> Guid {
    repo.add_entity(
        "tester",
        NewEntity::new("Person")
            .with_guid(Guid::new(id))
            .with_property("name", id),
    )
    .unwrap()
    .header
    .guid
}

fn knows(repo: &MetadataRepository, a: &Guid, b: &Guid) -> Guid {
    let end1 = repo.get_entity_detail(a, None).unwrap();
    let end2 = repo.get_entity_detail(b, None).unwrap();
    repo.add_relationship("tester", NewRelationship::between("Knows", &end1, &end2))
        .unwrap()
        .header
        .guid
}

fn guids<'a>(iter: impl Iterator<Item = &'a Guid>) -> BTreeSet<String> {
    iter.map(|g| g.as_str().to_string()).collect()
}

fn names(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| (*s).to_string()).collect()
}

fn sqlite() -> BackendKind {
    BackendKind::Sqlite { path: None }
}

// ============================================================================
// Version Chains
// ============================================================================

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_rename_is_visible_as_of_each_version(backend: BackendKind) {
    let repo = open(backend);
    let v1 = repo
        .add_entity("alice", NewEntity::new("Person").with_property("name", "Ann"))
        .unwrap();
    let guid = v1.header.guid.clone();
    let t1 = v1.header.storage.start;

    let v2 = repo
        .update_entity_properties("bob", &guid, InstanceProperties::new().with("name", "Anne"))
        .unwrap();
    assert_eq!(v2.header.version, 2);
    assert!(v2.header.storage.start > t1);

    let current = repo.get_entity_detail(&guid, None).unwrap();
    assert_eq!(current.properties.get("name"), Some(&PropertyValue::string("Anne")));
    assert_eq!(current.header.updated_by.as_deref(), Some("bob"));

    let then = repo.get_entity_detail(&guid, Some(t1)).unwrap();
    assert_eq!(then.properties.get("name"), Some(&PropertyValue::string("Ann")));
    assert_eq!(then.header.version, 1);

    let before = repo.get_entity_detail(&guid, Some(Timestamp::from_millis(t1.as_millis() - 1)));
    assert!(matches!(before, Err(Error::NotKnown { .. })));
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_soft_delete_hides_and_restore_returns(backend: BackendKind) {
    let repo = open(backend);
    let guid = person(&repo, "ann");
    repo.update_entity_status("tester", &guid, InstanceStatus::Draft)
        .unwrap();
    let deleted = repo.delete_entity("tester", &guid).unwrap();
    assert_eq!(deleted.header.status, InstanceStatus::Deleted);

    assert!(repo.is_entity_known(&guid, None).unwrap().is_none());
    assert!(
        repo.is_entity_known(&guid, Some(deleted.header.storage.start.plus_millis(-1)))
            .unwrap()
            .is_some()
    );

    let restored = repo.restore_entity("tester", &guid).unwrap();
    assert_eq!(restored.header.status, InstanceStatus::Draft);
    assert_eq!(restored.header.version, 4);
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_classification_appears_in_detail_and_search(backend: BackendKind) {
    let repo = open(backend);
    let ann = person(&repo, "ann");
    person(&repo, "bo");
    repo.classify_entity(
        "tester",
        &ann,
        "Confidential",
        InstanceProperties::new().with("level", 3_i64),
    )
    .unwrap();

    let detail = repo.get_entity_detail(&ann, None).unwrap();
    let classification = detail.classification("Confidential").unwrap();
    assert_eq!(classification.properties.get("level"), Some(&PropertyValue::int(3)));

    let found = repo
        .find_entities_by_classification("Confidential", None, &metarepo::FindRequest::new())
        .unwrap();
    assert_eq!(guids(found.iter().map(|e| &e.header.guid)), names(&["ann"]));

    repo.declassify_entity("tester", &ann, "Confidential")
        .unwrap();
    let found = repo
        .find_entities_by_classification("Confidential", None, &metarepo::FindRequest::new())
        .unwrap();
    assert!(found.is_empty());
}

// ============================================================================
// Proxies
// ============================================================================

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_unknown_end_becomes_proxy_then_full_entity(backend: BackendKind) {
    let repo = open(backend);
    let ann = repo.get_entity_detail(&person(&repo, "ann"), None).unwrap();
    let remote = Guid::new("remote-team");
    let proxy = EntityProxy::new(remote.clone(), "t-team", "Team")
        .with_unique_properties(InstanceProperties::new().with("qualifiedName", "team::remote"));

    repo.add_relationship(
        "tester",
        NewRelationship::new("Membership", ann.to_proxy(), proxy),
    )
    .unwrap();

    let summary = repo.get_entity_summary(&remote, None).unwrap();
    assert!(summary.is_proxy);
    assert_eq!(
        summary.properties.get("qualifiedName"),
        Some(&PropertyValue::string("team::remote"))
    );
    assert!(matches!(
        repo.get_entity_detail(&remote, None),
        Err(Error::ProxyOnly { .. })
    ));
    assert!(matches!(
        repo.update_entity_properties("tester", &remote, InstanceProperties::new()),
        Err(Error::ProxyOnly { .. })
    ));

    let full = repo
        .add_entity("tester", NewEntity::new("Team").with_guid(remote.clone()))
        .unwrap();
    assert_eq!(full.header.version, 2);
    assert!(!repo.get_entity_detail(&remote, None).unwrap().is_proxy);
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_relationship_end_type_must_match(backend: BackendKind) {
    let repo = open(backend);
    let ann = repo.get_entity_detail(&person(&repo, "ann"), None).unwrap();
    let wrong = EntityProxy::new(ann.header.guid.clone(), "t-team", "Team");
    let result = repo.add_relationship(
        "tester",
        NewRelationship::new("Membership", wrong, ann.to_proxy()),
    );
    assert!(matches!(result, Err(Error::TypeError { .. })));
}

// ============================================================================
// Graph Queries
// ============================================================================

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_neighborhood_depths(backend: BackendKind) {
    let repo = open(backend);
    let a = person(&repo, "a");
    let b = person(&repo, "b");
    let c = person(&repo, "c");
    let ab = knows(&repo, &a, &b);
    knows(&repo, &b, &c);

    let zero = repo
        .get_entity_neighborhood(&a, &NeighborhoodRequest::new(0))
        .unwrap();
    assert_eq!(guids(zero.entity_guids()), names(&["a"]));
    assert!(zero.relationships.is_empty());

    let one = repo
        .get_entity_neighborhood(&a, &NeighborhoodRequest::new(1))
        .unwrap();
    assert_eq!(guids(one.entity_guids()), names(&["a", "b"]));
    assert_eq!(
        guids(one.relationship_guids()),
        guids(std::iter::once(&ab))
    );

    let all = repo
        .get_entity_neighborhood(&a, &NeighborhoodRequest::new(-1))
        .unwrap();
    assert_eq!(guids(all.entity_guids()), names(&["a", "b", "c"]));
    assert_eq!(all.relationships.len(), 2);
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_linking_entities(backend: BackendKind) {
    let repo = open(backend);
    let a = person(&repo, "a");
    let b = person(&repo, "b");
    let c = person(&repo, "c");
    let island = person(&repo, "island");
    knows(&repo, &a, &b);
    knows(&repo, &b, &c);

    let path = repo
        .get_linking_entities(&a, &c, &StatusFilter::default(), None)
        .unwrap();
    assert_eq!(guids(path.entity_guids()), names(&["a", "b", "c"]));
    assert_eq!(path.relationships.len(), 2);

    let none = repo
        .get_linking_entities(&a, &island, &StatusFilter::default(), None)
        .unwrap();
    assert!(none.is_empty());

    let unknown = repo.get_linking_entities(&a, &Guid::new("nobody"), &StatusFilter::default(), None);
    assert!(matches!(unknown, Err(Error::NotKnown { .. })));
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_deleted_relationship_is_not_traversed(backend: BackendKind) {
    let repo = open(backend);
    let a = person(&repo, "a");
    let b = person(&repo, "b");
    let ab = knows(&repo, &a, &b);
    repo.delete_relationship("tester", &ab).unwrap();

    let graph = repo
        .get_entity_neighborhood(&a, &NeighborhoodRequest::new(1))
        .unwrap();
    assert_eq!(guids(graph.entity_guids()), names(&["a"]));
}

/// Storage windows of every version a graph returned, as stored now.
fn windows(repo: &MetadataRepository, graph: &InstanceGraph) -> Vec<StorageWindow> {
    let all = HistoryRequest::new();
    let entities = graph.entities.iter().map(|e| {
        repo.get_entity_history(&e.header.guid, &all)
            .unwrap()
            .into_iter()
            .find(|v| v.header.version == e.header.version)
            .unwrap()
            .header
            .storage
    });
    let relationships = graph.relationships.iter().map(|r| {
        repo.get_relationship_history(&r.header.guid, &all)
            .unwrap()
            .into_iter()
            .find(|v| v.header.version == r.header.version)
            .unwrap()
            .header
            .storage
    });
    entities.chain(relationships).collect()
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_neighborhood_reads_one_instant_while_writing(backend: BackendKind) {
    let repo = open(backend);
    let nodes: Vec<Guid> = ["n0", "n1", "n2", "n3"]
        .into_iter()
        .map(|id| person(&repo, id))
        .collect();
    let edges: Vec<Guid> = nodes.windows(2).map(|pair| knows(&repo, &pair[0], &pair[1])).collect();

    let graphs: Vec<InstanceGraph> = std::thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..40_i64 {
                for node in &nodes {
                    repo.update_entity_properties(
                        "writer",
                        node,
                        InstanceProperties::new().with("round", round),
                    )
                    .unwrap();
                }
                for edge in &edges {
                    repo.update_relationship_properties(
                        "writer",
                        edge,
                        InstanceProperties::new().with("round", round),
                    )
                    .unwrap();
                }
            }
        });
        (0..40)
            .map(|_| {
                repo.get_entity_neighborhood(&nodes[0], &NeighborhoodRequest::new(-1))
                    .unwrap()
            })
            .collect()
    });

    for graph in &graphs {
        assert_eq!(graph.entities.len(), 4);
        assert_eq!(graph.relationships.len(), 3);
        let windows = windows(&repo, graph);
        let latest_start = windows.iter().map(|w| w.start).max().unwrap();
        if let Some(earliest_end) = windows.iter().filter_map(|w| w.end).min() {
            assert!(
                latest_start < earliest_end,
                "graph mixes versions from different instants"
            );
        }
    }
}

// ============================================================================
// History
// ============================================================================

/// Backend shared by a writing repository and a second reader.
fn shared_backend(backend: &BackendKind, config: &RepositoryConfig) -> Arc<dyn RepositoryBackend> {
    let context = config.backend_context(types());
    match backend {
        BackendKind::Document => Arc::new(DocumentStore::new(context)),
        BackendKind::Sqlite { .. } => Arc::new(SqliteBackend::in_memory(context).unwrap()),
    }
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_long_history_honours_query_timeout(backend: BackendKind) {
    let config = RepositoryConfig::default().with_backend(backend.clone());
    let store = shared_backend(&backend, &config);
    let writer = MetadataRepository::with_backend(Arc::clone(&store), types(), &config);

    let a = person(&writer, "a");
    let b = person(&writer, "b");
    let ab = knows(&writer, &a, &b);
    writer
        .classify_entity("tester", &a, "Confidential", InstanceProperties::new())
        .unwrap();
    for round in 0..300_i64 {
        let properties = InstanceProperties::new().with("round", round);
        writer
            .update_entity_properties("tester", &a, properties.clone())
            .unwrap();
        writer
            .update_relationship_properties("tester", &ab, properties.clone())
            .unwrap();
        writer
            .update_entity_classification("tester", &a, "Confidential", properties)
            .unwrap();
    }
    let all = HistoryRequest::new().with_page(PageRequest::new(0, 1_000));
    assert_eq!(writer.get_entity_history(&a, &all).unwrap().len(), 301);

    let hurried = MetadataRepository::with_backend(store, types(), &config.with_query_timeout_ms(0));
    assert!(matches!(
        hurried.get_entity_history(&a, &all),
        Err(Error::Timeout { .. })
    ));
    assert!(matches!(
        hurried.get_relationship_history(&ab, &all),
        Err(Error::Timeout { .. })
    ));
    assert!(matches!(
        hurried.get_classification_history(&a, "Confidential", &all),
        Err(Error::Timeout { .. })
    ));
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_history_directions_are_symmetric(backend: BackendKind) {
    let repo = open(backend);
    let guid = person(&repo, "ann");
    for n in 0..4_i64 {
        repo.update_entity_properties("tester", &guid, InstanceProperties::new().with("n", n))
            .unwrap();
    }

    let versions = |order| {
        repo.get_entity_history(&guid, &HistoryRequest::new().with_order(order))
            .unwrap()
            .into_iter()
            .map(|e| e.header.version)
            .collect::<Vec<_>>()
    };
    let backward = versions(HistoryOrder::Backward);
    let mut forward = versions(HistoryOrder::Forward);
    assert_eq!(backward, vec![5, 4, 3, 2, 1]);
    forward.reverse();
    assert_eq!(forward, backward);
}

#[test_case(sqlite() ; "sqlite")]
#[test_case(BackendKind::Document ; "document")]
fn test_history_range(backend: BackendKind) {
    let repo = open(backend);
    let guid = person(&repo, "ann");
    let v2 = repo
        .update_entity_properties("tester", &guid, InstanceProperties::new().with("n", 2_i64))
        .unwrap();
    let v3 = repo
        .update_entity_properties("tester", &guid, InstanceProperties::new().with("n", 3_i64))
        .unwrap();

    let range = HistoryRequest::new().between(
        Some(v2.header.storage.start),
        Some(v3.header.storage.start),
    );
    let versions: Vec<_> = repo
        .get_entity_history(&guid, &range)
        .unwrap()
        .into_iter()
        .map(|e| e.header.version)
        .collect();
    assert_eq!(versions, vec![2]);

    let future = HistoryRequest::new().between(Some(v3.header.storage.start.plus_millis(60_000)), None);
    assert!(matches!(
        repo.get_entity_history(&guid, &future),
        Err(Error::NotKnown { .. })
    ));
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_sqlite_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("repository.db");
    let config = RepositoryConfig::default().with_backend(BackendKind::Sqlite {
        path: Some(path.clone()),
    });

    let (guid, collection) = {
        let repo = MetadataRepository::open(&config, types()).unwrap();
        let entity = repo
            .add_entity("alice", NewEntity::new("Person").with_property("name", "Ann"))
            .unwrap();
        repo.update_entity_properties(
            "alice",
            &entity.header.guid,
            InstanceProperties::new().with("name", "Anne"),
        )
        .unwrap();
        (entity.header.guid, entity.header.metadata_collection_id)
    };

    let reopened = RepositoryConfig::default().with_backend(BackendKind::Sqlite { path: Some(path) });
    let repo = MetadataRepository::open(&reopened, types()).unwrap();
    let entity = repo.get_entity_detail(&guid, None).unwrap();
    assert_eq!(entity.header.version, 2);
    assert_eq!(entity.header.metadata_collection_id, collection);
    assert_eq!(repo.backend().metadata_collection_id(), collection);
}
