//! Graph traversal over the single-hop primitive.
//!
//! Both modes call [`RepositoryBackend::neighbors`] repeatedly under one
//! snapshot and one deadline:
//!
//! | Mode | Strategy | Bound |
//! |------|----------|-------|
//! | neighborhood | breadth-first by level | caller depth, or the configured cap when negative |
//! | linking entities | iterative depth-first | configured cap |
//!
//! Entities are never expanded twice at the same or a deeper level, so
//! cycles terminate. Proxies reached during a traversal keep their edges but
//! are left out of the entity list with a warning.

use crate::deadline::Deadline;
use crate::models::{
    Entity, Guid, Relationship, SearchClassifications, Snapshot, StatusFilter, Timestamp,
    TypeFilter,
};
use crate::storage::{Hop, HopFilter, RepositoryBackend};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// Filters and bounds of a neighborhood search.
#[derive(Debug, Clone, Default)]
pub struct NeighborhoodRequest {
    /// Accepted types of reached entities.
    pub entity_types: TypeFilter,
    /// Accepted relationship types.
    pub relationship_types: TypeFilter,
    /// Accepted status of relationships and reached entities.
    pub status: StatusFilter,
    /// Classification conditions on reached entities.
    pub classifications: Option<SearchClassifications>,
    /// Number of hops; negative expands until exhausted (capped).
    pub depth: i32,
    /// Read time; current versions when `None`.
    pub as_of: Option<Timestamp>,
}

impl NeighborhoodRequest {
    /// Unfiltered request with the given depth.
    #[must_use]
    pub fn new(depth: i32) -> Self {
        Self {
            depth,
            ..Self::default()
        }
    }

    /// Restricts reached entity types.
    #[must_use]
    pub fn with_entity_types(mut self, types: TypeFilter) -> Self {
        self.entity_types = types;
        self
    }

    /// Restricts relationship types.
    #[must_use]
    pub fn with_relationship_types(mut self, types: TypeFilter) -> Self {
        self.relationship_types = types;
        self
    }

    /// Restricts status.
    #[must_use]
    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    /// Requires classifications on reached entities.
    #[must_use]
    pub fn with_classifications(mut self, classifications: SearchClassifications) -> Self {
        self.classifications = Some(classifications);
        self
    }

    /// Reads as of `at`.
    #[must_use]
    pub const fn as_of(mut self, at: Timestamp) -> Self {
        self.as_of = Some(at);
        self
    }

    /// Filter applied to every hop.
    #[must_use]
    pub fn hop_filter(&self) -> HopFilter {
        HopFilter {
            entity_types: self.entity_types.clone(),
            relationship_types: self.relationship_types.clone(),
            status: self.status.clone(),
            classifications: self.classifications.clone(),
        }
    }

    /// Hop limit after applying `cap` to negative depths.
    #[must_use]
    pub fn depth_limit(&self, cap: usize) -> usize {
        usize::try_from(self.depth).map_or(cap, |depth| depth.min(cap))
    }
}

/// Entities and relationships found by a traversal, in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceGraph {
    /// Full entities, each once.
    pub entities: Vec<Entity>,
    /// Relationships, each once.
    pub relationships: Vec<Relationship>,
}

impl InstanceGraph {
    /// Returns `true` if nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// GUIDs of the entities.
    pub fn entity_guids(&self) -> impl Iterator<Item = &Guid> {
        self.entities.iter().map(|e| &e.header.guid)
    }

    /// GUIDs of the relationships.
    pub fn relationship_guids(&self) -> impl Iterator<Item = &Guid> {
        self.relationships.iter().map(|r| &r.header.guid)
    }
}

/// Accumulates a graph, deduplicating by GUID.
#[derive(Default)]
struct GraphBuilder {
    graph: InstanceGraph,
    entities: HashSet<Guid>,
    relationships: HashSet<Guid>,
}

impl GraphBuilder {
    fn add_entity(&mut self, entity: Entity) {
        if !self.entities.insert(entity.header.guid.clone()) {
            return;
        }
        if entity.is_proxy {
            tracing::warn!(
                guid = %entity.header.guid,
                type_name = %entity.header.type_name,
                "Skipping proxy entity in traversal result"
            );
            return;
        }
        self.graph.entities.push(entity);
    }

    fn add_relationship(&mut self, relationship: Relationship) {
        if self.relationships.insert(relationship.header.guid.clone()) {
            self.graph.relationships.push(relationship);
        }
    }

    fn add_hop(&mut self, hop: Hop) {
        self.add_relationship(hop.relationship);
        self.add_entity(hop.entity);
    }

    fn finish(self) -> InstanceGraph {
        self.graph
    }
}

/// One pending expansion of the depth-first path search.
struct Frame {
    level: usize,
    hops: std::vec::IntoIter<Hop>,
    best: Option<usize>,
    via: Option<Hop>,
}

fn shorter(current: Option<usize>, candidate: usize) -> Option<usize> {
    Some(current.map_or(candidate, |c| c.min(candidate)))
}

/// Traversal over one backend, snapshot and deadline.
pub struct Traversal<'b, B: RepositoryBackend + ?Sized> {
    backend: &'b B,
    filter: HopFilter,
    snapshot: Snapshot,
    deadline: Deadline,
}

impl<'b, B: RepositoryBackend + ?Sized> Traversal<'b, B> {
    /// Creates a traversal.
    #[must_use]
    pub const fn new(
        backend: &'b B,
        filter: HopFilter,
        snapshot: Snapshot,
        deadline: Deadline,
    ) -> Self {
        Self {
            backend,
            filter,
            snapshot,
            deadline,
        }
    }

    /// Resolves the seed entity: it must be a known, full entity whose
    /// status the filter accepts.
    fn seed(&self, guid: &Guid) -> Result<Entity> {
        let entity = self
            .backend
            .get_entity(guid, self.snapshot)?
            .filter(|e| self.filter.status.accepted().contains(&e.header.status))
            .ok_or_else(|| Error::NotKnown {
                kind: "entity",
                guid: guid.to_string(),
            })?;
        if entity.is_proxy {
            return Err(Error::ProxyOnly {
                guid: guid.to_string(),
            });
        }
        Ok(entity)
    }

    fn hops(&self, guid: &Guid) -> Result<Vec<Hop>> {
        self.deadline.check("graph_traversal")?;
        self.backend
            .neighbors(guid, &self.filter, self.snapshot, self.deadline)
    }

    /// Breadth-first expansion from `seed` up to `depth` hops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] or [`Error::ProxyOnly`] for a bad seed,
    /// and [`Error::Timeout`] if the deadline passes; no partial result is
    /// returned.
    #[instrument(skip(self), fields(seed = %seed))]
    pub fn neighborhood(&self, seed: &Guid, depth: usize) -> Result<InstanceGraph> {
        let mut graph = GraphBuilder::default();
        graph.add_entity(self.seed(seed)?);

        let mut visited = HashSet::from([seed.clone()]);
        let mut frontier = vec![seed.clone()];
        for level in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for guid in &frontier {
                for hop in self.hops(guid)? {
                    let reached = hop.entity.header.guid.clone();
                    if visited.insert(reached.clone()) {
                        next.push(reached);
                    }
                    graph.add_hop(hop);
                }
            }
            tracing::debug!(level = level + 1, reached = next.len(), "Expanded neighborhood level");
            frontier = next;
        }

        Ok(graph.finish())
    }

    /// Entities and relationships on every route of at most `max_depth` hops
    /// from `start` to `end`. Empty when no such route exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotKnown`] if either end is unknown,
    /// [`Error::ProxyOnly`] if `start` is a proxy, and [`Error::Timeout`] if
    /// the deadline passes.
    #[instrument(skip(self), fields(start = %start, end = %end))]
    pub fn linking(&self, start: &Guid, end: &Guid, max_depth: usize) -> Result<InstanceGraph> {
        let first = self.seed(start)?;
        if self.backend.get_entity(end, self.snapshot)?.is_none() {
            return Err(Error::NotKnown {
                kind: "entity",
                guid: end.to_string(),
            });
        }
        if start == end {
            let mut graph = GraphBuilder::default();
            graph.add_entity(first);
            return Ok(graph.finish());
        }

        let mut found = GraphBuilder::default();
        found.add_entity(first);

        // Shallowest level each entity was expanded at, and the shortest
        // route to `end` found from it.
        let mut expanded: HashMap<Guid, usize> = HashMap::from([(start.clone(), 0)]);
        let mut distance: HashMap<Guid, usize> = HashMap::new();
        let mut stack = vec![Frame {
            level: 0,
            hops: self.hops(start)?.into_iter(),
            best: None,
            via: None,
        }];

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };
            let Some(hop) = frame.hops.next() else {
                let Some(done) = stack.pop() else {
                    break;
                };
                if let (Some(best), Some(via)) = (done.best, done.via) {
                    let reached = via.entity.header.guid.clone();
                    let known = distance.entry(reached).or_insert(best);
                    *known = (*known).min(best);
                    if let Some(parent) = stack.last_mut() {
                        parent.best = shorter(parent.best, best + 1);
                    }
                    found.add_hop(via);
                }
                continue;
            };

            let reached = hop.entity.header.guid.clone();
            let level = frame.level + 1;
            if reached == *end {
                frame.best = shorter(frame.best, 1);
                found.add_hop(hop);
                continue;
            }
            if level >= max_depth {
                continue;
            }
            if expanded.get(&reached).is_some_and(|&seen| seen <= level) {
                if let Some(&rest) = distance.get(&reached)
                    && level + rest <= max_depth
                {
                    frame.best = shorter(frame.best, rest + 1);
                    found.add_hop(hop);
                }
                continue;
            }

            expanded.insert(reached.clone(), level);
            let hops = self.hops(&reached)?;
            stack.push(Frame {
                level,
                hops: hops.into_iter(),
                best: None,
                via: Some(hop),
            });
        }

        if found.graph.relationships.is_empty() {
            return Ok(InstanceGraph::default());
        }
        Ok(found.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EffectivityWindow, EntityProxy, InstanceHeader, InstanceProperties, InstanceStatus,
        StorageWindow,
    };
    use crate::regex_guard::RegexGuard;
    use crate::storage::{BackendContext, DocumentStore, Record};
    use crate::types::{TypeCategory, TypeDefSummary, TypeRegistry};
    use std::sync::Arc;
    use std::time::Duration;

    fn header(guid: &str, type_guid: &str, type_name: &str) -> InstanceHeader {
        InstanceHeader {
            guid: Guid::new(guid),
            type_guid: type_guid.to_string(),
            type_name: type_name.to_string(),
            version: 1,
            status: InstanceStatus::Active,
            metadata_collection_id: "mc".to_string(),
            created_by: "test".to_string(),
            updated_by: None,
            create_time: Timestamp::from_millis(10),
            update_time: None,
            effective: EffectivityWindow::unbounded(),
            storage: StorageWindow::open(Timestamp::from_millis(10)),
        }
    }

    fn store() -> DocumentStore {
        let types = TypeRegistry::with_types([
            TypeDefSummary::new("t-person", "Person", TypeCategory::Entity),
            TypeDefSummary::new("t-link", "Link", TypeCategory::Relationship),
        ])
        .unwrap();
        DocumentStore::new(BackendContext::new(
            "test",
            "mc",
            Arc::new(types),
            RegexGuard::default(),
        ))
    }

    fn person(store: &DocumentStore, guid: &str) {
        store
            .insert(Record::Entity(&Entity {
                header: header(guid, "t-person", "Person"),
                properties: InstanceProperties::new().with("name", guid),
                classifications: Vec::new(),
                is_proxy: false,
            }))
            .unwrap();
    }

    fn link(store: &DocumentStore, guid: &str, a: &str, b: &str) {
        let end = |g: &str| EntityProxy::new(Guid::new(g), "t-person", "Person");
        store
            .insert_relationship(
                &Relationship {
                    header: header(guid, "t-link", "Link"),
                    properties: InstanceProperties::new(),
                    end1: end(a),
                    end2: end(b),
                },
                &[],
            )
            .unwrap();
    }

    /// a - b - c - d, plus a - c and a cycle d - a via e.
    fn graph() -> DocumentStore {
        let store = store();
        for guid in ["a", "b", "c", "d", "e", "lonely"] {
            person(&store, guid);
        }
        link(&store, "ab", "a", "b");
        link(&store, "bc", "b", "c");
        link(&store, "cd", "c", "d");
        link(&store, "ac", "a", "c");
        link(&store, "de", "d", "e");
        link(&store, "ea", "e", "a");
        store
    }

    fn traversal(store: &DocumentStore) -> Traversal<'_, DocumentStore> {
        Traversal::new(
            store,
            HopFilter::default(),
            Snapshot::Current,
            Deadline::unbounded(),
        )
    }

    fn sorted<'g>(guids: impl Iterator<Item = &'g Guid>) -> Vec<&'g str> {
        let mut out: Vec<&str> = guids.map(Guid::as_str).collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_depth_zero_is_seed_only() {
        let store = graph();
        let result = traversal(&store).neighborhood(&Guid::new("a"), 0).unwrap();
        assert_eq!(sorted(result.entity_guids()), vec!["a"]);
        assert!(result.relationships.is_empty());
    }

    #[test]
    fn test_depth_one_is_direct_neighbors() {
        let store = graph();
        let result = traversal(&store).neighborhood(&Guid::new("a"), 1).unwrap();
        assert_eq!(sorted(result.entity_guids()), vec!["a", "b", "c", "e"]);
        assert_eq!(sorted(result.relationship_guids()), vec!["ab", "ac", "ea"]);
    }

    #[test]
    fn test_cycles_terminate_and_dedup() {
        let store = graph();
        let result = traversal(&store).neighborhood(&Guid::new("a"), 40).unwrap();
        assert_eq!(sorted(result.entity_guids()), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(result.relationships.len(), 6);
    }

    #[test]
    fn test_unknown_seed() {
        let store = graph();
        let result = traversal(&store).neighborhood(&Guid::new("zz"), 1);
        assert!(matches!(result, Err(Error::NotKnown { .. })));
    }

    #[test]
    fn test_path_found_within_bound() {
        let store = graph();
        let result = traversal(&store)
            .linking(&Guid::new("b"), &Guid::new("d"), 2)
            .unwrap();
        assert_eq!(sorted(result.relationship_guids()), vec!["bc", "cd"]);
        assert_eq!(sorted(result.entity_guids()), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_path_collects_every_route() {
        let store = graph();
        let result = traversal(&store)
            .linking(&Guid::new("a"), &Guid::new("c"), 2)
            .unwrap();
        assert_eq!(sorted(result.relationship_guids()), vec!["ab", "ac", "bc"]);
    }

    #[test]
    fn test_path_beyond_bound_is_empty() {
        let store = graph();
        let result = traversal(&store)
            .linking(&Guid::new("b"), &Guid::new("e"), 1)
            .unwrap();
        assert!(result.is_empty());
        let far = traversal(&store)
            .linking(&Guid::new("b"), &Guid::new("lonely"), 40)
            .unwrap();
        assert!(far.is_empty());
    }

    #[test]
    fn test_path_reuses_shallower_visit() {
        // From b, d is two hops away through c; e is three (b-a-e is two).
        let store = graph();
        let result = traversal(&store)
            .linking(&Guid::new("b"), &Guid::new("e"), 2)
            .unwrap();
        assert_eq!(sorted(result.relationship_guids()), vec!["ab", "ea"]);
    }

    #[test]
    fn test_expired_deadline_gives_timeout() {
        let store = graph();
        let expired = Deadline::after(Duration::ZERO);
        let result = Traversal::new(&store, HopFilter::default(), Snapshot::Current, expired)
            .neighborhood(&Guid::new("a"), 2);
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_negative_depth_uses_cap() {
        assert_eq!(NeighborhoodRequest::new(-1).depth_limit(40), 40);
        assert_eq!(NeighborhoodRequest::new(3).depth_limit(40), 3);
        assert_eq!(NeighborhoodRequest::new(99).depth_limit(40), 40);
    }
}
