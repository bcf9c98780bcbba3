// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! In-memory knowledge graph.
//!
//! Entities live in a map keyed by id. Relationships are append-only, with
//! outgoing and incoming adjacency lists maintained on every insert, so
//! neighbour lookups never scan the edge list. Relationship targets may
//! name ids that are not in the graph (external modules and the like);
//! every traversal skips them.
//!
//! The graph is built once, single-threaded, and only read afterwards.

mod builder;
mod reasoning;

pub use builder::{build_intelligence_model, IntelligenceModel};
pub use reasoning::{InferredRisk, InferredRule, Purpose, ReasoningGraph, Workflow, WorkflowStep};

use crate::entity::{GraphEntity, GraphRelationship, RelationshipKind};
use crate::error::{CoreError, CoreResult};
use crate::facts::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Callers,
    Callees,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    entities: HashMap<String, GraphEntity>,
    relationships: Vec<GraphRelationship>,
    relationship_ids: HashSet<String>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    by_file: HashMap<String, Vec<String>>,
    by_name: HashMap<String, Vec<String>>,
}

/// Owned copy of the graph contents, for persistence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub entities: Vec<GraphEntity>,
    pub relationships: Vec<GraphRelationship>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entities: usize,
    pub relationships: usize,
    pub files: usize,
    pub dangling_targets: usize,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity, replacing any previous entity with the same id.
    pub fn add_entity(&mut self, entity: GraphEntity) -> CoreResult<()> {
        if entity.id.is_empty() || entity.name.is_empty() {
            return Err(CoreError::InvalidEntity {
                id: entity.id,
                reason: "id and name must be non-empty".into(),
            });
        }
        if !entity.confidence.is_valid() {
            return Err(CoreError::InvalidEntity {
                reason: format!("confidence {} outside [0, 1]", entity.confidence.value),
                id: entity.id,
            });
        }

        if !self.entities.contains_key(&entity.id) {
            self.by_file
                .entry(entity.file_path.clone())
                .or_default()
                .push(entity.id.clone());
            self.by_name
                .entry(entity.name.clone())
                .or_default()
                .push(entity.id.clone());
        }
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Append a relationship. Returns `false` if one with the same id exists.
    pub fn add_relationship(&mut self, rel: GraphRelationship) -> CoreResult<bool> {
        if rel.id.is_empty() || rel.source_id.is_empty() || rel.target_id.is_empty() {
            return Err(CoreError::InvalidRelationship {
                id: rel.id,
                reason: "id, source and target must be non-empty".into(),
            });
        }
        if !rel.weight.is_finite() || rel.weight < 0.0 {
            return Err(CoreError::InvalidRelationship {
                reason: format!("weight {} is not a non-negative number", rel.weight),
                id: rel.id,
            });
        }
        if !self.relationship_ids.insert(rel.id.clone()) {
            return Ok(false);
        }

        let idx = self.relationships.len();
        self.outgoing.entry(rel.source_id.clone()).or_default().push(idx);
        self.incoming.entry(rel.target_id.clone()).or_default().push(idx);
        self.relationships.push(rel);
        Ok(true)
    }

    pub fn entity(&self, id: &str) -> Option<&GraphEntity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &GraphEntity> {
        self.entities.values()
    }

    /// Entities ordered by id
    pub fn sorted_entities(&self) -> Vec<&GraphEntity> {
        let mut all: Vec<&GraphEntity> = self.entities.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn relationships(&self) -> &[GraphRelationship] {
        &self.relationships
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// Entities in `file_path`, in insertion order
    pub fn entities_in_file(&self, file_path: &str) -> Vec<&GraphEntity> {
        self.by_file
            .get(file_path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entities.get(id))
            .collect()
    }

    /// Entities named exactly `name`, in insertion order
    pub fn entities_named(&self, name: &str) -> Vec<&GraphEntity> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entities.get(id))
            .collect()
    }

    pub fn entities_of_kind(&self, kind: EntityKind) -> Vec<&GraphEntity> {
        let mut found: Vec<&GraphEntity> =
            self.entities.values().filter(|e| e.kind == kind).collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        found
    }

    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self.by_file.keys().map(String::as_str).collect();
        files.sort_unstable();
        files
    }

    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &GraphRelationship> {
        self.edges(&self.outgoing, id)
    }

    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &GraphRelationship> {
        self.edges(&self.incoming, id)
    }

    fn edges<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        id: &str,
    ) -> impl Iterator<Item = &'a GraphRelationship> + 'a {
        index
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(move |&idx| &self.relationships[idx])
    }

    /// Every relationship touching `id`, self-loops reported once
    pub fn relationships_for(&self, id: &str) -> Vec<&GraphRelationship> {
        let mut seen = HashSet::new();
        self.outgoing(id)
            .chain(self.incoming(id))
            .filter(|r| seen.insert(r.id.as_str()))
            .collect()
    }

    /// Entities that call `id`, up to `depth` hops away
    pub fn callers(&self, id: &str, depth: usize) -> Vec<&GraphEntity> {
        self.walk_calls(id, depth, Direction::Callers)
    }

    /// Entities called by `id`, up to `depth` hops away
    pub fn callees(&self, id: &str, depth: usize) -> Vec<&GraphEntity> {
        self.walk_calls(id, depth, Direction::Callees)
    }

    /// Breadth-first walk over `calls` edges. Each entity is reported at
    /// most once and the start entity never; dangling targets are skipped.
    fn walk_calls(&self, start: &str, max_depth: usize, dir: Direction) -> Vec<&GraphEntity> {
        let mut found = Vec::new();
        if max_depth == 0 {
            return found;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut frontier: VecDeque<(Option<&str>, usize)> = VecDeque::new();
        frontier.push_back((None, 0));

        while let Some((node, depth)) = frontier.pop_front() {
            let key = node.unwrap_or(start);
            let index = match dir {
                Direction::Callees => &self.outgoing,
                Direction::Callers => &self.incoming,
            };
            for rel in self.edges(index, key) {
                if rel.kind != RelationshipKind::Calls {
                    continue;
                }
                let next = match dir {
                    Direction::Callees => rel.target_id.as_str(),
                    Direction::Callers => rel.source_id.as_str(),
                };
                if next == start || !visited.insert(next) {
                    continue;
                }
                if let Some(entity) = self.entities.get(next) {
                    found.push(entity);
                    if depth + 1 < max_depth {
                        frontier.push_back((Some(next), depth + 1));
                    }
                }
            }
        }
        found
    }

    pub fn stats(&self) -> GraphStats {
        let dangling = self
            .incoming
            .keys()
            .filter(|target| !self.entities.contains_key(*target))
            .count();
        GraphStats {
            entities: self.entities.len(),
            relationships: self.relationships.len(),
            files: self.by_file.len(),
            dangling_targets: dangling,
        }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            entities: self.sorted_entities().into_iter().cloned().collect(),
            relationships: self.relationships.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{entity_id, Confidence, Provenance};

    fn func(file: &str, name: &str, start: u32, end: u32) -> GraphEntity {
        GraphEntity {
            id: entity_id(file, name),
            name: name.into(),
            kind: EntityKind::Function,
            file_path: file.into(),
            start_line: start,
            end_line: end,
            language: "python".into(),
            signature: None,
            description: None,
            confidence: Confidence::new(0.9, Provenance::Deterministic, ""),
        }
    }

    fn call(src: &str, tgt: &str) -> GraphRelationship {
        GraphRelationship::new(format!("call:{src}:{tgt}"), src, tgt, RelationshipKind::Calls)
    }

    fn graph_with(names: &[&str]) -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        for (i, n) in names.iter().enumerate() {
            g.add_entity(func("m.py", n, i as u32 * 10 + 1, i as u32 * 10 + 9))
                .unwrap();
        }
        g
    }

    fn names(found: Vec<&GraphEntity>) -> Vec<String> {
        found.into_iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn test_two_cycle_terminates_with_single_neighbor() {
        let mut g = graph_with(&["a", "b"]);
        g.add_relationship(call("m.py::a", "m.py::b")).unwrap();
        g.add_relationship(call("m.py::b", "m.py::a")).unwrap();

        assert_eq!(names(g.callees("m.py::a", 3)), vec!["b"]);
        assert_eq!(names(g.callers("m.py::a", 3)), vec!["b"]);
    }

    #[test]
    fn test_depth_limits_expansion() {
        let mut g = graph_with(&["a", "b", "c", "d"]);
        g.add_relationship(call("m.py::a", "m.py::b")).unwrap();
        g.add_relationship(call("m.py::b", "m.py::c")).unwrap();
        g.add_relationship(call("m.py::c", "m.py::d")).unwrap();

        assert_eq!(names(g.callees("m.py::a", 1)), vec!["b"]);
        assert_eq!(names(g.callees("m.py::a", 2)), vec!["b", "c"]);
        assert_eq!(names(g.callers("m.py::d", 10)), vec!["c", "b", "a"]);
        assert!(g.callees("m.py::a", 0).is_empty());
    }

    #[test]
    fn test_diamond_reports_each_entity_once() {
        let mut g = graph_with(&["a", "b", "c", "d"]);
        g.add_relationship(call("m.py::a", "m.py::b")).unwrap();
        g.add_relationship(call("m.py::a", "m.py::c")).unwrap();
        g.add_relationship(call("m.py::b", "m.py::d")).unwrap();
        g.add_relationship(call("m.py::c", "m.py::d")).unwrap();

        assert_eq!(names(g.callees("m.py::a", 5)), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_dangling_targets_are_skipped() {
        let mut g = graph_with(&["a"]);
        g.add_relationship(call("m.py::a", "requests.get")).unwrap();
        g.add_relationship(GraphRelationship::new(
            "import:m.py::a:os",
            "m.py::a",
            "os",
            RelationshipKind::Imports,
        ))
        .unwrap();

        assert!(g.callees("m.py::a", 3).is_empty());
        assert_eq!(g.relationships_for("m.py::a").len(), 2);
        assert_eq!(g.stats().dangling_targets, 2);
    }

    #[test]
    fn test_non_call_edges_are_not_traversed() {
        let mut g = graph_with(&["a", "b"]);
        g.add_relationship(GraphRelationship::new(
            "uses:a:b",
            "m.py::a",
            "m.py::b",
            RelationshipKind::Uses,
        ))
        .unwrap();
        assert!(g.callees("m.py::a", 2).is_empty());
    }

    #[test]
    fn test_self_loop_reported_once() {
        let mut g = graph_with(&["rec"]);
        g.add_relationship(call("m.py::rec", "m.py::rec")).unwrap();
        assert_eq!(g.relationships_for("m.py::rec").len(), 1);
        assert!(g.callees("m.py::rec", 4).is_empty());
    }

    #[test]
    fn test_duplicate_relationship_ids_ignored() {
        let mut g = graph_with(&["a", "b"]);
        assert!(g.add_relationship(call("m.py::a", "m.py::b")).unwrap());
        assert!(!g.add_relationship(call("m.py::a", "m.py::b")).unwrap());
        assert_eq!(g.relationship_count(), 1);
    }

    #[test]
    fn test_invalid_entities_rejected() {
        let mut g = KnowledgeGraph::new();
        let mut bad = func("m.py", "a", 1, 2);
        bad.confidence.value = 1.5;
        assert!(g.add_entity(bad).is_err());

        let mut unnamed = func("m.py", "a", 1, 2);
        unnamed.id.clear();
        assert!(g.add_entity(unnamed).is_err());
    }

    #[test]
    fn test_replace_keeps_indices_unique() {
        let mut g = KnowledgeGraph::new();
        g.add_entity(func("m.py", "a", 1, 2)).unwrap();
        g.add_entity(func("m.py", "a", 1, 5)).unwrap();
        assert_eq!(g.entity_count(), 1);
        assert_eq!(g.entities_in_file("m.py").len(), 1);
        assert_eq!(g.entity("m.py::a").unwrap().end_line, 5);
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let n = 50_000;
        let mut g = KnowledgeGraph::new();
        for i in 0..n {
            g.add_entity(func("chain.py", &format!("f{i}"), 1, 1)).unwrap();
        }
        for i in 0..n - 1 {
            g.add_relationship(call(&format!("chain.py::f{i}"), &format!("chain.py::f{}", i + 1)))
                .unwrap();
        }
        assert_eq!(g.callees("chain.py::f0", n).len(), n - 1);
    }
}
