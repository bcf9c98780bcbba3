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

//! Hybrid retriever
//!
//! Vector search over indexed chunks and keyword search over persisted
//! graph entities run independently and are fused with RRF. Vector search
//! is best-effort: any embedding or index failure leaves that side empty
//! and the query proceeds on keywords alone.

use crate::error::QueryResult;
use crate::keywords::extract_keywords;
use crate::rrf::reciprocal_rank_fusion;
use moka::sync::Cache;
use repograph_core::config::RetrievalConfig;
use repograph_core::resilience::CircuitError;
use repograph_core::GraphEntity;
use repograph_llm::GuardedModels;
use repograph_storage::{PersistenceStore, VectorHit, VectorIndex};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Breaker target for vector index queries
pub const VECTOR_TARGET: &str = "vector_index";

const EMBEDDING_CACHE_CAPACITY: u64 = 1_000;
const EMBEDDING_CACHE_TTL: Duration = Duration::from_secs(600);

/// Composite identifier shared by both result lists
pub fn result_id(file_path: &str, start_line: u32) -> String {
    format!("{file_path}:{start_line}")
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievedContext {
    pub keywords: Vec<String>,
    pub vector_hits: Vec<VectorHit>,
    /// Fused entity ranking, best first
    pub entities: Vec<GraphEntity>,
    /// Vector search was attempted and failed
    pub vector_degraded: bool,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.vector_hits.is_empty() && self.entities.is_empty()
    }
}

pub struct HybridRetriever {
    models: Arc<GuardedModels>,
    vectors: Arc<dyn VectorIndex>,
    store: Arc<dyn PersistenceStore>,
    config: RetrievalConfig,
    /// Question text -> query embedding
    embeddings: Cache<String, Arc<Vec<f32>>>,
}

impl HybridRetriever {
    pub fn new(
        models: Arc<GuardedModels>,
        vectors: Arc<dyn VectorIndex>,
        store: Arc<dyn PersistenceStore>,
        config: RetrievalConfig,
    ) -> Self {
        let embeddings = Cache::builder()
            .max_capacity(EMBEDDING_CACHE_CAPACITY)
            .time_to_live(EMBEDDING_CACHE_TTL)
            .build();
        Self {
            models,
            vectors,
            store,
            config,
            embeddings,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn has_project(&self, project_id: &str) -> QueryResult<bool> {
        Ok(self.store.load(project_id).await?.is_some())
    }

    pub async fn retrieve(&self, project_id: &str, question: &str) -> QueryResult<RetrievedContext> {
        let keywords = extract_keywords(question);
        let (vector_hits, vector_degraded) = match self.vector_search(project_id, question).await {
            Ok(hits) => (hits, false),
            Err(reason) => {
                tracing::warn!(project = %project_id, error = %reason, "Vector search unavailable, using keywords only");
                (Vec::new(), true)
            }
        };
        let keyword_entities = self.keyword_search(project_id, &keywords).await?;

        // Vector hits are chunks; resolve each to the entities it covers
        let mut lookup: HashMap<String, GraphEntity> = HashMap::new();
        let mut vector_ids: Vec<String> = Vec::new();
        if !vector_hits.is_empty() {
            let record = self.store.load(project_id).await?;
            let entities = record.map(|r| r.graph.entities).unwrap_or_default();
            for hit in &vector_hits {
                let covered = resolve_hit(hit, &entities);
                if covered.is_empty() {
                    // Kept in the ranking so ranks stay honest; dropped on selection
                    vector_ids.push(result_id(&hit.file_path, hit.start_line));
                }
                for entity in covered {
                    let id = result_id(&entity.file_path, entity.start_line);
                    if !vector_ids.contains(&id) {
                        vector_ids.push(id.clone());
                    }
                    lookup.entry(id).or_insert_with(|| entity.clone());
                }
            }
        }

        let keyword_ids: Vec<String> = keyword_entities
            .iter()
            .map(|e| result_id(&e.file_path, e.start_line))
            .collect();
        for entity in &keyword_entities {
            lookup
                .entry(result_id(&entity.file_path, entity.start_line))
                .or_insert_with(|| entity.clone());
        }

        let fused = reciprocal_rank_fusion(&[vector_ids, keyword_ids.clone()], self.config.rrf_k);
        let limit = self.config.max_results;
        let mut selected: Vec<GraphEntity> = Vec::with_capacity(limit);
        let mut taken: HashSet<String> = HashSet::new();
        for (id, _) in fused {
            if selected.len() >= limit {
                break;
            }
            if let Some(entity) = lookup.get(&id) {
                taken.insert(id);
                selected.push(entity.clone());
            }
        }
        for (id, entity) in keyword_ids.iter().zip(&keyword_entities) {
            if selected.len() >= limit {
                break;
            }
            if taken.insert(id.clone()) {
                selected.push(entity.clone());
            }
        }

        tracing::debug!(
            project = %project_id,
            vector_hits = vector_hits.len(),
            keyword_hits = keyword_entities.len(),
            selected = selected.len(),
            "Hybrid retrieval"
        );
        Ok(RetrievedContext {
            keywords,
            vector_hits,
            entities: selected,
            vector_degraded,
        })
    }

    async fn query_embedding(&self, question: &str) -> Result<Arc<Vec<f32>>, String> {
        if let Some(cached) = self.embeddings.get(question) {
            return Ok(cached);
        }
        let mut vectors = self
            .models
            .embed(&[question.to_string()])
            .await
            .map_err(|e| e.to_string())?;
        let embedding = Arc::new(vectors.pop().ok_or("embedding provider returned nothing")?);
        self.embeddings
            .insert(question.to_string(), Arc::clone(&embedding));
        Ok(embedding)
    }

    async fn vector_search(&self, project_id: &str, question: &str) -> Result<Vec<VectorHit>, String> {
        if !self.models.has_embedding() {
            return Ok(Vec::new());
        }
        let embedding = self.query_embedding(question).await?;
        let breaker = self.models.breakers().vector.get(VECTOR_TARGET);
        let vectors = self.vectors.as_ref();
        let result = breaker
            .call(|| async move {
                vectors
                    .query(
                        project_id,
                        &embedding,
                        self.config.vector_top_k,
                        self.config.vector_distance_max,
                    )
                    .await
            })
            .await;
        match result {
            Ok(hits) => Ok(hits),
            Err(CircuitError::Open { target, retry_after }) => Err(format!(
                "circuit open for {target}, retry after {retry_after:?}"
            )),
            Err(CircuitError::Inner(e)) => Err(e.to_string()),
        }
    }

    /// Entities matching any keyword, most keywords matched first
    async fn keyword_search(&self, project_id: &str, keywords: &[String]) -> QueryResult<Vec<GraphEntity>> {
        let mut hits: Vec<(GraphEntity, usize)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for keyword in keywords {
            let found = self
                .store
                .search_entities(project_id, keyword, self.config.max_results * 2)
                .await?;
            for entity in found {
                match index.get(&entity.id) {
                    Some(&i) => hits[i].1 += 1,
                    None => {
                        index.insert(entity.id.clone(), hits.len());
                        hits.push((entity, 1));
                    }
                }
            }
        }
        // Stable sort keeps first-match order within equal counts
        hits.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(hits.into_iter().map(|(entity, _)| entity).collect())
    }
}

/// Entities of the hit's file covered by the hit's line range, the named
/// symbol first when the hit carries one
fn resolve_hit<'a>(hit: &VectorHit, entities: &'a [GraphEntity]) -> Vec<&'a GraphEntity> {
    let mut covered: Vec<&GraphEntity> = entities
        .iter()
        .filter(|e| e.file_path == hit.file_path)
        .filter(|e| e.start_line >= hit.start_line && e.start_line <= hit.end_line)
        .collect();
    covered.sort_by_key(|e| {
        let named = hit.symbol_name.as_deref() == Some(e.name.as_str());
        (!named, e.start_line)
    });
    covered
}

#[cfg(test)]
mod tests {
    use super::*;
    use repograph_core::{confidence, Confidence, EntityKind, Provenance};

    fn entity(name: &str, file: &str, line: u32) -> GraphEntity {
        GraphEntity {
            id: format!("{file}::{name}"),
            name: name.into(),
            kind: EntityKind::Function,
            file_path: file.into(),
            start_line: line,
            end_line: line + 3,
            language: "python".into(),
            signature: None,
            description: None,
            confidence: Confidence::new(confidence::AST_ONLY, Provenance::Deterministic, ""),
        }
    }

    fn hit(file: &str, start: u32, end: u32, symbol: Option<&str>) -> VectorHit {
        VectorHit {
            file_path: file.into(),
            symbol_name: symbol.map(String::from),
            content: String::new(),
            start_line: start,
            end_line: end,
            distance: 0.1,
        }
    }

    #[test]
    fn test_resolve_hit_prefers_named_symbol() {
        let entities = vec![
            entity("load", "a.py", 1),
            entity("save", "a.py", 10),
            entity("other", "b.py", 1),
        ];
        let covered = resolve_hit(&hit("a.py", 1, 20, Some("save")), &entities);
        let names: Vec<&str> = covered.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["save", "load"]);
    }

    #[test]
    fn test_resolve_hit_outside_any_entity() {
        let entities = vec![entity("load", "a.py", 50)];
        assert!(resolve_hit(&hit("a.py", 1, 20, None), &entities).is_empty());
    }
}
