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

//! Final analysis output: generated sections and the knowledge graph.
//!
//! `save` replaces everything stored for the project, so re-running an
//! analysis leaves exactly one copy of each row.

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use repograph_core::{Citation, GraphEntity, GraphSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub section_name: String,
    pub title: String,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project_id: String,
    pub commit_sha: String,
    pub sections: Vec<SectionRecord>,
    pub graph: GraphSnapshot,
    pub saved_at: DateTime<Utc>,
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Clear prior rows for the project, then insert these
    async fn save(&self, record: ProjectRecord) -> StorageResult<()>;

    async fn load(&self, project_id: &str) -> StorageResult<Option<ProjectRecord>>;

    /// Entities whose name or path contains `query`, case-insensitively
    async fn search_entities(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> StorageResult<Vec<GraphEntity>>;
}

/// In-memory store for development/testing
#[derive(Debug, Default)]
pub struct MemoryPersistenceStore {
    projects: RwLock<HashMap<String, ProjectRecord>>,
}

impl MemoryPersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section_count(&self, project_id: &str) -> usize {
        self.projects
            .read()
            .get(project_id)
            .map(|p| p.sections.len())
            .unwrap_or(0)
    }

    pub fn entity_count(&self, project_id: &str) -> usize {
        self.projects
            .read()
            .get(project_id)
            .map(|p| p.graph.entities.len())
            .unwrap_or(0)
    }

    pub fn delete(&self, project_id: &str) -> bool {
        self.projects.write().remove(project_id).is_some()
    }
}

#[async_trait]
impl PersistenceStore for MemoryPersistenceStore {
    async fn save(&self, record: ProjectRecord) -> StorageResult<()> {
        tracing::debug!(
            project_id = %record.project_id,
            sections = record.sections.len(),
            entities = record.graph.entities.len(),
            relationships = record.graph.relationships.len(),
            "Saving analysis results"
        );
        let mut projects = self.projects.write();
        projects.remove(&record.project_id);
        projects.insert(record.project_id.clone(), record);
        Ok(())
    }

    async fn load(&self, project_id: &str) -> StorageResult<Option<ProjectRecord>> {
        Ok(self.projects.read().get(project_id).cloned())
    }

    async fn search_entities(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> StorageResult<Vec<GraphEntity>> {
        let projects = self.projects.read();
        let Some(project) = projects.get(project_id) else {
            return Ok(Vec::new());
        };
        let q = query.to_lowercase();
        Ok(project
            .graph
            .entities
            .iter()
            .filter(|e| {
                q.is_empty()
                    || e.name.to_lowercase().contains(&q)
                    || e.file_path.to_lowercase().contains(&q)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
