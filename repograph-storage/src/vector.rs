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

//! Code chunk vector index

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One indexed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub file_path: String,
    #[serde(default)]
    pub symbol_name: Option<String>,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub embedding: Vec<f32>,
}

/// A query hit; lower distance is closer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub file_path: String,
    #[serde(default)]
    pub symbol_name: Option<String>,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub distance: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace the indexed chunks for a project
    async fn upsert(&self, project_id: &str, records: Vec<VectorRecord>) -> StorageResult<()>;

    /// Nearest rows by cosine distance, at most `top_k`, none farther than
    /// `max_distance`, closest first
    async fn query(
        &self,
        project_id: &str,
        embedding: &[f32],
        top_k: usize,
        max_distance: f32,
    ) -> StorageResult<Vec<VectorHit>>;
}

/// Brute-force cosine index for development/testing
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    projects: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, project_id: &str) -> usize {
        self.projects
            .read()
            .get(project_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a < 1e-8 || norm_b < 1e-8 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, project_id: &str, records: Vec<VectorRecord>) -> StorageResult<()> {
        if let Some(first) = records.first() {
            let dim = first.embedding.len();
            if let Some(bad) = records.iter().find(|r| r.embedding.len() != dim) {
                return Err(StorageError::DimensionMismatch {
                    expected: dim,
                    actual: bad.embedding.len(),
                });
            }
        }
        self.projects
            .write()
            .insert(project_id.to_string(), records);
        Ok(())
    }

    async fn query(
        &self,
        project_id: &str,
        embedding: &[f32],
        top_k: usize,
        max_distance: f32,
    ) -> StorageResult<Vec<VectorHit>> {
        let projects = self.projects.read();
        let Some(records) = projects.get(project_id) else {
            return Ok(Vec::new());
        };
        if let Some(first) = records.first() {
            if first.embedding.len() != embedding.len() {
                return Err(StorageError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: embedding.len(),
                });
            }
        }

        let mut hits: Vec<VectorHit> = records
            .iter()
            .map(|r| (r, cosine_distance(&r.embedding, embedding)))
            .filter(|(_, distance)| *distance <= max_distance)
            .map(|(r, distance)| VectorHit {
                file_path: r.file_path.clone(),
                symbol_name: r.symbol_name.clone(),
                content: r.content.clone(),
                start_line: r.start_line,
                end_line: r.end_line,
                distance,
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(file: &str, line: u32, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            file_path: file.to_string(),
            symbol_name: None,
            content: format!("code in {file}"),
            start_line: line,
            end_line: line + 5,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_distance_and_caps() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(
                "p",
                vec![
                    rec("far.py", 1, vec![-1.0, 0.0]),
                    rec("near.py", 1, vec![1.0, 0.1]),
                    rec("mid.py", 1, vec![0.5, 0.5]),
                ],
            )
            .await
            .unwrap();

        let hits = index.query("p", &[1.0, 0.0], 10, 1.5).await.unwrap();
        let files: Vec<_> = hits.iter().map(|h| h.file_path.as_str()).collect();
        // far.py sits at distance 2.0, past the bound
        assert_eq!(files, vec!["near.py", "mid.py"]);

        let hits = index.query("p", &[1.0, 0.0], 1, 1.5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = MemoryVectorIndex::new();
        index.upsert("p", vec![rec("a.py", 1, vec![1.0, 0.0])]).await.unwrap();
        assert!(matches!(
            index.query("p", &[1.0, 0.0, 0.0], 5, 2.0).await,
            Err(StorageError::DimensionMismatch { .. })
        ));
        assert!(index.query("empty", &[1.0], 5, 2.0).await.unwrap().is_empty());
    }

    #[test]
    fn test_cosine_distance_bounds() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
