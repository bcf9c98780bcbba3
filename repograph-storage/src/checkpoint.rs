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

//! Chunk analysis checkpoints.
//!
//! One record per (project, commit, fingerprint). Records are written once
//! and never mutated; a second `put` for the same key keeps the first.
//! Lookups ignore the commit and return the newest record for the
//! fingerprint, so an unchanged chunk is reused across commits.

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use repograph_core::Fingerprint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub project_id: String,
    pub commit_sha: String,
    pub fingerprint: Fingerprint,
    pub file_path: String,
    /// Serialized chunk analysis; decoding is the reader's concern
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(
        &self,
        project_id: &str,
        fingerprint: &Fingerprint,
    ) -> StorageResult<Option<serde_json::Value>>;

    async fn put(
        &self,
        project_id: &str,
        commit_sha: &str,
        fingerprint: &Fingerprint,
        file_path: &str,
        result: serde_json::Value,
    ) -> StorageResult<()>;

    async fn count(&self, project_id: &str) -> StorageResult<usize>;

    /// Drop every checkpoint of a project, returning how many were removed
    async fn invalidate(&self, project_id: &str) -> StorageResult<usize>;
}

/// In-memory store for development/testing
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: DashMap<(String, Fingerprint), Vec<CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(
        &self,
        project_id: &str,
        fingerprint: &Fingerprint,
    ) -> StorageResult<Option<serde_json::Value>> {
        let key = (project_id.to_string(), fingerprint.clone());
        Ok(self
            .records
            .get(&key)
            .and_then(|records| records.last().map(|r| r.result.clone())))
    }

    async fn put(
        &self,
        project_id: &str,
        commit_sha: &str,
        fingerprint: &Fingerprint,
        file_path: &str,
        result: serde_json::Value,
    ) -> StorageResult<()> {
        let mut records = self
            .records
            .entry((project_id.to_string(), fingerprint.clone()))
            .or_default();
        if records.iter().any(|r| r.commit_sha == commit_sha) {
            return Ok(());
        }
        records.push(CheckpointRecord {
            project_id: project_id.to_string(),
            commit_sha: commit_sha.to_string(),
            fingerprint: fingerprint.clone(),
            file_path: file_path.to_string(),
            result,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn count(&self, project_id: &str) -> StorageResult<usize> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == project_id)
            .map(|entry| entry.value().len())
            .sum())
    }

    async fn invalidate(&self, project_id: &str) -> StorageResult<usize> {
        let mut removed = 0;
        self.records.retain(|(project, _), records| {
            if project == project_id {
                removed += records.len();
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}

/// JSON files under `<root>/<project>/<fingerprint>/<commit>.json`, where
/// every component is the blake3 hex digest of the raw id. Digests never
/// collide in practice and can never name `.`, `..` or the root itself.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(path_component(project_id))
    }

    fn fingerprint_dir(&self, project_id: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.project_dir(project_id)
            .join(path_component(fingerprint.as_str()))
    }

    fn record_path(&self, project_id: &str, commit_sha: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.fingerprint_dir(project_id, fingerprint)
            .join(format!("{}.json", path_component(commit_sha)))
    }

    async fn read_records(dir: &Path) -> StorageResult<Vec<CheckpointRecord>> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = tokio::fs::read_to_string(&path).await?;
                match serde_json::from_str::<CheckpointRecord>(&content) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint");
                    }
                }
            }
        }
        Ok(records)
    }
}

/// Map an arbitrary id to a single, fixed-length path component
fn path_component(id: &str) -> String {
    blake3::hash(id.as_bytes()).to_hex().to_string()
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(
        &self,
        project_id: &str,
        fingerprint: &Fingerprint,
    ) -> StorageResult<Option<serde_json::Value>> {
        let dir = self.fingerprint_dir(project_id, fingerprint);
        let records = Self::read_records(&dir).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.project_id == project_id && &r.fingerprint == fingerprint)
            .max_by_key(|r| r.created_at)
            .map(|r| r.result))
    }

    async fn put(
        &self,
        project_id: &str,
        commit_sha: &str,
        fingerprint: &Fingerprint,
        file_path: &str,
        result: serde_json::Value,
    ) -> StorageResult<()> {
        let dir = self.fingerprint_dir(project_id, fingerprint);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.record_path(project_id, commit_sha, fingerprint);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }

        let record = CheckpointRecord {
            project_id: project_id.to_string(),
            commit_sha: commit_sha.to_string(),
            fingerprint: fingerprint.clone(),
            file_path: file_path.to_string(),
            result,
            created_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&record)?;

        // Write-then-rename so readers never see a partial record
        let tmp = dir.join(format!("{}.json.tmp", path_component(commit_sha)));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn count(&self, project_id: &str) -> StorageResult<usize> {
        let project_dir = self.project_dir(project_id);
        let mut entries = match tokio::fs::read_dir(&project_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut total = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                total += Self::read_records(&entry.path()).await?.len();
            }
        }
        Ok(total)
    }

    async fn invalidate(&self, project_id: &str) -> StorageResult<usize> {
        let removed = self.count(project_id).await?;
        match tokio::fs::remove_dir_all(self.project_dir(project_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(project_id, removed, "Invalidated checkpoints");
        Ok(removed)
    }
}
