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

//! Repository ingestion
//!
//! Resolves a repository to a commit id, detects languages and splits
//! source files into line-window chunks. Ingestion is the only fatal
//! phase of a run.

use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use repograph_core::{detect_language, Chunk};
use repograph_quality::SourceTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directories never descended into
const SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "target",
    "node_modules",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

/// Files larger than this are skipped
const MAX_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Repo-relative, `/`-separated
    pub path: String,
    pub language: String,
    pub line_count: u32,
}

/// Everything later phases need from the repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestedRepo {
    pub root: PathBuf,
    pub commit_sha: String,
    pub files: Vec<SourceFile>,
    pub chunks: Vec<Chunk>,
    /// Language tag -> file count
    pub languages: BTreeMap<String, usize>,
}

impl IngestedRepo {
    /// Build from pre-chunked input, deriving files and languages
    pub fn from_chunks(commit_sha: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        let mut files: BTreeMap<String, SourceFile> = BTreeMap::new();
        for chunk in &chunks {
            let entry = files
                .entry(chunk.file_path.clone())
                .or_insert_with(|| SourceFile {
                    path: chunk.file_path.clone(),
                    language: chunk.language.clone(),
                    line_count: 0,
                });
            entry.line_count = entry.line_count.max(chunk.end_line);
        }
        let mut languages = BTreeMap::new();
        for file in files.values() {
            *languages.entry(file.language.clone()).or_insert(0) += 1;
        }
        Self {
            root: PathBuf::new(),
            commit_sha: commit_sha.into(),
            files: files.into_values().collect(),
            chunks,
            languages,
        }
    }

    /// Line counts per file, for citation checks
    pub fn source_tree(&self) -> SourceTree {
        self.files
            .iter()
            .map(|f| (f.path.clone(), f.line_count))
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Resolves a project to its commit and chunk set
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(&self, project_id: &str) -> PipelineResult<IngestedRepo>;
}

/// Serves a fixed chunk set; used when chunks come from elsewhere
pub struct MemoryIngestor {
    repo: IngestedRepo,
}

impl MemoryIngestor {
    pub fn new(commit_sha: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        Self {
            repo: IngestedRepo::from_chunks(commit_sha, chunks),
        }
    }
}

#[async_trait]
impl Ingestor for MemoryIngestor {
    async fn ingest(&self, _project_id: &str) -> PipelineResult<IngestedRepo> {
        Ok(self.repo.clone())
    }
}

/// Walks a local checkout
pub struct LocalIngestor {
    root: PathBuf,
    chunk_max_lines: usize,
}

impl LocalIngestor {
    pub fn new(root: impl Into<PathBuf>, chunk_max_lines: usize) -> Self {
        Self {
            root: root.into(),
            chunk_max_lines: chunk_max_lines.max(1),
        }
    }
}

#[async_trait]
impl Ingestor for LocalIngestor {
    async fn ingest(&self, project_id: &str) -> PipelineResult<IngestedRepo> {
        let root = self.root.clone();
        let max_lines = self.chunk_max_lines;
        let repo = tokio::task::spawn_blocking(move || scan_repository(&root, max_lines))
            .await
            .map_err(|e| PipelineError::Ingestion(format!("scan task failed: {e}")))??;

        tracing::info!(
            project = %project_id,
            commit = %repo.commit_sha,
            files = repo.files.len(),
            chunks = repo.chunks.len(),
            "Repository ingested"
        );
        Ok(repo)
    }
}

fn scan_repository(root: &Path, max_lines: usize) -> PipelineResult<IngestedRepo> {
    if !root.is_dir() {
        return Err(PipelineError::Ingestion(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && e.file_name()
                    .to_str()
                    .map(|name| SKIP_DIRS.contains(&name))
                    .unwrap_or(false))
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.metadata().map(|m| m.len() <= MAX_FILE_BYTES).unwrap_or(false))
        .map(|e| e.into_path())
        .collect();
    // Deterministic chunk order
    paths.sort();

    let mut files = Vec::new();
    let mut chunks = Vec::new();
    let mut languages = BTreeMap::new();
    let mut hasher = blake3::Hasher::new();

    for path in paths {
        let Some(relative) = relative_path(root, &path) else {
            continue;
        };
        let Some(language) = detect_language(&relative) else {
            continue;
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(file = %relative, error = %e, "Skipping unreadable file");
                continue;
            }
        };
        if content.trim().is_empty() {
            continue;
        }

        hasher.update(relative.as_bytes());
        hasher.update(&[0]);
        hasher.update(content.as_bytes());

        let file_chunks = chunk_lines(&relative, language, &content, max_lines);
        let line_count = file_chunks.last().map(|c| c.end_line).unwrap_or(0);
        *languages.entry(language.to_string()).or_insert(0) += 1;
        files.push(SourceFile {
            path: relative,
            language: language.to_string(),
            line_count,
        });
        chunks.extend(file_chunks);
    }

    let commit_sha = read_git_head(root)
        .unwrap_or_else(|| format!("content-{}", &hex::encode(hasher.finalize().as_bytes())[..16]));

    Ok(IngestedRepo {
        root: root.to_path_buf(),
        commit_sha,
        files,
        chunks,
        languages,
    })
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

/// Split a file into windows of at most `max_lines` lines
pub fn chunk_lines(path: &str, language: &str, content: &str, max_lines: usize) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    lines
        .chunks(max_lines.max(1))
        .enumerate()
        .map(|(idx, window)| {
            let start = (idx * max_lines.max(1)) as u32 + 1;
            let end = start + window.len() as u32 - 1;
            Chunk::new(path, language, start, end, window.join("\n"))
        })
        .collect()
}

/// Current commit from `.git/HEAD`, following one level of ref
fn read_git_head(root: &Path) -> Option<String> {
    let git_dir = root.join(".git");
    let head = std::fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let head = head.trim();

    let Some(reference) = head.strip_prefix("ref: ") else {
        return is_sha(head).then(|| head.to_string());
    };
    if let Ok(sha) = std::fs::read_to_string(git_dir.join(reference)) {
        let sha = sha.trim();
        if is_sha(sha) {
            return Some(sha.to_string());
        }
    }
    let packed = std::fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed.lines().find_map(|line| {
        let (sha, name) = line.split_once(' ')?;
        (name == reference && is_sha(sha)).then(|| sha.to_string())
    })
}

fn is_sha(s: &str) -> bool {
    s.len() >= 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_chunk_lines_windows() {
        let content = (1..=7).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunk_lines("a.py", "python", &content, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
        assert_eq!((chunks[2].start_line, chunks[2].end_line), (7, 7));
        assert_eq!(chunks[1].content, "line4\nline5\nline6");
    }

    #[tokio::test]
    async fn test_local_ingest_skips_build_dirs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/app.py", "def greet():\n    return 'hi'\n");
        write(dir.path(), "node_modules/lib/index.js", "module.exports = {}\n");
        write(dir.path(), "target/debug/gen.rs", "fn main() {}\n");
        write(dir.path(), "README", "no extension\n");

        let repo = LocalIngestor::new(dir.path(), 50).ingest("p").await.unwrap();
        let paths: Vec<_> = repo.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/app.py"]);
        assert_eq!(repo.languages.get("python"), Some(&1));
        assert_eq!(repo.source_tree().get("src/app.py"), Some(&2));
        assert!(repo.commit_sha.starts_with("content-"));
    }

    #[tokio::test]
    async fn test_commit_from_git_head() {
        let dir = TempDir::new().unwrap();
        let sha = "a".repeat(40);
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main\n");
        write(dir.path(), ".git/refs/heads/main", &format!("{sha}\n"));
        write(dir.path(), "main.go", "package main\n");

        let repo = LocalIngestor::new(dir.path(), 50).ingest("p").await.unwrap();
        assert_eq!(repo.commit_sha, sha);
        assert_eq!(repo.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_root_is_ingestion_error() {
        let result = LocalIngestor::new("/definitely/not/here", 50).ingest("p").await;
        assert!(matches!(result, Err(PipelineError::Ingestion(_))));
    }

    #[test]
    fn test_from_chunks_derives_files() {
        let repo = IngestedRepo::from_chunks(
            "c1",
            vec![
                Chunk::new("a.py", "python", 1, 10, "x"),
                Chunk::new("a.py", "python", 11, 14, "y"),
                Chunk::new("b.rs", "rust", 1, 3, "z"),
            ],
        );
        assert_eq!(repo.file_count(), 2);
        assert_eq!(repo.source_tree().get("a.py"), Some(&14));
    }
}
