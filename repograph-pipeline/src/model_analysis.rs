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

//! Checkpointed per-chunk model analysis
//!
//! Every analyzable chunk is looked up in the checkpoint store by
//! fingerprint first; only misses reach the completion provider. Fresh
//! results are written back best-effort. Chunk embeddings for retrieval
//! are computed afterwards, also best-effort.

use crate::progress::{Progress, StageEvent};
use futures::stream::{self, StreamExt};
use repograph_core::{
    Behavior, BusinessRule, Chunk, ChunkAnalysis, ConfidenceLevel, ModelAnalysis, Narrative,
    RiskIndicator, Severity,
};
use repograph_llm::{embed_texts, strip_code_fence, ChatMessage, GuardedModels, LlmError, LlmResult};
use repograph_storage::{CheckpointStore, VectorIndex, VectorRecord};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;

pub const MODEL_STAGE: &str = "model";

const SYSTEM_PROMPT: &str = "You are a senior software analyst. Read the code chunk and \
describe what it does for the business, which rules it enforces and which risks it carries. \
Respond with a single JSON object and nothing else.";

const RESPONSE_SHAPE: &str = r#"{
  "narrative": {
    "purpose": "one sentence",
    "behaviors": [{"description": "...", "line_start": 1, "line_end": 1}],
    "concepts": ["domain concept"],
    "confidence": "high|medium|low"
  },
  "business_rules": [{"rule_text": "...", "rule_type": "validation|pricing|workflow|access_control|data_constraint", "condition": "...", "consequence": "...", "line_start": 1, "line_end": 1, "confidence": "high|medium|low"}],
  "risks": [{"title": "...", "risk_type": "security|performance|reliability|maintainability", "severity": "critical|high|medium|low", "description": "...", "line": 1, "recommendations": ["..."], "confidence": "high|medium|low"}]
}"#;

/// Runs the model side of dual analysis
pub struct ModelAnalyzer {
    models: Arc<GuardedModels>,
    checkpoints: Arc<dyn CheckpointStore>,
    vectors: Option<Arc<dyn VectorIndex>>,
    max_concurrency: usize,
    progress: Progress,
}

impl ModelAnalyzer {
    pub fn new(
        models: Arc<GuardedModels>,
        checkpoints: Arc<dyn CheckpointStore>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            models,
            checkpoints,
            vectors: None,
            max_concurrency: max_concurrency.max(1),
            progress: Progress::disabled(),
        }
    }

    pub fn with_vector_index(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Analyze every analyzable chunk. When `deadline` passes, chunks
    /// still in flight are abandoned and the finished ones are returned.
    pub async fn analyze(
        &self,
        project_id: &str,
        commit_sha: &str,
        chunks: &[Chunk],
        deadline: Option<Instant>,
    ) -> ModelAnalysis {
        let analyzable: Vec<&Chunk> = chunks.iter().filter(|c| c.is_analyzable()).collect();
        let total = analyzable.len();
        let mut analysis = ModelAnalysis::default();
        let mut completed = 0usize;

        tracing::info!(
            project = %project_id,
            chunks = total,
            skipped = chunks.len() - total,
            "Starting model analysis"
        );

        let drive = async {
            let mut results = stream::iter(analyzable.iter().copied())
                .map(|chunk| self.analyze_chunk(project_id, commit_sha, chunk))
                .boxed()
                .buffer_unordered(self.max_concurrency);

            while let Some((chunk_analysis, from_checkpoint)) = results.next().await {
                if from_checkpoint {
                    analysis.checkpoint_hits += 1;
                }
                analysis.push(chunk_analysis);
                completed += 1;
                self.progress.emit(StageEvent::counted(
                    MODEL_STAGE,
                    completed,
                    total,
                    format!("Analyzed {completed}/{total} code chunks"),
                ));
            }
        };

        match deadline {
            Some(deadline) => {
                if tokio::time::timeout_at(deadline, drive).await.is_err() {
                    tracing::warn!(
                        project = %project_id,
                        completed,
                        total,
                        "Model analysis timed out, keeping partial results"
                    );
                }
            }
            None => drive.await,
        }

        if completed == total {
            self.index_chunks(project_id, &analyzable).await;
        }

        tracing::info!(
            project = %project_id,
            narratives = analysis.narratives.len(),
            rules = analysis.rules.len(),
            risks = analysis.risks.len(),
            checkpoint_hits = analysis.checkpoint_hits,
            degraded = analysis.degraded_chunks,
            "Model analysis finished"
        );
        analysis
    }

    /// Returns the analysis and whether it came from a checkpoint
    async fn analyze_chunk(
        &self,
        project_id: &str,
        commit_sha: &str,
        chunk: &Chunk,
    ) -> (ChunkAnalysis, bool) {
        let fingerprint = chunk.fingerprint();

        match self.checkpoints.get(project_id, &fingerprint).await {
            Ok(Some(value)) => match serde_json::from_value::<ChunkAnalysis>(value) {
                Ok(cached) => return (cached, true),
                Err(e) => {
                    tracing::debug!(chunk = %chunk.file_path, error = %e, "Unreadable checkpoint, re-analyzing");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(chunk = %chunk.file_path, error = %e, "Checkpoint lookup failed");
            }
        }

        match self.request_analysis(chunk).await {
            Ok(fresh) => {
                match serde_json::to_value(&fresh) {
                    Ok(value) => {
                        if let Err(e) = self
                            .checkpoints
                            .put(project_id, commit_sha, &fingerprint, &chunk.file_path, value)
                            .await
                        {
                            tracing::warn!(chunk = %chunk.file_path, error = %e, "Checkpoint write failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(chunk = %chunk.file_path, error = %e, "Checkpoint serialization failed");
                    }
                }
                (fresh, false)
            }
            Err(LlmError::InvalidResponse(reason)) => {
                tracing::warn!(chunk = %chunk.file_path, reason = %reason, "Unparseable model response");
                (ChunkAnalysis::parse_failed(&chunk.file_path), false)
            }
            Err(e) => {
                tracing::warn!(chunk = %chunk.file_path, error = %e, "Model analysis unavailable");
                (ChunkAnalysis::unavailable(&chunk.file_path), false)
            }
        }
    }

    async fn request_analysis(&self, chunk: &Chunk) -> LlmResult<ChunkAnalysis> {
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_prompt(chunk)),
        ];
        let completion = self.models.complete_with_fallback(&messages, true).await?;
        parse_chunk_analysis(&completion.content, chunk)
            .ok_or_else(|| LlmError::InvalidResponse(format!("model {} returned no usable JSON", completion.model)))
    }

    async fn index_chunks(&self, project_id: &str, chunks: &[&Chunk]) {
        let Some(vectors) = &self.vectors else {
            return;
        };
        if !self.models.has_embedding() || chunks.is_empty() {
            return;
        }

        let texts: Vec<String> = chunks
            .iter()
            .map(|c| format!("{}\n{}", c.file_path, c.content))
            .collect();
        let embeddings = match embed_texts(&self.models, &texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                tracing::warn!(project = %project_id, error = %e, "Chunk embedding failed, retrieval will be keyword-only");
                return;
            }
        };

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .filter_map(|(chunk, embedding)| {
                Some(VectorRecord {
                    file_path: chunk.file_path.clone(),
                    symbol_name: chunk.symbol_name.clone(),
                    content: chunk.content.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    embedding: embedding?,
                })
            })
            .collect();
        let count = records.len();
        match vectors.upsert(project_id, records).await {
            Ok(()) => tracing::debug!(project = %project_id, records = count, "Chunks indexed"),
            Err(e) => tracing::warn!(project = %project_id, error = %e, "Vector upsert failed"),
        }
    }
}

fn build_prompt(chunk: &Chunk) -> String {
    let numbered: String = chunk
        .content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:>5} | {}\n", chunk.start_line as usize + i, line))
        .collect();
    format!(
        "File: {}\nLanguage: {}\nLines: {}-{}\n\n```{}\n{}```\n\nReturn JSON shaped like:\n{}",
        chunk.file_path,
        chunk.language,
        chunk.start_line,
        chunk.end_line,
        chunk.language,
        numbered,
        RESPONSE_SHAPE
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNarrative {
    purpose: Option<String>,
    behaviors: Vec<Value>,
    concepts: Vec<Value>,
    domain_concepts: Vec<Value>,
    confidence: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAnalysis {
    narrative: Option<RawNarrative>,
    #[serde(flatten)]
    inline: RawNarrative,
    #[serde(alias = "rules")]
    business_rules: Vec<RawRule>,
    risks: Vec<RawRisk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRule {
    #[serde(alias = "rule", alias = "description")]
    rule_text: String,
    rule_type: String,
    condition: String,
    consequence: String,
    line_start: u32,
    line_end: u32,
    confidence: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRisk {
    title: String,
    risk_type: String,
    severity: Option<String>,
    description: String,
    line: u32,
    recommendations: Vec<String>,
    recommendation: Option<String>,
    confidence: Option<String>,
}

fn parse_confidence(raw: Option<&str>) -> ConfidenceLevel {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("high") => ConfidenceLevel::High,
        Some("low") => ConfidenceLevel::Low,
        _ => ConfidenceLevel::Medium,
    }
}

fn parse_severity(raw: Option<&str>) -> Severity {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("critical") => Severity::Critical,
        Some("high") => Severity::High,
        Some("low") => Severity::Low,
        _ => Severity::Medium,
    }
}

/// A concept is either a bare string or an object with a `name`
fn concept_name(value: &Value) -> Option<String> {
    let name = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map
            .get("name")
            .or_else(|| map.get("concept"))
            .and_then(Value::as_str)?,
        _ => return None,
    };
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn behavior(value: &Value) -> Option<Behavior> {
    match value {
        Value::String(s) => Some(Behavior {
            description: s.clone(),
            line_start: 0,
            line_end: 0,
        }),
        Value::Object(map) => {
            let description = map.get("description").and_then(Value::as_str)?.to_string();
            let line = |key: &str| map.get(key).and_then(Value::as_u64).unwrap_or(0) as u32;
            Some(Behavior {
                description,
                line_start: line("line_start"),
                line_end: line("line_end"),
            })
        }
        _ => None,
    }
}

/// Map a model response onto the combined analysis shape. `None` when
/// the text is not a JSON object or carries no purpose.
pub fn parse_chunk_analysis(text: &str, chunk: &Chunk) -> Option<ChunkAnalysis> {
    let raw: RawAnalysis = serde_json::from_str(strip_code_fence(text)).ok()?;
    let narrative = raw.narrative.unwrap_or(raw.inline);
    let purpose = narrative.purpose.filter(|p| !p.trim().is_empty())?;

    let concepts = narrative
        .concepts
        .iter()
        .chain(narrative.domain_concepts.iter())
        .filter_map(concept_name)
        .collect();
    let narrative = Narrative {
        file_path: chunk.file_path.clone(),
        purpose,
        behaviors: narrative.behaviors.iter().filter_map(behavior).collect(),
        concepts,
        confidence: parse_confidence(narrative.confidence.as_deref()),
    };

    let rules = raw
        .business_rules
        .into_iter()
        .filter(|r| !r.rule_text.trim().is_empty())
        .map(|r| BusinessRule {
            confidence: parse_confidence(r.confidence.as_deref()),
            rule_text: r.rule_text,
            rule_type: r.rule_type,
            condition: r.condition,
            consequence: r.consequence,
            file_path: chunk.file_path.clone(),
            line_start: r.line_start,
            line_end: r.line_end,
        })
        .collect();

    let risks = raw
        .risks
        .into_iter()
        .filter(|r| !r.title.trim().is_empty())
        .map(|mut r| {
            if let Some(single) = r.recommendation.take() {
                r.recommendations.push(single);
            }
            RiskIndicator {
                severity: parse_severity(r.severity.as_deref()),
                confidence: parse_confidence(r.confidence.as_deref()),
                title: r.title,
                risk_type: r.risk_type,
                description: r.description,
                file_path: chunk.file_path.clone(),
                line: r.line,
                recommendations: r.recommendations,
            }
        })
        .collect();

    Some(ChunkAnalysis {
        narrative,
        rules,
        risks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use repograph_core::resilience::Breakers;
    use repograph_core::AnalysisConfig;
    use repograph_llm::{Completion, CompletionProvider, CompletionRequest, EmbeddingProvider, TokenUsage};
    use repograph_storage::{MemoryCheckpointStore, MemoryVectorIndex};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GOOD: &str = r#"{"narrative": {"purpose": "Greets users by name", "behaviors": [{"description": "greet returns a greeting", "line_start": 1, "line_end": 2}], "domain_concepts": [{"name": "Greeting"}, "User"], "confidence": "high"}, "business_rules": [{"rule_text": "Names must be non-empty", "rule_type": "validation", "confidence": "medium"}], "risks": [{"title": "No input escaping", "severity": "HIGH", "recommendation": "Escape output"}]}"#;

    struct ScriptedProvider {
        calls: AtomicUsize,
        reply: Mutex<LlmResult<String>>,
    }

    impl ScriptedProvider {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: Mutex::new(Ok(text.to_string())),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &*self.reply.lock() {
                Ok(text) => Ok(Completion {
                    content: text.clone(),
                    model: request.model.clone(),
                    usage: TokenUsage::default(),
                }),
                Err(_) => Err(LlmError::Api {
                    status: 500,
                    message: "down".into(),
                }),
            }
        }
    }

    struct FixedEmbedding;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedding {
        async fn embed(&self, _model: &str, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn models(provider: Arc<ScriptedProvider>) -> Arc<GuardedModels> {
        let config = AnalysisConfig::default();
        Arc::new(GuardedModels::new(provider, Arc::new(Breakers::default()), &config))
    }

    fn chunk() -> Chunk {
        Chunk::new(
            "app/greeter.py",
            "python",
            1,
            2,
            "def greet(name):\n    return f'Hello {name}, welcome to the store'",
        )
    }

    #[test]
    fn test_parse_accepts_object_and_string_concepts() {
        let analysis = parse_chunk_analysis(GOOD, &chunk()).unwrap();
        assert_eq!(analysis.narrative.purpose, "Greets users by name");
        assert_eq!(analysis.narrative.concepts, vec!["Greeting", "User"]);
        assert_eq!(analysis.narrative.confidence, ConfidenceLevel::High);
        assert_eq!(analysis.rules[0].file_path, "app/greeter.py");
        assert_eq!(analysis.risks[0].severity, Severity::High);
        assert_eq!(analysis.risks[0].recommendations, vec!["Escape output"]);
    }

    #[test]
    fn test_parse_inline_narrative_and_fences() {
        let text = "```json\n{\"purpose\": \"Parses config\", \"concepts\": [\"Config\"]}\n```";
        let analysis = parse_chunk_analysis(text, &chunk()).unwrap();
        assert_eq!(analysis.narrative.purpose, "Parses config");
        assert_eq!(analysis.narrative.confidence, ConfidenceLevel::Medium);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_chunk_analysis("I think this code greets people.", &chunk()).is_none());
        assert!(parse_chunk_analysis("{\"risks\": []}", &chunk()).is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_hit_skips_provider() {
        let provider = ScriptedProvider::replying(GOOD);
        let store = Arc::new(MemoryCheckpointStore::new());
        let analyzer = ModelAnalyzer::new(models(Arc::clone(&provider)), store.clone(), 2);

        let first = analyzer.analyze("p", "c1", &[chunk()], None).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.checkpoint_hits, 0);

        let second = analyzer.analyze("p", "c1", &[chunk()], None).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.checkpoint_hits, 1);
        assert_eq!(first.narratives, second.narratives);
        assert_eq!(first.rules, second.rules);
        assert_eq!(first.risks, second.risks);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_a_miss() {
        let provider = ScriptedProvider::replying(GOOD);
        let store = Arc::new(MemoryCheckpointStore::new());
        store
            .put("p", "c0", &chunk().fingerprint(), "app/greeter.py", serde_json::json!({"bogus": true}))
            .await
            .unwrap();
        let analyzer = ModelAnalyzer::new(models(Arc::clone(&provider)), store, 1);

        let analysis = analyzer.analyze("p", "c1", &[chunk()], None).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.checkpoint_hits, 0);
        assert_eq!(analysis.narratives[0].purpose, "Greets users by name");
    }

    #[tokio::test]
    async fn test_unparseable_response_is_degraded_and_not_cached() {
        let provider = ScriptedProvider::replying("not json");
        let store = Arc::new(MemoryCheckpointStore::new());
        let analyzer = ModelAnalyzer::new(models(provider), store.clone(), 1);

        let analysis = analyzer.analyze("p", "c1", &[chunk()], None).await;
        assert_eq!(analysis.narratives[0].purpose, "Failed to parse response");
        assert_eq!(analysis.degraded_chunks, 1);
        assert_eq!(store.count("p").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_yields_unavailable() {
        let provider = ScriptedProvider::replying("");
        *provider.reply.lock() = Err(LlmError::Timeout(std::time::Duration::from_secs(1)));
        let analyzer = ModelAnalyzer::new(models(provider), Arc::new(MemoryCheckpointStore::new()), 1);

        let analysis = analyzer.analyze("p", "c1", &[chunk()], None).await;
        assert_eq!(analysis.narratives[0].purpose, "Analysis unavailable");
    }

    #[tokio::test]
    async fn test_non_analyzable_chunks_are_skipped() {
        let provider = ScriptedProvider::replying(GOOD);
        let analyzer = ModelAnalyzer::new(
            models(Arc::clone(&provider)),
            Arc::new(MemoryCheckpointStore::new()),
            1,
        );
        let readme = Chunk::new("README.md", "markdown", 1, 1, "# Store");
        let analysis = analyzer.analyze("p", "c1", &[readme], None).await;
        assert!(analysis.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chunks_are_embedded_when_available() {
        let provider = ScriptedProvider::replying(GOOD);
        let config = AnalysisConfig::default();
        let guarded = Arc::new(
            GuardedModels::new(provider, Arc::new(Breakers::default()), &config)
                .with_embedding(Arc::new(FixedEmbedding)),
        );
        let index = Arc::new(MemoryVectorIndex::new());
        let analyzer = ModelAnalyzer::new(guarded, Arc::new(MemoryCheckpointStore::new()), 1)
            .with_vector_index(index.clone());

        analyzer.analyze("p", "c1", &[chunk()], None).await;
        assert_eq!(index.len("p"), 1);
    }
}
