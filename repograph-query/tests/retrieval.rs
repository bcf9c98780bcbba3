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

use async_trait::async_trait;
use repograph_core::config::RetrievalConfig;
use repograph_core::resilience::Breakers;
use repograph_core::{
    confidence, AnalysisConfig, Confidence, EntityKind, GraphEntity, GraphSnapshot, Provenance,
};
use repograph_llm::{
    Completion, CompletionProvider, CompletionRequest, EmbeddingProvider, GuardedModels, LlmError,
    LlmResult, TokenUsage,
};
use repograph_query::{HybridRetriever, QueryError, QuestionAnswerer};
use repograph_storage::{
    MemoryPersistenceStore, MemoryVectorIndex, PersistenceStore, ProjectRecord, VectorIndex,
    VectorRecord,
};
use std::sync::Arc;

struct TopicEmbedding {
    fail: bool,
}

fn topic_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    vec![
        if text.contains("greet") { 1.0 } else { 0.0 },
        if text.contains("cart") { 1.0 } else { 0.0 },
        0.1,
    ]
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedding {
    async fn embed(&self, _model: &str, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        if self.fail {
            return Err(LlmError::Api {
                status: 503,
                message: "embedding service down".into(),
            });
        }
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }
}

struct FixedAnswer;

#[async_trait]
impl CompletionProvider for FixedAnswer {
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion> {
        Ok(Completion {
            content: "greet welcomes the user by name (app/greeter.py:1)".into(),
            model: request.model.clone(),
            usage: TokenUsage::default(),
        })
    }
}

fn entity(name: &str, file: &str, line: u32, value: f64) -> GraphEntity {
    GraphEntity {
        id: format!("{file}::{name}"),
        name: name.into(),
        kind: EntityKind::Function,
        file_path: file.into(),
        start_line: line,
        end_line: line + 1,
        language: "python".into(),
        signature: None,
        description: None,
        confidence: Confidence::new(value, Provenance::CrossValidated, ""),
    }
}

async fn stores() -> (Arc<MemoryPersistenceStore>, Arc<MemoryVectorIndex>) {
    let store = Arc::new(MemoryPersistenceStore::new());
    store
        .save(ProjectRecord {
            project_id: "shop".into(),
            commit_sha: "abc123".into(),
            sections: Vec::new(),
            graph: GraphSnapshot {
                entities: vec![
                    entity("greet", "app/greeter.py", 1, confidence::CROSS_VALIDATED),
                    entity("checkout", "app/cart.py", 10, confidence::CROSS_VALIDATED),
                    entity("login", "app/auth.py", 5, confidence::AST_ONLY),
                ],
                relationships: Vec::new(),
            },
            saved_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let vectors = Arc::new(MemoryVectorIndex::new());
    let chunk = |file: &str, start: u32, end: u32, content: &str| VectorRecord {
        file_path: file.into(),
        symbol_name: None,
        content: content.into(),
        start_line: start,
        end_line: end,
        embedding: topic_vector(content),
    };
    vectors
        .upsert(
            "shop",
            vec![
                chunk("app/greeter.py", 1, 2, "def greet(name): return 'hi'"),
                chunk("app/cart.py", 10, 20, "def checkout(cart): pass"),
            ],
        )
        .await
        .unwrap();
    (store, vectors)
}

fn models(fail_embedding: bool) -> Arc<GuardedModels> {
    let config = AnalysisConfig::default();
    Arc::new(
        GuardedModels::new(Arc::new(FixedAnswer), Arc::new(Breakers::default()), &config)
            .with_embedding(Arc::new(TopicEmbedding { fail: fail_embedding })),
    )
}

#[tokio::test]
async fn test_entity_in_both_lists_ranks_first() {
    let (store, vectors) = stores().await;
    let retriever = HybridRetriever::new(models(false), vectors, store, RetrievalConfig::default());

    let ctx = retriever.retrieve("shop", "How does greet work?").await.unwrap();
    assert!(!ctx.vector_degraded);
    assert_eq!(ctx.keywords, vec!["greet"]);
    assert_eq!(ctx.vector_hits[0].file_path, "app/greeter.py");
    let names: Vec<&str> = ctx.entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["greet", "checkout"]);
}

#[tokio::test]
async fn test_vector_failure_degrades_to_keywords() {
    let (store, vectors) = stores().await;
    let retriever = HybridRetriever::new(models(true), vectors, store, RetrievalConfig::default());

    let ctx = retriever.retrieve("shop", "Explain login and greet").await.unwrap();
    assert!(ctx.vector_degraded);
    assert!(ctx.vector_hits.is_empty());
    let names: Vec<&str> = ctx.entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["login", "greet"]);
}

#[tokio::test]
async fn test_result_count_is_capped() {
    let (store, vectors) = stores().await;
    let config = RetrievalConfig {
        max_results: 1,
        ..RetrievalConfig::default()
    };
    let retriever = HybridRetriever::new(models(false), vectors, store, config);

    let ctx = retriever.retrieve("shop", "greet and checkout in the cart").await.unwrap();
    assert_eq!(ctx.entities.len(), 1);
}

#[tokio::test]
async fn test_answer_is_grounded_and_confident() {
    let (store, vectors) = stores().await;
    let models = models(false);
    let retriever = HybridRetriever::new(Arc::clone(&models), vectors, store, RetrievalConfig::default());
    let answerer = QuestionAnswerer::new(retriever, models, 0.6);

    let answer = answerer.answer("shop", "  What does greet do?  ").await.unwrap();
    assert_eq!(answer.question, "What does greet do?");
    assert!(!answer.gated);
    assert!(answer.text.starts_with("greet welcomes"));
    assert!(answer.confidence > 0.6);
}

#[tokio::test]
async fn test_answer_rejects_empty_and_unknown() {
    let (store, vectors) = stores().await;
    let models = models(true);
    let retriever = HybridRetriever::new(Arc::clone(&models), vectors, store, RetrievalConfig::default());
    let answerer = QuestionAnswerer::new(retriever, models, 0.6);

    assert!(matches!(
        answerer.answer("shop", "   ").await,
        Err(QueryError::InvalidQuestion(_))
    ));
    assert!(matches!(
        answerer.answer("nowhere", "what does greet do").await,
        Err(QueryError::ProjectNotFound(_))
    ));
}

#[tokio::test]
async fn test_answer_without_matches_is_gated() {
    let (store, vectors) = stores().await;
    let models = models(true);
    let retriever = HybridRetriever::new(Arc::clone(&models), vectors, store, RetrievalConfig::default());
    let answerer = QuestionAnswerer::new(retriever, models, 0.6);

    let answer = answerer.answer("shop", "payroll taxes").await.unwrap();
    assert!(answer.gated);
    assert!(answer.text.starts_with("[Low confidence: 0.30] "));
}
