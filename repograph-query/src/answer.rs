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

//! Question answering grounded in retrieved repository context

use crate::context::format_context;
use crate::error::{QueryError, QueryResult};
use crate::retriever::HybridRetriever;
use repograph_llm::{ChatMessage, GuardedModels};
use repograph_quality::{gate_low_confidence_output, validate_chat_input};
use serde::Serialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You answer questions about a software repository. \
Use only the provided context. Cite files as path:line. \
If the context does not contain the answer, say so.";

/// Confidence assigned when nothing was retrieved
const NO_CONTEXT_CONFIDENCE: f64 = 0.3;
/// Confidence when only unresolved code snippets were retrieved
const SNIPPETS_ONLY_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub confidence: f64,
    /// Text carries the low-confidence prefix
    pub gated: bool,
    pub entities_used: usize,
    pub snippets_used: usize,
    pub vector_degraded: bool,
}

pub struct QuestionAnswerer {
    retriever: HybridRetriever,
    models: Arc<GuardedModels>,
    low_confidence_threshold: f64,
}

impl QuestionAnswerer {
    pub fn new(retriever: HybridRetriever, models: Arc<GuardedModels>, low_confidence_threshold: f64) -> Self {
        Self {
            retriever,
            models,
            low_confidence_threshold,
        }
    }

    pub async fn answer(&self, project_id: &str, question: &str) -> QueryResult<Answer> {
        let question = validate_chat_input(question)?;
        let retrieved = self.retriever.retrieve(project_id, &question).await?;
        let config = self.retriever.config();
        let context = format_context(&retrieved, config.snippet_chars, config.max_context_chars);

        if retrieved.is_empty() && !self.retriever.has_project(project_id).await? {
            return Err(QueryError::ProjectNotFound(project_id.to_string()));
        }

        let confidence = if retrieved.entities.is_empty() {
            if retrieved.vector_hits.is_empty() {
                NO_CONTEXT_CONFIDENCE
            } else {
                SNIPPETS_ONLY_CONFIDENCE
            }
        } else {
            retrieved
                .entities
                .iter()
                .map(|e| e.confidence.value)
                .sum::<f64>()
                / retrieved.entities.len() as f64
        };

        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(format!("# Context\n\n{context}\n\n# Question\n\n{question}")),
        ];
        let completion = self.models.complete_with_fallback(&messages, false).await?;
        let (text, gated) =
            gate_low_confidence_output(completion.content.trim(), confidence, self.low_confidence_threshold);

        tracing::info!(
            project = %project_id,
            confidence,
            entities = retrieved.entities.len(),
            snippets = retrieved.vector_hits.len(),
            "Answered question"
        );
        Ok(Answer {
            question,
            text,
            confidence,
            gated,
            entities_used: retrieved.entities.len(),
            snippets_used: retrieved.vector_hits.len(),
            vector_degraded: retrieved.vector_degraded,
        })
    }
}
