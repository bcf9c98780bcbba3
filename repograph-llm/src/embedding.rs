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

//! Embedding input preparation and batching.
//!
//! Token counts are estimated at four characters per token.

use crate::error::LlmResult;
use crate::guarded::GuardedModels;

/// Texts below this estimate are not embedded
pub const MIN_EMBED_TOKENS: usize = 10;
/// Per-text cap; longer texts are truncated
pub const MAX_EMBED_TOKENS: usize = 8_000;
/// Per-request cap across a batch
pub const MAX_BATCH_TOKENS: usize = 250_000;

const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Cut `text` to at most `max_tokens`, on a char boundary
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_bytes = max_tokens * CHARS_PER_TOKEN;
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Group prepared inputs (index, text) so no batch exceeds the token cap
pub fn plan_batches(texts: &[String]) -> Vec<Vec<(usize, String)>> {
    let mut batches = Vec::new();
    let mut current: Vec<(usize, String)> = Vec::new();
    let mut current_tokens = 0;

    for (index, text) in texts.iter().enumerate() {
        if estimate_tokens(text) < MIN_EMBED_TOKENS {
            continue;
        }
        let prepared = truncate_to_tokens(text, MAX_EMBED_TOKENS).to_string();
        let tokens = estimate_tokens(&prepared);
        if !current.is_empty() && current_tokens + tokens > MAX_BATCH_TOKENS {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push((index, prepared));
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Embed every text, leaving `None` where a text was too short to embed.
/// Any failed batch fails the whole call.
pub async fn embed_texts(
    models: &GuardedModels,
    texts: &[String],
) -> LlmResult<Vec<Option<Vec<f32>>>> {
    let mut out = vec![None; texts.len()];
    let batches = plan_batches(texts);
    tracing::debug!(texts = texts.len(), batches = batches.len(), "Embedding texts");

    for batch in batches {
        let (indices, inputs): (Vec<usize>, Vec<String>) = batch.into_iter().unzip();
        let vectors = models.embed(&inputs).await?;
        for (index, vector) in indices.into_iter().zip(vectors) {
            out[index] = Some(vector);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Completion, CompletionProvider, CompletionRequest, EmbeddingProvider};
    use crate::error::LlmError;
    use async_trait::async_trait;
    use repograph_core::resilience::Breakers;
    use repograph_core::AnalysisConfig;
    use std::sync::Arc;

    #[test]
    fn test_short_texts_are_skipped() {
        let texts = vec!["tiny".to_string(), "x".repeat(40)];
        let batches = plan_batches(&texts);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].0, 1);
    }

    #[test]
    fn test_long_texts_are_truncated() {
        let texts = vec!["y".repeat(40_000)];
        let batches = plan_batches(&texts);
        assert_eq!(batches[0][0].1.len(), MAX_EMBED_TOKENS * 4);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(20);
        let cut = truncate_to_tokens(&text, 3);
        assert!(cut.len() <= 12);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_batches_split_at_token_cap() {
        // 40 texts at the per-text cap: 8000 tokens each, 31 fit in one batch
        let texts: Vec<String> = (0..40).map(|_| "z".repeat(32_000)).collect();
        let batches = plan_batches(&texts);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 31);
        assert_eq!(batches[1].len(), 9);
        for batch in &batches {
            let tokens: usize = batch.iter().map(|(_, t)| estimate_tokens(t)).sum();
            assert!(tokens <= MAX_BATCH_TOKENS);
        }
    }

    struct NoCompletions;

    #[async_trait]
    impl CompletionProvider for NoCompletions {
        async fn complete(&self, _request: &CompletionRequest) -> LlmResult<Completion> {
            Err(LlmError::InvalidResponse("unused".into()))
        }
    }

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        async fn embed(&self, _model: &str, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_texts_keeps_positions() {
        let models = GuardedModels::new(
            Arc::new(NoCompletions),
            Arc::new(Breakers::default()),
            &AnalysisConfig::default(),
        )
        .with_embedding(Arc::new(LengthEmbedder));

        let texts = vec!["a".repeat(60), "ab".to_string(), "b".repeat(80)];
        let out = embed_texts(&models, &texts).await.unwrap();
        assert_eq!(out[0], Some(vec![60.0]));
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(vec![80.0]));
    }
}
