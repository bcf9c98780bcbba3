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

//! Breaker-guarded completion and embedding calls.
//!
//! Completions: rate-limit responses are retried with jittered backoff and
//! never counted against the target's breaker; every other error counts
//! and is returned at once. Embeddings: every error counts, no retry.

use crate::client::{ChatMessage, Completion, CompletionProvider, CompletionRequest, EmbeddingProvider};
use crate::error::{LlmError, LlmResult};
use crate::usage::UsageTracker;
use repograph_core::resilience::{Breakers, CircuitError, Classify, Outcome, RetryPolicy};
use repograph_core::AnalysisConfig;
use std::sync::Arc;
use std::time::Duration;

pub struct GuardedModels {
    completion: Arc<dyn CompletionProvider>,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    breakers: Arc<Breakers>,
    retry: RetryPolicy,
    usage: Arc<UsageTracker>,
    model_chain: Vec<String>,
    embedding_model: String,
    max_output_tokens: u32,
    timeout: Duration,
}

impl GuardedModels {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        breakers: Arc<Breakers>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            completion,
            embedding: None,
            breakers,
            retry: RetryPolicy::from(&config.resilience.retry),
            usage: Arc::new(UsageTracker::new()),
            model_chain: config.llm.model_chain.clone(),
            embedding_model: config.llm.embedding_model.clone(),
            max_output_tokens: config.llm.max_output_tokens,
            timeout: config.llm_timeout(),
        }
    }

    pub fn with_embedding(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding = Some(provider);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_usage_tracker(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn breakers(&self) -> &Breakers {
        &self.breakers
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn model_chain(&self) -> &[String] {
        &self.model_chain
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    /// One guarded completion against a single target
    pub async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        timeout: Duration,
        json_mode: bool,
    ) -> LlmResult<Completion> {
        let breaker = self.breakers.completion.get(model);
        let request = CompletionRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            timeout,
            json_mode,
            max_output_tokens: self.max_output_tokens,
        };

        let breaker = breaker.as_ref();
        let request = &request;
        let provider = self.completion.as_ref();

        let result = self
            .retry
            .run(
                |_attempt| async move {
                    breaker
                        .call_classified(
                            || async move {
                                match tokio::time::timeout(request.timeout, provider.complete(request))
                                    .await
                                {
                                    Ok(result) => result,
                                    Err(_) => Err(LlmError::Timeout(request.timeout)),
                                }
                            },
                            |e: &LlmError| {
                                if e.is_rate_limited() {
                                    Outcome::Ignored
                                } else {
                                    Outcome::Failure
                                }
                            },
                        )
                        .await
                },
                |e: &CircuitError<LlmError>| matches!(e, CircuitError::Inner(LlmError::RateLimited)),
            )
            .await;

        match result {
            Ok(completion) => {
                self.usage.record(model, &completion.usage);
                Ok(completion)
            }
            Err(CircuitError::Open {
                target,
                retry_after,
            }) => Err(LlmError::CircuitOpen {
                target,
                retry_after,
            }),
            Err(CircuitError::Inner(e)) => Err(e),
        }
    }

    /// Try each model of the configured chain in order
    pub async fn complete_with_fallback(
        &self,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> LlmResult<Completion> {
        let mut attempted = Vec::with_capacity(self.model_chain.len());
        for model in &self.model_chain {
            attempted.push(model.clone());
            match self.complete(model, messages, self.timeout, json_mode).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_circuit_open() => {
                    tracing::warn!(model = %model, "Circuit open, trying next model");
                }
                Err(e) => {
                    tracing::warn!(
                        model = %model,
                        category = %e.category(),
                        error = %e,
                        "Completion failed, trying next model"
                    );
                }
            }
        }
        Err(LlmError::AllModelsFailed { attempted })
    }

    /// One guarded embedding call for a single pre-sized batch
    pub async fn embed(&self, texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
        let provider = self
            .embedding
            .as_ref()
            .ok_or(LlmError::EmbeddingUnavailable)?;
        let breaker = self.breakers.embedding.get(&self.embedding_model);
        let model = self.embedding_model.as_str();

        let result = breaker
            .call(|| async move {
                let vectors = provider.embed(model, texts).await?;
                if vectors.len() != texts.len() {
                    return Err(LlmError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        vectors.len()
                    )));
                }
                Ok(vectors)
            })
            .await;

        match result {
            Ok(vectors) => Ok(vectors),
            Err(CircuitError::Open {
                target,
                retry_after,
            }) => Err(LlmError::CircuitOpen {
                target,
                retry_after,
            }),
            Err(CircuitError::Inner(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TokenUsage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted responses per model, counting every invocation
    struct ScriptedProvider {
        script: Mutex<VecDeque<(String, LlmResult<String>)>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(steps: Vec<(&str, LlmResult<&str>)>) -> Self {
            Self {
                script: Mutex::new(
                    steps
                        .into_iter()
                        .map(|(m, r)| (m.to_string(), r.map(String::from)))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, request: &CompletionRequest) -> LlmResult<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (model, result) = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| (request.model.clone(), Ok("{}".to_string())));
            assert_eq!(model, request.model, "unexpected target");
            result.map(|content| Completion {
                content,
                model: request.model.clone(),
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                    cached_tokens: 0,
                },
            })
        }
    }

    fn boom() -> LlmError {
        LlmError::Api {
            status: 500,
            message: "upstream".into(),
        }
    }

    fn guarded(provider: Arc<ScriptedProvider>) -> GuardedModels {
        let mut config = AnalysisConfig::default();
        config.llm.model_chain = vec!["m/a".into(), "m/b".into()];
        GuardedModels::new(provider, Arc::new(Breakers::from_config(&config.resilience)), &config)
            .with_retry_policy(RetryPolicy::immediate(3))
    }

    fn msgs() -> Vec<ChatMessage> {
        vec![ChatMessage::user("hi")]
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold_without_provider_call() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..5).map(|_| ("m/a", Err(boom()))).collect(),
        ));
        let models = guarded(provider.clone());

        for _ in 0..5 {
            let err = models
                .complete("m/a", &msgs(), Duration::from_secs(5), true)
                .await
                .unwrap_err();
            assert!(matches!(err, LlmError::Api { status: 500, .. }));
        }
        assert_eq!(provider.calls(), 5);

        let err = models
            .complete("m/a", &msgs(), Duration::from_secs(5), true)
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(provider.calls(), 5);
    }

    #[tokio::test]
    async fn test_rate_limits_retry_and_never_count() {
        let mut steps: Vec<(&str, LlmResult<&str>)> = Vec::new();
        for _ in 0..4 {
            steps.push(("m/a", Err(LlmError::RateLimited)));
            steps.push(("m/a", Err(LlmError::RateLimited)));
            steps.push(("m/a", Ok("{\"ok\":true}")));
        }
        let provider = Arc::new(ScriptedProvider::new(steps));
        let models = guarded(provider.clone());

        for _ in 0..4 {
            let completion = models
                .complete("m/a", &msgs(), Duration::from_secs(5), true)
                .await
                .unwrap();
            assert_eq!(completion.content, "{\"ok\":true}");
        }
        assert_eq!(provider.calls(), 12);
        assert_eq!(models.breakers().completion.get("m/a").failure_count(), 0);
        assert_eq!(models.usage().usage("m/a").unwrap().calls, 4);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_surfaces() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..3).map(|_| ("m/a", Err(LlmError::RateLimited))).collect(),
        ));
        let models = guarded(provider.clone());
        let err = models
            .complete("m/a", &msgs(), Duration::from_secs(5), true)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![("m/a", Err(boom()))]));
        let models = guarded(provider.clone());
        assert!(models
            .complete("m/a", &msgs(), Duration::from_secs(5), true)
            .await
            .is_err());
        assert_eq!(provider.calls(), 1);
        assert_eq!(models.breakers().completion.get("m/a").failure_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_moves_down_the_chain() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ("m/a", Err(boom())),
            ("m/b", Ok("second")),
        ]));
        let models = guarded(provider);
        let completion = models.complete_with_fallback(&msgs(), false).await.unwrap();
        assert_eq!(completion.model, "m/b");
    }

    #[tokio::test]
    async fn test_fallback_reports_every_target() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ("m/a", Err(boom())),
            ("m/b", Err(boom())),
        ]));
        let models = guarded(provider);
        match models.complete_with_fallback(&msgs(), false).await {
            Err(LlmError::AllModelsFailed { attempted }) => {
                assert_eq!(attempted, vec!["m/a".to_string(), "m/b".to_string()])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl CompletionProvider for SlowProvider {
        async fn complete(&self, _request: &CompletionRequest) -> LlmResult<Completion> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(LlmError::InvalidResponse("unreachable".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let config = AnalysisConfig::default();
        let models = GuardedModels::new(
            Arc::new(SlowProvider),
            Arc::new(Breakers::default()),
            &config,
        );
        let err = models
            .complete("m/slow", &msgs(), Duration::from_secs(1), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
        assert_eq!(models.breakers().completion.get("m/slow").failure_count(), 1);
    }

    struct ShortEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ShortEmbedder {
        async fn embed(&self, _model: &str, _texts: &[String]) -> LlmResult<Vec<Vec<f32>>> {
            Ok(vec![vec![0.0; 3]])
        }
    }

    #[tokio::test]
    async fn test_embedding_count_mismatch_counts_toward_breaker() {
        let config = AnalysisConfig::default();
        let models = GuardedModels::new(
            Arc::new(ScriptedProvider::new(vec![])),
            Arc::new(Breakers::default()),
            &config,
        )
        .with_embedding(Arc::new(ShortEmbedder));
        let texts = vec!["a".to_string(), "b".to_string()];

        for _ in 0..3 {
            assert!(matches!(
                models.embed(&texts).await,
                Err(LlmError::InvalidResponse(_))
            ));
        }
        assert!(models.embed(&texts).await.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn test_embedding_without_provider() {
        let models = GuardedModels::new(
            Arc::new(ScriptedProvider::new(vec![])),
            Arc::new(Breakers::default()),
            &AnalysisConfig::default(),
        );
        assert!(matches!(
            models.embed(&["x".to_string()]).await,
            Err(LlmError::EmbeddingUnavailable)
        ));
    }
}
