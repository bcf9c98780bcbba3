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

//! Analysis configuration
//!
//! Values are resolved in three layers: built-in defaults, an optional TOML
//! file, then `REPOGRAPH_*` environment overrides.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a repograph run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: PipelineConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

/// Model provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Completion targets, tried in order
    #[serde(default = "default_model_chain")]
    pub model_chain: Vec<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Concurrent chunk analyses
    #[serde(default = "default_llm_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Ask the model to write sections before falling back to templates
    #[serde(default = "default_true")]
    pub synthesize_sections: bool,
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent section generators
    #[serde(default = "default_analysis_max_concurrency")]
    pub max_concurrency: usize,

    /// Wall-clock cap on dual analysis
    #[serde(default = "default_analysis_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_chunk_max_lines")]
    pub chunk_max_lines: usize,

    #[serde(default = "default_sections")]
    pub sections: Vec<String>,

    #[serde(default = "default_true")]
    pub verify_citations: bool,
}

/// Breaker thresholds for one call type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_seconds: u64,
}

impl BreakerSettings {
    pub fn recovery(&self) -> Duration {
        Duration::from_secs(self.recovery_seconds)
    }
}

/// Retry policy for rate-limited completions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_ms")]
    pub initial_wait_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_wait_ms: default_retry_initial_ms(),
            max_wait_ms: default_retry_max_ms(),
            jitter: default_retry_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_llm_breaker")]
    pub llm: BreakerSettings,
    #[serde(default = "default_embedding_breaker")]
    pub embedding: BreakerSettings,
    #[serde(default = "default_vector_breaker")]
    pub vector: BreakerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            llm: default_llm_breaker(),
            embedding: default_embedding_breaker(),
            vector: default_vector_breaker(),
            retry: RetrySettings::default(),
        }
    }
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_top_k")]
    pub vector_top_k: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_vector_distance_max")]
    pub vector_distance_max: f32,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

/// Section gate loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_confidence_ceiling")]
    pub confidence_ceiling: f64,
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_model_chain() -> Vec<String> {
    vec![
        "openai/gpt-4.1-mini".to_string(),
        "openai/gpt-4.0-mini".to_string(),
    ]
}

fn default_embedding_model() -> String {
    "openai/text-embedding-3-small".to_string()
}

fn default_llm_max_concurrency() -> usize {
    2
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_analysis_max_concurrency() -> usize {
    5
}

fn default_analysis_timeout() -> u64 {
    900
}

fn default_chunk_max_lines() -> usize {
    120
}

/// Every registered section, in document order
pub fn default_sections() -> Vec<String> {
    [
        "executive_overview",
        "features",
        "system_overview",
        "data_models",
        "api_specs",
        "security_considerations",
        "user_stories",
        "interfaces",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_llm_breaker() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 5,
        recovery_seconds: 30,
    }
}

fn default_embedding_breaker() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 3,
        recovery_seconds: 30,
    }
}

fn default_vector_breaker() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 3,
        recovery_seconds: 60,
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_ms() -> u64 {
    2_000
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_retry_jitter() -> f64 {
    0.1
}

fn default_vector_top_k() -> usize {
    10
}

fn default_max_results() -> usize {
    10
}

fn default_max_context_chars() -> usize {
    12_000
}

fn default_vector_distance_max() -> f32 {
    1.5
}

fn default_rrf_k() -> u32 {
    60
}

fn default_snippet_chars() -> usize {
    400
}

fn default_max_iterations() -> u32 {
    2
}

fn default_confidence_floor() -> f64 {
    0.10
}

fn default_confidence_ceiling() -> f64 {
    0.95
}

fn default_low_confidence_threshold() -> f64 {
    0.60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_chain: default_model_chain(),
            embedding_model: default_embedding_model(),
            max_concurrency: default_llm_max_concurrency(),
            timeout_seconds: default_llm_timeout(),
            max_output_tokens: default_max_output_tokens(),
            api_base: default_api_base(),
            api_key: None,
            synthesize_sections: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_analysis_max_concurrency(),
            timeout_seconds: default_analysis_timeout(),
            chunk_max_lines: default_chunk_max_lines(),
            sections: default_sections(),
            verify_citations: true,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_top_k: default_vector_top_k(),
            max_results: default_max_results(),
            max_context_chars: default_max_context_chars(),
            vector_distance_max: default_vector_distance_max(),
            rrf_k: default_rrf_k(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            confidence_floor: default_confidence_floor(),
            confidence_ceiling: default_confidence_ceiling(),
            low_confidence_threshold: default_low_confidence_threshold(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with file and environment overrides
    pub fn load(config_file: Option<&Path>) -> CoreResult<Self> {
        let mut config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "Loading configuration from file");
                Self::from_file(path)?
            }
            Some(path) => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `REPOGRAPH_*` overrides from a key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(chain) = lookup("REPOGRAPH_MODEL_CHAIN") {
            let models: Vec<String> = chain
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !models.is_empty() {
                self.llm.model_chain = models;
            }
        }
        if let Some(model) = lookup("REPOGRAPH_EMBEDDING_MODEL") {
            self.llm.embedding_model = model;
        }
        if let Some(base) = lookup("REPOGRAPH_API_BASE") {
            self.llm.api_base = base;
        }
        if let Some(key) = lookup("REPOGRAPH_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.llm.api_key = Some(key);
        }
        if let Some(n) = parse_var(&lookup, "REPOGRAPH_LLM_MAX_CONCURRENCY") {
            self.llm.max_concurrency = n;
        }
        if let Some(n) = parse_var(&lookup, "REPOGRAPH_LLM_TIMEOUT_SECONDS") {
            self.llm.timeout_seconds = n;
        }
        if let Some(n) = parse_var(&lookup, "REPOGRAPH_ANALYSIS_MAX_CONCURRENCY") {
            self.analysis.max_concurrency = n;
        }
        if let Some(n) = parse_var(&lookup, "REPOGRAPH_ANALYSIS_TIMEOUT_SECONDS") {
            self.analysis.timeout_seconds = n;
        }
        if let Some(n) = parse_var(&lookup, "REPOGRAPH_RAG_VECTOR_TOP_K") {
            self.retrieval.vector_top_k = n;
        }
        if let Some(flag) = parse_var(&lookup, "REPOGRAPH_SYNTHESIZE_SECTIONS") {
            self.llm.synthesize_sections = flag;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.llm.model_chain.is_empty() {
            return Err(CoreError::Config("llm.model_chain must not be empty".into()));
        }
        if self.llm.max_concurrency == 0 || self.analysis.max_concurrency == 0 {
            return Err(CoreError::Config("concurrency limits must be at least 1".into()));
        }
        if self.quality.max_iterations == 0 {
            return Err(CoreError::Config("quality.max_iterations must be at least 1".into()));
        }
        let q = &self.quality;
        if !(0.0..=1.0).contains(&q.confidence_floor)
            || !(0.0..=1.0).contains(&q.confidence_ceiling)
            || q.confidence_floor > q.confidence_ceiling
        {
            return Err(CoreError::Config(format!(
                "invalid confidence bounds [{}, {}]",
                q.confidence_floor, q.confidence_ceiling
            )));
        }
        // Fusion divides by k + rank with 0-based ranks
        if self.retrieval.rrf_k == 0 {
            return Err(CoreError::Config("retrieval.rrf_k must be at least 1".into()));
        }
        if self.resilience.retry.max_attempts == 0 {
            return Err(CoreError::Config("resilience.retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_seconds)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis.timeout_seconds)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.llm.model_chain.len(), 2);
        assert_eq!(config.llm.max_concurrency, 2);
        assert_eq!(config.llm.timeout_seconds, 60);
        assert_eq!(config.analysis.max_concurrency, 5);
        assert_eq!(config.analysis.timeout_seconds, 900);
        assert_eq!(config.resilience.llm.failure_threshold, 5);
        assert_eq!(config.resilience.embedding.failure_threshold, 3);
        assert_eq!(config.resilience.vector.recovery_seconds, 60);
        assert_eq!(config.retrieval.rrf_k, 60);
        assert_eq!(config.quality.max_iterations, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[llm]\nmodel_chain = [\"local/llama\"]\n\n[analysis]\nmax_concurrency = 8\n"
        )
        .unwrap();

        let config = AnalysisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.llm.model_chain, vec!["local/llama".to_string()]);
        assert_eq!(config.llm.timeout_seconds, 60);
        assert_eq!(config.analysis.max_concurrency, 8);
        assert_eq!(config.analysis.sections.len(), 8);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REPOGRAPH_MODEL_CHAIN", "a/one, b/two"),
            ("REPOGRAPH_LLM_MAX_CONCURRENCY", "7"),
            ("REPOGRAPH_ANALYSIS_TIMEOUT_SECONDS", "not-a-number"),
            ("OPENAI_API_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();

        let mut config = AnalysisConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.model_chain, vec!["a/one", "b/two"]);
        assert_eq!(config.llm.max_concurrency, 7);
        assert_eq!(config.analysis.timeout_seconds, 900);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = AnalysisConfig::default();
        config.quality.confidence_floor = 0.9;
        config.quality.confidence_ceiling = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rrf_k() {
        let mut config = AnalysisConfig::default();
        config.retrieval.rrf_k = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rrf_k"));

        config.retrieval.rrf_k = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_rrf_k_in_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retrieval]\nrrf_k = 0").unwrap();
        assert_eq!(AnalysisConfig::from_file(file.path()).unwrap().retrieval.rrf_k, 0);
        assert!(AnalysisConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AnalysisConfig::load(Some(Path::new("/nonexistent/repograph.toml"))).unwrap();
        assert_eq!(config.retrieval.vector_top_k, 10);
    }
}
