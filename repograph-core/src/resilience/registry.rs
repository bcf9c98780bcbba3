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

//! Lazily-populated breaker registry, one breaker per target id.

use super::breaker::{CircuitBreaker, CircuitConfig};
use crate::config::ResilienceConfig;
use dashmap::DashMap;
use std::sync::Arc;

/// Breakers for one call type, keyed by target (model id or index name).
///
/// Each breaker carries its own lock, so concurrent calls against
/// different targets never contend.
pub struct BreakerRegistry {
    kind: &'static str,
    config: CircuitConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(kind: &'static str, config: CircuitConfig) -> Self {
        Self {
            kind,
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Breaker for `target`, created on first use
    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(target) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(target.to_string()).or_insert_with(|| {
            tracing::debug!(kind = self.kind, target_id = target, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(target, self.config.clone()))
        });
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Forget every breaker; the next call for any target starts closed
    pub fn reset(&self) {
        self.breakers.clear();
    }

    pub fn reset_target(&self, target: &str) {
        if let Some(cb) = self.breakers.get(target) {
            cb.reset();
        }
    }

    /// Targets whose breaker is currently open
    pub fn open_targets(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.key().clone())
            .collect()
    }
}

/// Registries for every external call type
pub struct Breakers {
    pub completion: BreakerRegistry,
    pub embedding: BreakerRegistry,
    pub vector: BreakerRegistry,
}

impl Breakers {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            completion: BreakerRegistry::new("completion", config.llm.into()),
            embedding: BreakerRegistry::new("embedding", config.embedding.into()),
            vector: BreakerRegistry::new("vector", config.vector.into()),
        }
    }

    pub fn reset_all(&self) {
        self.completion.reset();
        self.embedding.reset();
        self.vector.reset();
    }
}

impl Default for Breakers {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_breaker_per_target() {
        let registry = BreakerRegistry::new("completion", CircuitConfig::default());
        let a1 = registry.get("openai/a");
        let a2 = registry.get("openai/a");
        let b = registry.get("openai/b");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reset_drops_breakers() {
        let registry = BreakerRegistry::new("embedding", CircuitConfig::default());
        registry.get("x");
        registry.reset();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_defaults_per_call_type() {
        let breakers = Breakers::default();
        assert_eq!(breakers.completion.config.failure_threshold, 5);
        assert_eq!(breakers.embedding.config.failure_threshold, 3);
        assert_eq!(breakers.vector.config.open_duration.as_secs(), 60);
    }
}
