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

//! Repograph Core
//!
//! Data model, configuration, resilience primitives, cross-validation and
//! the knowledge graph shared by every other repograph crate.

pub mod analysis;
pub mod chunk;
pub mod config;
pub mod entity;
pub mod error;
pub mod facts;
pub mod graph;
pub mod idempotency;
pub mod resilience;
pub mod validation;

pub use analysis::{
    Behavior, BusinessRule, ChunkAnalysis, ModelAnalysis, Narrative, RiskIndicator, Severity,
};
pub use chunk::{detect_language, is_analyzable_language, Chunk, Fingerprint};
pub use config::AnalysisConfig;
pub use entity::{
    confidence, entity_id, Citation, Confidence, GraphEntity, GraphRelationship, Provenance,
    RelationshipKind, ValidatedEntity,
};
pub use error::{CoreError, CoreResult};
pub use facts::{
    ApiEndpoint, CallEdge, CodeEntity, ConfidenceLevel, EntityKind, ImportEdge, SchemaAttribute,
    SchemaFact, SchemaRelation, StaticFacts,
};
pub use graph::{
    build_intelligence_model, GraphSnapshot, GraphStats, IntelligenceModel, KnowledgeGraph,
    ReasoningGraph,
};
pub use idempotency::IdempotencyGuard;
pub use validation::{cross_validate, tokenize, ValidationReport};
