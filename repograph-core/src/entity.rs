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

//! Graph entities, relationships and confidence scores

use crate::facts::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence constants shared by the validator, graph builder and sections
pub mod confidence {
    pub const CROSS_VALIDATED: f64 = 0.95;
    pub const AST_ONLY: f64 = 0.90;
    pub const LLM_SECTION_RICH: f64 = 0.90;
    pub const LLM_SECTION_SPARSE: f64 = 0.80;
    pub const LLM_ONLY: f64 = 0.70;
    pub const WORKFLOW: f64 = 0.60;
    pub const RELATIONSHIP_DEFAULT: f64 = 0.95;
    /// Minimum context items before a synthesized section counts as rich
    pub const MIN_CONTEXT_ITEMS: usize = 3;
}

/// Where a finding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Deterministic,
    Probabilistic,
    CrossValidated,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provenance::Deterministic => "deterministic",
            Provenance::Probabilistic => "probabilistic",
            Provenance::CrossValidated => "cross_validated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub value: f64,
    pub provenance: Provenance,
    #[serde(default)]
    pub explanation: String,
}

impl Confidence {
    pub fn new(value: f64, provenance: Provenance, explanation: impl Into<String>) -> Self {
        Self {
            value,
            provenance,
            explanation: explanation.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.value)
    }
}

/// A node in the knowledge graph. Ids are `"{file_path}::{name}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub confidence: Confidence,
}

pub fn entity_id(file_path: &str, name: &str) -> String {
    format!("{}::{}", file_path, name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    Calls,
    Imports,
    Inherits,
    Uses,
    References,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipKind::Calls => "calls",
            RelationshipKind::Imports => "imports",
            RelationshipKind::Inherits => "inherits",
            RelationshipKind::Uses => "uses",
            RelationshipKind::References => "references",
        };
        f.write_str(s)
    }
}

/// A typed edge. `target_id` may name something outside the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub kind: RelationshipKind,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl GraphRelationship {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            weight: 1.0,
            context: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// A `(file, line range)` reference emitted alongside generated text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
}

impl Citation {
    pub fn new(file_path: impl Into<String>, line_start: u32, line_end: u32) -> Self {
        Self {
            file_path: file_path.into(),
            line_start,
            line_end,
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.file_path, self.line_start, self.line_end)
    }
}

/// Cross-validation output, pre-insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedEntity {
    pub name: String,
    pub kind: EntityKind,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub confidence: Confidence,
}

impl ValidatedEntity {
    pub fn id(&self) -> String {
        entity_id(&self.file_path, &self.name)
    }

    pub fn into_graph_entity(self) -> GraphEntity {
        GraphEntity {
            id: self.id(),
            name: self.name,
            kind: self.kind,
            file_path: self.file_path,
            start_line: self.start_line,
            end_line: self.end_line,
            language: self.language,
            signature: self.signature,
            description: self.description,
            confidence: self.confidence,
        }
    }
}
