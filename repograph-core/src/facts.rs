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

//! Facts produced by the deterministic parser pass.
//!
//! The core never parses source text; these shapes are what an AST-facts
//! provider hands back for each chunk.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-level confidence attached to individual findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    #[default]
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// Numeric value used when a finding enters the reasoning graph
    pub fn score(self) -> f64 {
        match self {
            ConfidenceLevel::High => 0.90,
            ConfidenceLevel::Medium => 0.70,
            ConfidenceLevel::Low => 0.50,
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Function,
    Method,
    Class,
    Interface,
    Module,
    Variable,
    Constant,
    Table,
    Endpoint,
    BusinessRule,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Function => "function",
            EntityKind::Method => "method",
            EntityKind::Class => "class",
            EntityKind::Interface => "interface",
            EntityKind::Module => "module",
            EntityKind::Variable => "variable",
            EntityKind::Constant => "constant",
            EntityKind::Table => "table",
            EntityKind::Endpoint => "endpoint",
            EntityKind::BusinessRule => "business_rule",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, EntityKind::Function | EntityKind::Method)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named code entity found by the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntity {
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
    pub docstring: Option<String>,
}

/// A call site: `receiver.callee(..)` at `caller_file:caller_line`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller_file: String,
    pub caller_line: u32,
    pub callee: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default)]
    pub confidence: ConfidenceLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportEdge {
    pub source_file: String,
    /// Module path as written; usually unresolved
    pub target: String,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaAttribute {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
}

/// Foreign-key or ORM relation from one schema entity to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRelation {
    pub target_entity: String,
    pub relation_type: String,
}

/// A table or model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaFact {
    pub name: String,
    pub file_path: String,
    pub start_line: u32,
    /// e.g. "sql", "orm"
    pub source_type: String,
    #[serde(default)]
    pub attributes: Vec<SchemaAttribute>,
    #[serde(default)]
    pub relationships: Vec<SchemaRelation>,
}

/// An HTTP route discovered from decorators or router calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub method: String,
    pub path: String,
    pub handler_file: String,
    pub handler_line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_function: Option<String>,
}

/// Everything the deterministic pass found, aggregated across chunks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticFacts {
    pub entities: Vec<CodeEntity>,
    pub calls: Vec<CallEdge>,
    pub imports: Vec<ImportEdge>,
    pub schemas: Vec<SchemaFact>,
    pub endpoints: Vec<ApiEndpoint>,
}

impl StaticFacts {
    pub fn merge(&mut self, other: StaticFacts) {
        self.entities.extend(other.entities);
        self.calls.extend(other.calls);
        self.imports.extend(other.imports);
        self.schemas.extend(other.schemas);
        self.endpoints.extend(other.endpoints);
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.calls.is_empty()
            && self.imports.is_empty()
            && self.schemas.is_empty()
            && self.endpoints.is_empty()
    }
}
