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

//! Purposes, rules, risks and workflows attached to graph entities.

use crate::analysis::Severity;
use crate::entity::Confidence;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purpose {
    /// File path or entity id the statement describes
    pub entity_id: String,
    pub statement: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredRule {
    pub id: String,
    pub rule_text: String,
    pub rule_type: String,
    pub condition: String,
    pub consequence: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredRisk {
    pub id: String,
    pub title: String,
    pub risk_type: String,
    pub severity: Severity,
    pub description: String,
    pub file_path: String,
    pub line: u32,
    pub recommendations: Vec<String>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub order: usize,
    pub entity_id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub confidence: Confidence,
}

/// Everything the model told us about intent, keyed for stable iteration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningGraph {
    purposes: BTreeMap<String, Purpose>,
    rules: BTreeMap<String, InferredRule>,
    risks: BTreeMap<String, InferredRisk>,
    workflows: BTreeMap<String, Workflow>,
}

impl ReasoningGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the most confident statement per entity; ties keep the first.
    pub fn add_purpose(&mut self, purpose: Purpose) {
        match self.purposes.get(&purpose.entity_id) {
            Some(existing) if existing.confidence.value >= purpose.confidence.value => {}
            _ => {
                self.purposes.insert(purpose.entity_id.clone(), purpose);
            }
        }
    }

    pub fn add_rule(&mut self, rule: InferredRule) {
        self.rules.insert(rule.id.clone(), rule);
    }

    pub fn add_risk(&mut self, risk: InferredRisk) {
        self.risks.insert(risk.id.clone(), risk);
    }

    pub fn add_workflow(&mut self, workflow: Workflow) {
        self.workflows.insert(workflow.id.clone(), workflow);
    }

    pub fn purpose(&self, entity_id: &str) -> Option<&Purpose> {
        self.purposes.get(entity_id)
    }

    pub fn purposes(&self) -> impl Iterator<Item = &Purpose> {
        self.purposes.values()
    }

    pub fn rules(&self) -> impl Iterator<Item = &InferredRule> {
        self.rules.values()
    }

    pub fn risks(&self) -> impl Iterator<Item = &InferredRisk> {
        self.risks.values()
    }

    pub fn workflows(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }

    pub fn purpose_count(&self) -> usize {
        self.purposes.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn risk_count(&self) -> usize {
        self.risks.len()
    }

    pub fn workflow_count(&self) -> usize {
        self.workflows.len()
    }
}
