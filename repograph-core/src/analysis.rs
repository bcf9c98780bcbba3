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

//! Findings produced by the probabilistic model pass.
//!
//! [`ChunkAnalysis`] is also the shape persisted in checkpoints, so a cache
//! hit and a fresh analysis are indistinguishable downstream.

use crate::facts::ConfidenceLevel;
use serde::{Deserialize, Serialize};

/// Purpose recorded when every model in the chain failed
pub const UNAVAILABLE_PURPOSE: &str = "Analysis unavailable";
/// Purpose recorded when the model answered with unusable JSON
pub const PARSE_FAILED_PURPOSE: &str = "Failed to parse response";

/// One observed behaviour, with the lines it was drawn from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub description: String,
    #[serde(default)]
    pub line_start: u32,
    #[serde(default)]
    pub line_end: u32,
}

/// Model narrative for one chunk of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub file_path: String,
    pub purpose: String,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub confidence: ConfidenceLevel,
}

impl Narrative {
    /// Narrative placeholder used when no model produced usable output
    pub fn degraded(file_path: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            purpose: purpose.into(),
            behaviors: Vec::new(),
            concepts: Vec::new(),
            confidence: ConfidenceLevel::Low,
        }
    }

    /// True for the stand-in narratives built when no model output exists.
    /// They carry no findings and must not confirm anything.
    pub fn is_placeholder(&self) -> bool {
        self.behaviors.is_empty()
            && self.concepts.is_empty()
            && (self.purpose == UNAVAILABLE_PURPOSE || self.purpose == PARSE_FAILED_PURPOSE)
    }

    /// Every piece of free text the model wrote about this file
    pub fn mentions(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.purpose.as_str())
            .chain(self.behaviors.iter().map(|b| b.description.as_str()))
            .chain(self.concepts.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub rule_text: String,
    #[serde(default)]
    pub rule_type: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub consequence: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub line_start: u32,
    #[serde(default)]
    pub line_end: u32,
    #[serde(default)]
    pub confidence: ConfidenceLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskIndicator {
    pub title: String,
    #[serde(default)]
    pub risk_type: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub confidence: ConfidenceLevel,
}

/// Combined model output for a single chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    pub narrative: Narrative,
    #[serde(default)]
    pub rules: Vec<BusinessRule>,
    #[serde(default)]
    pub risks: Vec<RiskIndicator>,
}

impl ChunkAnalysis {
    pub fn unavailable(file_path: &str) -> Self {
        Self {
            narrative: Narrative::degraded(file_path, UNAVAILABLE_PURPOSE),
            rules: Vec::new(),
            risks: Vec::new(),
        }
    }

    pub fn parse_failed(file_path: &str) -> Self {
        Self {
            narrative: Narrative::degraded(file_path, PARSE_FAILED_PURPOSE),
            rules: Vec::new(),
            risks: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.narrative.confidence == ConfidenceLevel::Low
            && self.rules.is_empty()
            && self.risks.is_empty()
    }
}

/// Model findings aggregated across every chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAnalysis {
    pub narratives: Vec<Narrative>,
    pub rules: Vec<BusinessRule>,
    pub risks: Vec<RiskIndicator>,
    #[serde(default)]
    pub checkpoint_hits: usize,
    #[serde(default)]
    pub degraded_chunks: usize,
}

impl ModelAnalysis {
    pub fn push(&mut self, analysis: ChunkAnalysis) {
        if analysis.is_degraded() {
            self.degraded_chunks += 1;
        }
        self.narratives.push(analysis.narrative);
        self.rules.extend(analysis.rules);
        self.risks.extend(analysis.risks);
    }

    pub fn is_empty(&self) -> bool {
        self.narratives.is_empty() && self.rules.is_empty() && self.risks.is_empty()
    }
}
