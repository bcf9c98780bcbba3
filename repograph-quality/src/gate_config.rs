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

//! Per-section quality gate configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionGateConfig {
    /// Minimum trimmed length in characters
    pub min_length: usize,
    /// Matched as `## heading` or `### heading`, case-insensitively
    pub required_headings: Vec<String>,
    pub check_placeholders: bool,
    pub check_repetition: bool,
    /// Generation attempts, including the first
    pub max_iterations: u32,
}

impl Default for SectionGateConfig {
    fn default() -> Self {
        Self {
            min_length: 200,
            required_headings: Vec::new(),
            check_placeholders: true,
            check_repetition: true,
            max_iterations: 2,
        }
    }
}

impl SectionGateConfig {
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.required_headings.push(heading.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

/// Gate configuration for a section; unknown sections get the defaults
pub fn gate_config_for(section_name: &str) -> SectionGateConfig {
    let base = SectionGateConfig::default();
    match section_name {
        "executive_overview" => base.with_min_length(300),
        "features" => base.with_heading("Feature Areas"),
        "system_overview" => base.with_heading("Architecture Diagram"),
        "security_considerations" => base.with_heading("Coverage Summary"),
        "data_models" | "api_specs" | "interfaces" => base.with_min_length(100),
        _ => base,
    }
}
