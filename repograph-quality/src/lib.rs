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

//! Quality checks for generated documentation: the section gate and its
//! per-section configuration, plus guardrails on citations, chat input
//! and low-confidence output.

pub mod error;
pub mod gate;
pub mod gate_config;
pub mod guardrails;

pub use error::{QualityError, QualityResult};
pub use gate::{
    detect_placeholders, evaluate_section_gate, gated_confidence, GateFailure, GateResult,
    GateSeverity,
};
pub use gate_config::{gate_config_for, SectionGateConfig};
pub use guardrails::{
    gate_low_confidence_output, validate_chat_input, verify_citation, verify_citations,
    CitationCheck, SourceTree,
};
