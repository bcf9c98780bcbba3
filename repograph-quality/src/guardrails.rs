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

//! Output guardrails: citation verification, chat input checks and
//! low-confidence labelling.

use crate::error::{QualityError, QualityResult};
use repograph_core::Citation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MAX_CHAT_INPUT_CHARS: usize = 10_000;

/// Line counts of every ingested file, keyed by repo-relative path
pub type SourceTree = HashMap<String, u32>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationCheck {
    pub citation: Citation,
    pub check_name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CitationCheck {
    fn fail(citation: &Citation, check_name: &str, reason: String) -> Self {
        Self {
            citation: citation.clone(),
            check_name: check_name.to_string(),
            passed: false,
            reason: Some(reason),
        }
    }
}

pub fn verify_citation(citation: &Citation, tree: &SourceTree) -> CitationCheck {
    let label = format!("{}:{}", citation.file_path, citation.line_start);

    let Some(&line_count) = tree.get(&citation.file_path) else {
        return CitationCheck::fail(
            citation,
            "citation_file_exists",
            format!("File not found: {}", citation.file_path),
        );
    };
    if citation.line_start < 1 {
        return CitationCheck::fail(citation, "citation_line_start", format!("line_start < 1 in {label}"));
    }
    if citation.line_end < citation.line_start {
        return CitationCheck::fail(
            citation,
            "citation_line_range",
            format!("line_end < line_start in {label}"),
        );
    }
    if citation.line_end > line_count {
        return CitationCheck::fail(
            citation,
            "citation_line_end",
            format!(
                "line_end ({}) exceeds file length ({line_count}) in {label}",
                citation.line_end
            ),
        );
    }

    CitationCheck {
        citation: citation.clone(),
        check_name: "citation_valid".into(),
        passed: true,
        reason: None,
    }
}

pub fn verify_citations(citations: &[Citation], tree: &SourceTree) -> Vec<CitationCheck> {
    citations.iter().map(|c| verify_citation(c, tree)).collect()
}

/// Trim and cap a chat question; empty input is rejected
pub fn validate_chat_input(query: &str) -> QualityResult<String> {
    let cleaned = query.trim();
    if cleaned.is_empty() {
        return Err(QualityError::EmptyInput);
    }
    Ok(cleaned.chars().take(MAX_CHAT_INPUT_CHARS).collect())
}

/// Prefix a disclaimer when `confidence` is below `threshold`.
/// Returns the possibly-prefixed content and whether it was gated.
pub fn gate_low_confidence_output(content: &str, confidence: f64, threshold: f64) -> (String, bool) {
    if confidence >= threshold {
        return (content.to_string(), false);
    }
    (format!("[Low confidence: {confidence:.2}] {content}"), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> SourceTree {
        HashMap::from([("src/app.py".to_string(), 20u32)])
    }

    #[test]
    fn test_valid_citation() {
        let check = verify_citation(&Citation::new("src/app.py", 3, 20), &tree());
        assert!(check.passed);
        assert_eq!(check.check_name, "citation_valid");
    }

    #[test]
    fn test_each_failure_kind() {
        let cases = [
            (Citation::new("src/missing.py", 1, 2), "citation_file_exists"),
            (Citation::new("src/app.py", 0, 2), "citation_line_start"),
            (Citation::new("src/app.py", 5, 4), "citation_line_range"),
            (Citation::new("src/app.py", 5, 21), "citation_line_end"),
        ];
        for (citation, expected) in cases {
            let check = verify_citation(&citation, &tree());
            assert!(!check.passed);
            assert_eq!(check.check_name, expected);
        }
    }

    #[test]
    fn test_chat_input() {
        assert!(matches!(validate_chat_input("   "), Err(QualityError::EmptyInput)));
        assert_eq!(validate_chat_input("  what calls greet?  ").unwrap(), "what calls greet?");
        let long = "q".repeat(MAX_CHAT_INPUT_CHARS + 50);
        assert_eq!(validate_chat_input(&long).unwrap().len(), MAX_CHAT_INPUT_CHARS);
    }

    #[test]
    fn test_low_confidence_prefix() {
        assert_eq!(
            gate_low_confidence_output("body", 0.42, 0.60),
            ("[Low confidence: 0.42] body".to_string(), true)
        );
        assert_eq!(gate_low_confidence_output("body", 0.60, 0.60), ("body".to_string(), false));
    }
}
