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

//! Section quality gate.
//!
//! Four checks, each toggled by [`SectionGateConfig`]:
//!
//! - **content_length** (error): trimmed content shorter than `min_length`
//! - **required_headings** (warning): a required `##`/`###` heading is missing
//! - **placeholders** (error): unfilled `[TODO]`-style tokens outside code
//! - **repetition** (warning): a paragraph over 50 characters appears twice
//!
//! A gate passes iff no error-severity check failed. The score is the
//! fraction of checks that ran without a failure.

use crate::gate_config::SectionGateConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([A-Z][A-Z0-9_\s]{2,30})\]").unwrap());
static FENCED_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]+`").unwrap());

const KNOWN_PLACEHOLDERS: &[&str] = &[
    "[PROJECT NAME]",
    "[PROJECT_NAME]",
    "[TODO]",
    "[TBD]",
    "[PLACEHOLDER]",
    "[INSERT]",
    "[YOUR]",
    "[EXAMPLE]",
    "[MODULE NAME]",
    "[MODULE_NAME]",
    "[FUNCTION NAME]",
    "[FUNCTION_NAME]",
    "[CLASS NAME]",
    "[CLASS_NAME]",
    "[FILE PATH]",
    "[FILE_PATH]",
    "[DESCRIPTION]",
    "[DETAILS]",
];

const PLACEHOLDER_KEYWORDS: &[&str] = &["TODO", "TBD", "INSERT", "YOUR", "EXAMPLE", "PLACEHOLDER"];

/// Paragraphs at or below this length are not checked for repetition
const MIN_REPEATED_PARAGRAPH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateSeverity {
    Error,
    Warning,
}

impl fmt::Display for GateSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateSeverity::Error => write!(f, "error"),
            GateSeverity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateFailure {
    pub field: String,
    pub expected: String,
    pub actual: String,
    pub severity: GateSeverity,
    pub remediation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub section_name: String,
    pub passed: bool,
    /// 0.0 - 1.0
    pub score: f64,
    pub failures: Vec<GateFailure>,
}

impl GateResult {
    pub fn errors(&self) -> impl Iterator<Item = &GateFailure> {
        self.failures
            .iter()
            .filter(|f| f.severity == GateSeverity::Error)
    }

    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.field, f.actual))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Unfilled placeholders in `content`, ignoring fenced and inline code
pub fn detect_placeholders(content: &str) -> Vec<String> {
    let stripped = FENCED_CODE.replace_all(content, "");
    let stripped = INLINE_CODE.replace_all(&stripped, "");

    PLACEHOLDER_PATTERN
        .captures_iter(&stripped)
        .filter_map(|caps| {
            let inner = caps.get(1)?.as_str();
            let bracketed = format!("[{inner}]");
            let known = KNOWN_PLACEHOLDERS.contains(&bracketed.as_str())
                || PLACEHOLDER_KEYWORDS.iter().any(|kw| inner.contains(kw));
            known.then_some(bracketed)
        })
        .collect()
}

fn duplicate_paragraphs(content: &str) -> usize {
    let mut seen = HashSet::new();
    content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| p.chars().count() > MIN_REPEATED_PARAGRAPH)
        .filter(|p| !seen.insert(*p))
        .count()
}

pub fn evaluate_section_gate(
    section_name: &str,
    content: &str,
    config: &SectionGateConfig,
) -> GateResult {
    let mut failures = Vec::new();
    let mut total_checks = 0usize;

    total_checks += 1;
    let length = content.trim().chars().count();
    if length < config.min_length {
        failures.push(GateFailure {
            field: "content_length".into(),
            expected: format!("At least {} characters", config.min_length),
            actual: format!("{length} characters"),
            severity: GateSeverity::Error,
            remediation: "Generate more detailed content".into(),
        });
    }

    if !config.required_headings.is_empty() {
        total_checks += 1;
        let lower = content.to_lowercase();
        let missing: Vec<&str> = config
            .required_headings
            .iter()
            .filter(|heading| {
                let heading = heading.to_lowercase();
                !lower.contains(&format!("## {heading}")) && !lower.contains(&format!("### {heading}"))
            })
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            failures.push(GateFailure {
                field: "required_headings".into(),
                expected: format!("Headings present: {}", config.required_headings.join(", ")),
                actual: format!("Missing: {}", missing.join(", ")),
                severity: GateSeverity::Warning,
                remediation: format!("Add sections: {}", missing.join(", ")),
            });
        }
    }

    if config.check_placeholders {
        total_checks += 1;
        let found = detect_placeholders(content);
        if !found.is_empty() {
            let shown: Vec<&str> = found.iter().take(3).map(String::as_str).collect();
            failures.push(GateFailure {
                field: "placeholders".into(),
                expected: "No unfilled placeholders".into(),
                actual: format!("{} placeholder(s): {}", found.len(), shown.join(", ")),
                severity: GateSeverity::Error,
                remediation: "Replace all [PLACEHOLDER] text with specific content".into(),
            });
        }
    }

    if config.check_repetition {
        total_checks += 1;
        let dupes = duplicate_paragraphs(content);
        if dupes > 0 {
            failures.push(GateFailure {
                field: "repetition".into(),
                expected: "No duplicate paragraphs".into(),
                actual: format!("{dupes} duplicate paragraph(s)"),
                severity: GateSeverity::Warning,
                remediation: "Remove repeated content".into(),
            });
        }
    }

    let errors = failures
        .iter()
        .filter(|f| f.severity == GateSeverity::Error)
        .count();
    let score = if total_checks > 0 {
        (total_checks - failures.len()) as f64 / total_checks as f64
    } else {
        1.0
    };

    GateResult {
        section_name: section_name.to_string(),
        passed: errors == 0,
        score,
        failures,
    }
}

/// Scale a generator's confidence by its gate score, within bounds
pub fn gated_confidence(base: f64, gate_score: f64, floor: f64, ceiling: f64) -> f64 {
    (base * gate_score).clamp(floor, ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn long_text() -> String {
        "This module parses configuration files and validates every field. ".repeat(5)
    }

    #[test]
    fn test_short_content_is_an_error() {
        let result = evaluate_section_gate("x", "too short", &SectionGateConfig::default());
        assert!(!result.passed);
        assert_eq!(result.failures[0].field, "content_length");
        assert_eq!(result.failures[0].severity, GateSeverity::Error);
        assert!((result.score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clean_content_passes_with_full_score() {
        let result = evaluate_section_gate("x", &long_text(), &SectionGateConfig::default());
        assert!(result.passed);
        assert_eq!(result.score, 1.0);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_placeholder_outside_code_fails() {
        let content = format!("{}\n\nOwner: [TODO]\n", long_text());
        let result = evaluate_section_gate("x", &content, &SectionGateConfig::default());
        assert!(!result.passed);
        assert!(result.failures.iter().any(|f| f.field == "placeholders"));
    }

    #[test]
    fn test_placeholder_inside_code_is_ignored() {
        let fenced = format!("{}\n\n```\nlet x = [TODO];\n```\n", long_text());
        assert!(evaluate_section_gate("x", &fenced, &SectionGateConfig::default()).passed);

        let inline = format!("{}\n\nUse `[PROJECT NAME]` literally.\n", long_text());
        assert!(detect_placeholders(&inline).is_empty());
    }

    #[test]
    fn test_placeholder_keywords_and_plain_brackets() {
        assert_eq!(detect_placeholders("see [INSERT LINK HERE]"), vec!["[INSERT LINK HERE]"]);
        assert_eq!(detect_placeholders("[PROJECT NAME] and [TBD]").len(), 2);
        // Ordinary uppercase brackets are not placeholders
        assert!(detect_placeholders("flags [ABC] and [HTTP]").is_empty());
    }

    #[test]
    fn test_missing_heading_is_only_a_warning() {
        let config = SectionGateConfig::default().with_heading("Feature Areas");
        let result = evaluate_section_gate("features", &long_text(), &config);
        assert!(result.passed);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].severity, GateSeverity::Warning);
        assert!((result.score - 0.75).abs() < 1e-9);

        let with_heading = format!("### feature areas\n\n{}", long_text());
        let result = evaluate_section_gate("features", &with_heading, &config);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_repeated_paragraphs_warn() {
        let para = "A paragraph that is comfortably longer than fifty characters in total.";
        let content = format!("{para}\n\n{para}\n\n{para}");
        let result = evaluate_section_gate("x", &content, &SectionGateConfig::default());
        let failure = result
            .failures
            .iter()
            .find(|f| f.field == "repetition")
            .unwrap();
        assert_eq!(failure.actual, "2 duplicate paragraph(s)");
        assert!(result.passed);
    }

    #[test]
    fn test_short_paragraphs_may_repeat() {
        assert_eq!(duplicate_paragraphs("ok\n\nok\n\nok"), 0);
    }

    #[test]
    fn test_gated_confidence_clamps() {
        assert_eq!(gated_confidence(0.9, 1.0, 0.1, 0.95), 0.9);
        assert_eq!(gated_confidence(1.0, 1.0, 0.1, 0.95), 0.95);
        assert_eq!(gated_confidence(0.9, 0.0, 0.1, 0.95), 0.1);
    }

    proptest! {
        #[test]
        fn prop_score_is_a_fraction(content in "[a-zA-Z \\[\\]\\n]{0,400}") {
            let result = evaluate_section_gate("x", &content, &SectionGateConfig::default());
            prop_assert!((0.0..=1.0).contains(&result.score));
            prop_assert_eq!(result.passed, result.errors().count() == 0);
        }
    }
}
