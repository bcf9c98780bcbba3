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

//! Cross-validation of deterministic and model findings.
//!
//! A parsed entity is confirmed when every token of its name appears in a
//! single model mention for the same file. Matching is token-set based:
//! `get` is not confirmed by a narrative that only says `getter`.

use crate::analysis::ModelAnalysis;
use crate::entity::{confidence, Confidence, Provenance, ValidatedEntity};
use crate::facts::{EntityKind, StaticFacts};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const RULE_NAME_CHARS: usize = 80;

/// Outcome of reconciling both analysis passes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub entities: Vec<ValidatedEntity>,
    pub cross_validated: usize,
    pub deterministic_only: usize,
    pub model_only: usize,
    pub conflicts: Vec<String>,
}

impl ValidationReport {
    pub fn has_conflict(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Split an identifier or sentence into lowercase word tokens.
///
/// Handles snake_case, camelCase, PascalCase, dotted paths and acronym runs
/// (`HTTPServer` gives `http`, `server`). Tokens shorter than two
/// characters are dropped.
pub fn tokenize(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        for piece in split_word(word) {
            if piece.chars().count() >= 2 {
                tokens.insert(piece.to_lowercase());
            }
        }
    }
    tokens
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Class {
    Upper,
    Lower,
    Digit,
}

fn class_of(c: char) -> Class {
    if c.is_numeric() {
        Class::Digit
    } else if c.is_uppercase() {
        Class::Upper
    } else {
        Class::Lower
    }
}

fn split_word(word: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = word.char_indices().collect();
    let mut pieces = Vec::new();
    let mut start = 0;
    for i in 1..chars.len() {
        let prev = class_of(chars[i - 1].1);
        let cur = class_of(chars[i].1);
        let next = chars.get(i + 1).map(|&(_, c)| class_of(c));
        let boundary = match (prev, cur) {
            (Class::Lower, Class::Upper) => true,
            (Class::Digit, Class::Upper | Class::Lower) => true,
            (Class::Upper | Class::Lower, Class::Digit) => true,
            (Class::Upper, Class::Upper) => next == Some(Class::Lower),
            _ => false,
        };
        if boundary {
            pieces.push(&word[start..chars[i].0]);
            start = chars[i].0;
        }
    }
    if start < word.len() {
        pieces.push(&word[start..]);
    }
    pieces
}

/// Reconcile parsed entities with model narratives and rules.
///
/// Deterministic findings decide whether an entity exists; the model can
/// only raise confidence in it. Business rules the parser cannot see enter
/// as model-only entities.
pub fn cross_validate(facts: &StaticFacts, model: &ModelAnalysis) -> ValidationReport {
    let mut mentions: HashMap<&str, Vec<HashSet<String>>> = HashMap::new();
    let mut narratives = 0;
    for narrative in model.narratives.iter().filter(|n| !n.is_placeholder()) {
        narratives += 1;
        let per_file = mentions.entry(narrative.file_path.as_str()).or_default();
        for text in narrative.mentions() {
            let tokens = tokenize(text);
            if !tokens.is_empty() {
                per_file.push(tokens);
            }
        }
    }

    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut report = ValidationReport::default();

    for entity in &facts.entities {
        if !seen.insert((entity.name.as_str(), entity.file_path.as_str())) {
            continue;
        }

        let name_tokens = tokenize(&entity.name);
        let confirmed = !name_tokens.is_empty()
            && mentions
                .get(entity.file_path.as_str())
                .map(|file_mentions| file_mentions.iter().any(|m| name_tokens.is_subset(m)))
                .unwrap_or(false);

        let confidence = if confirmed {
            report.cross_validated += 1;
            Confidence::new(
                confidence::CROSS_VALIDATED,
                Provenance::CrossValidated,
                "Confirmed by parser and model narrative",
            )
        } else {
            report.deterministic_only += 1;
            Confidence::new(
                confidence::AST_ONLY,
                Provenance::Deterministic,
                "Found by parser only",
            )
        };

        report.entities.push(ValidatedEntity {
            name: entity.name.clone(),
            kind: entity.kind,
            file_path: entity.file_path.clone(),
            start_line: entity.start_line,
            end_line: entity.end_line,
            language: entity.language.clone(),
            signature: entity.signature.clone(),
            description: entity.docstring.clone(),
            confidence,
        });
    }

    for rule in &model.rules {
        let name: String = rule.rule_text.chars().take(RULE_NAME_CHARS).collect();
        if name.trim().is_empty() || seen.contains(&(name.as_str(), rule.file_path.as_str())) {
            continue;
        }
        report.model_only += 1;
        report.entities.push(ValidatedEntity {
            name,
            kind: EntityKind::BusinessRule,
            file_path: rule.file_path.clone(),
            start_line: rule.line_start,
            end_line: rule.line_end.max(rule.line_start),
            language: String::new(),
            signature: None,
            description: (!rule.consequence.is_empty()).then(|| rule.consequence.clone()),
            confidence: Confidence::new(
                confidence::LLM_ONLY,
                Provenance::Probabilistic,
                "Inferred by model only",
            ),
        });
    }

    if report.cross_validated == 0 && !seen.is_empty() && narratives > 0 {
        tracing::warn!(
            parsed = seen.len(),
            narratives,
            "No entities cross-validated although both passes produced output"
        );
        report.conflicts.push(
            "No cross-validated entities found despite both analysis paths producing results"
                .to_string(),
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Behavior, BusinessRule, ChunkAnalysis, Narrative};
    use crate::facts::{CodeEntity, ConfidenceLevel};
    use proptest::prelude::*;

    fn entity(name: &str, file: &str) -> CodeEntity {
        CodeEntity {
            name: name.to_string(),
            kind: EntityKind::Function,
            file_path: file.to_string(),
            start_line: 1,
            end_line: 3,
            language: "python".to_string(),
            signature: None,
            docstring: None,
        }
    }

    fn narrative(file: &str, behaviors: &[&str]) -> Narrative {
        Narrative {
            file_path: file.to_string(),
            purpose: String::new(),
            behaviors: behaviors
                .iter()
                .map(|d| Behavior {
                    description: d.to_string(),
                    line_start: 1,
                    line_end: 1,
                })
                .collect(),
            concepts: vec![],
            confidence: ConfidenceLevel::High,
        }
    }

    fn model(narratives: Vec<Narrative>) -> ModelAnalysis {
        ModelAnalysis {
            narratives,
            ..Default::default()
        }
    }

    #[test]
    fn test_tokenize_identifier_styles() {
        let expect = |s: &str, want: &[&str]| {
            let got = tokenize(s);
            let want: HashSet<String> = want.iter().map(|w| w.to_string()).collect();
            assert_eq!(got, want, "tokenize({s:?})");
        };
        expect("get_user_name", &["get", "user", "name"]);
        expect("getUserName", &["get", "user", "name"]);
        expect("HTTPServer", &["http", "server"]);
        expect("auth.login_v2", &["auth", "login"]);
        expect("parse2Json", &["parse", "json"]);
        expect("x", &[]);
    }

    #[test]
    fn test_token_subset_confirms() {
        let facts = StaticFacts {
            entities: vec![entity("get_user", "svc.py")],
            ..Default::default()
        };
        let report = cross_validate(
            &facts,
            &model(vec![narrative("svc.py", &["Loads the user record via get"])]),
        );
        assert_eq!(report.cross_validated, 1);
        assert_eq!(report.entities[0].confidence.value, confidence::CROSS_VALIDATED);
        assert_eq!(report.entities[0].confidence.provenance, Provenance::CrossValidated);
        assert!(!report.has_conflict());
    }

    #[test]
    fn test_substring_alone_never_confirms() {
        let facts = StaticFacts {
            entities: vec![entity("get", "svc.py")],
            ..Default::default()
        };
        let report = cross_validate(
            &facts,
            &model(vec![narrative("svc.py", &["The getter returns cached values"])]),
        );
        assert_eq!(report.cross_validated, 0);
        assert_eq!(report.deterministic_only, 1);
        assert_eq!(report.entities[0].confidence.value, confidence::AST_ONLY);
        assert!(report.has_conflict());
    }

    #[test]
    fn test_single_char_name_never_confirms() {
        let facts = StaticFacts {
            entities: vec![entity("x", "m.py")],
            ..Default::default()
        };
        let report = cross_validate(&facts, &model(vec![narrative("m.py", &["x is a counter"])]));
        assert_eq!(report.cross_validated, 0);
    }

    #[test]
    fn test_other_file_does_not_confirm() {
        let facts = StaticFacts {
            entities: vec![entity("greet", "a.py")],
            ..Default::default()
        };
        let report = cross_validate(&facts, &model(vec![narrative("b.py", &["calls greet"])]));
        assert_eq!(report.cross_validated, 0);
    }

    #[test]
    fn test_duplicates_collapse() {
        let facts = StaticFacts {
            entities: vec![entity("greet", "a.py"), entity("greet", "a.py")],
            ..Default::default()
        };
        let report = cross_validate(&facts, &ModelAnalysis::default());
        assert_eq!(report.entities.len(), 1);
        assert!(!report.has_conflict());
    }

    #[test]
    fn test_degraded_narratives_never_confirm() {
        let facts = StaticFacts {
            entities: vec![
                entity("parse_response", "svc.py"),
                entity("analysis", "svc.py"),
                entity("unavailable", "svc.py"),
            ],
            ..Default::default()
        };
        let analysis = model(vec![
            ChunkAnalysis::parse_failed("svc.py").narrative,
            ChunkAnalysis::unavailable("svc.py").narrative,
        ]);
        let report = cross_validate(&facts, &analysis);
        assert_eq!(report.cross_validated, 0);
        assert_eq!(report.deterministic_only, 3);
        assert!(report
            .entities
            .iter()
            .all(|e| e.confidence.provenance == Provenance::Deterministic));
        // Placeholders are not model output, so there is nothing to conflict with
        assert!(!report.has_conflict());
    }

    #[test]
    fn test_real_narrative_with_placeholder_purpose_text_still_counts() {
        let facts = StaticFacts {
            entities: vec![entity("parse_response", "svc.py")],
            ..Default::default()
        };
        let mut n = narrative("svc.py", &["parse_response decodes the body"]);
        n.purpose = "Failed to parse response".to_string();
        let report = cross_validate(&facts, &model(vec![n]));
        assert_eq!(report.cross_validated, 1);
    }

    #[test]
    fn test_rules_become_model_only() {
        let long_rule = "Orders above the credit limit require manual approval ".repeat(3);
        let analysis = ModelAnalysis {
            rules: vec![BusinessRule {
                rule_text: long_rule,
                rule_type: "validation".into(),
                condition: String::new(),
                consequence: "order held".into(),
                file_path: "orders.py".into(),
                line_start: 10,
                line_end: 14,
                confidence: ConfidenceLevel::High,
            }],
            ..Default::default()
        };
        let report = cross_validate(&StaticFacts::default(), &analysis);
        assert_eq!(report.model_only, 1);
        let rule = &report.entities[0];
        assert_eq!(rule.kind, EntityKind::BusinessRule);
        assert_eq!(rule.name.chars().count(), 80);
        assert_eq!(rule.confidence.value, confidence::LLM_ONLY);
        assert_eq!(rule.confidence.provenance, Provenance::Probabilistic);
    }

    proptest! {
        #[test]
        fn prop_name_in_sentence_confirms(name in "[a-z][a-zA-Z0-9_]{1,20}") {
            let sentence = format!("This module calls {} during startup", name);
            let tokens = tokenize(&name);
            prop_assume!(!tokens.is_empty());
            prop_assert!(tokens.is_subset(&tokenize(&sentence)));
        }

        #[test]
        fn prop_tokens_are_lowercase_and_long(text in "[a-zA-Z0-9_. ]{0,40}") {
            for t in tokenize(&text) {
                prop_assert!(t.chars().count() >= 2);
                prop_assert_eq!(t.to_lowercase(), t.clone());
            }
        }
    }
}
