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

//! Keyword extraction for the lexical half of hybrid retrieval

use once_cell::sync::Lazy;
use std::collections::HashSet;

const MAX_KEYWORDS: usize = 8;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "have", "how", "what", "when", "where", "which",
        "who", "why", "does", "this", "that", "these", "those", "with", "from", "into", "about",
        "there", "their", "them", "then", "than", "been", "being", "will", "would", "should",
        "could", "its", "it's", "use", "used", "uses", "using", "code", "file", "files",
        "function", "functions", "show", "tell", "explain", "work", "works", "make", "made",
        "get", "gets", "some", "more", "most", "other", "such", "only", "also", "very",
        "just", "over", "under", "via", "per", "between",
    ]
    .into_iter()
    .collect()
});

/// Lowercased identifier-like terms of a question, stop words and short
/// tokens removed, first occurrence order, at most eight
pub fn extract_keywords(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 3 && !STOP_WORDS.contains(t.as_str()))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| seen.insert(t.clone()))
        .take(MAX_KEYWORDS)
        .collect()
}
