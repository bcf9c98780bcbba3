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

//! Chunks, fingerprints and language tags

use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous, language-tagged slice of source text.
///
/// Produced by ingestion and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub file_path: String,
    pub language: String,
    /// 1-based, inclusive
    pub start_line: u32,
    /// 1-based, inclusive
    pub end_line: u32,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
}

impl Chunk {
    pub fn new(
        file_path: impl Into<String>,
        language: impl Into<String>,
        start_line: u32,
        end_line: u32,
        content: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            language: language.into(),
            start_line,
            end_line,
            content: content.into(),
            symbol_name: None,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol_name = Some(symbol.into());
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.file_path, self.start_line, self.end_line, &self.content)
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Whether the model pass understands this chunk's language
    pub fn is_analyzable(&self) -> bool {
        is_analyzable_language(&self.language)
    }
}

/// Deterministic hash over a chunk's identity; the checkpoint key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(path: &str, start_line: u32, end_line: u32, content: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(start_line.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(end_line.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(content.as_bytes());
        Fingerprint(hex::encode(hasher.finalize().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Fingerprint(s)
    }
}

const ANALYZABLE_LANGUAGES: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "java",
    "go",
    "rust",
    "c",
    "cpp",
    "csharp",
    "ruby",
    "php",
    "kotlin",
    "swift",
    "scala",
];

pub fn is_analyzable_language(language: &str) -> bool {
    ANALYZABLE_LANGUAGES.contains(&language)
}

/// Map a file extension to a language tag
pub fn detect_language(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.').map(|(_, e)| e)?;
    let lang = match ext.to_ascii_lowercase().as_str() {
        "py" | "pyi" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "scala" => "scala",
        "sql" => "sql",
        "md" | "markdown" => "markdown",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "json" => "json",
        "sh" | "bash" => "shell",
        _ => return None,
    };
    Some(lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Chunk::new("src/app.py", "python", 1, 3, "def greet():\n    pass\n");
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = Chunk::new("a.py", "python", 1, 2, "x = 1");
        let moved = Chunk::new("a.py", "python", 2, 2, "x = 1");
        let renamed = Chunk::new("b.py", "python", 1, 2, "x = 1");
        let edited = Chunk::new("a.py", "python", 1, 2, "x = 2");
        assert_ne!(base.fingerprint(), moved.fingerprint());
        assert_ne!(base.fingerprint(), renamed.fingerprint());
        assert_ne!(base.fingerprint(), edited.fingerprint());
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        // "1" + "12" must not collide with "11" + "2"
        let a = Fingerprint::compute("p", 1, 12, "");
        let b = Fingerprint::compute("p", 11, 2, "");
        assert_ne!(a, b);
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/main.rs"), Some("rust"));
        assert_eq!(detect_language("app/Views.TSX"), Some("typescript"));
        assert_eq!(detect_language("Makefile"), None);
        assert!(is_analyzable_language("python"));
        assert!(!is_analyzable_language("markdown"));
    }
}
