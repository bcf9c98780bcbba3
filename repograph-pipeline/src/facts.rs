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

//! Deterministic facts extraction
//!
//! [`FactsProvider`] is the only coupling between the pipeline and a
//! parser. [`PatternFactsProvider`] is a line-oriented regex scanner that
//! covers the common languages well enough for the CLI; tree-sitter or
//! compiler-backed providers plug in through the same trait.

use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use repograph_core::{
    ApiEndpoint, CallEdge, Chunk, CodeEntity, ConfidenceLevel, EntityKind, ImportEdge,
    SchemaAttribute, SchemaFact, SchemaRelation, StaticFacts,
};
use std::collections::HashMap;

/// Extracts entities, call and import edges and schema facts from a chunk
#[async_trait]
pub trait FactsProvider: Send + Sync {
    async fn extract(&self, chunk: &Chunk) -> PipelineResult<StaticFacts>;
}

struct LanguagePatterns {
    definitions: Vec<(Regex, EntityKind)>,
    imports: Vec<Regex>,
    comment_prefixes: &'static [&'static str],
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static PATTERNS: Lazy<HashMap<&'static str, LanguagePatterns>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "python",
        LanguagePatterns {
            definitions: vec![
                (re(r"^\s*class\s+(?P<name>[A-Za-z_]\w*)"), EntityKind::Class),
                (
                    re(r"^\s*(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)\s*\("),
                    EntityKind::Function,
                ),
            ],
            imports: vec![
                re(r"^\s*from\s+(?P<target>[\w.]+)\s+import\b"),
                re(r"^\s*import\s+(?P<target>[\w.]+)"),
            ],
            comment_prefixes: &["#"],
        },
    );
    let js = || LanguagePatterns {
        definitions: vec![
            (
                re(r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)"),
                EntityKind::Class,
            ),
            (
                re(r"^\s*(?:export\s+)?interface\s+(?P<name>[A-Za-z_$][\w$]*)"),
                EntityKind::Interface,
            ),
            (
                re(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+(?P<name>[A-Za-z_$][\w$]*)"),
                EntityKind::Function,
            ),
            (
                re(r"^\s*(?:export\s+)?(?:const|let)\s+(?P<name>[A-Za-z_$][\w$]*)\s*=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>"),
                EntityKind::Function,
            ),
        ],
        imports: vec![
            re(r#"^\s*import\s+.*?\bfrom\s+['"](?P<target>[^'"]+)['"]"#),
            re(r#"^\s*import\s+['"](?P<target>[^'"]+)['"]"#),
            re(r#"\brequire\(\s*['"](?P<target>[^'"]+)['"]\s*\)"#),
        ],
        comment_prefixes: &["//", "/*", "*"],
    };
    m.insert("javascript", js());
    m.insert("typescript", js());
    m.insert(
        "rust",
        LanguagePatterns {
            definitions: vec![
                (
                    re(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum)\s+(?P<name>[A-Za-z_]\w*)"),
                    EntityKind::Class,
                ),
                (
                    re(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?trait\s+(?P<name>[A-Za-z_]\w*)"),
                    EntityKind::Interface,
                ),
                (
                    re(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(?P<name>[A-Za-z_]\w*)"),
                    EntityKind::Function,
                ),
            ],
            imports: vec![re(r"^\s*(?:pub\s+)?use\s+(?P<target>[\w:]+)")],
            comment_prefixes: &["//"],
        },
    );
    m.insert(
        "go",
        LanguagePatterns {
            definitions: vec![
                (re(r"^type\s+(?P<name>[A-Za-z_]\w*)\s+struct\b"), EntityKind::Class),
                (re(r"^type\s+(?P<name>[A-Za-z_]\w*)\s+interface\b"), EntityKind::Interface),
                (re(r"^func\s+\([^)]*\)\s*(?P<name>[A-Za-z_]\w*)\s*\("), EntityKind::Method),
                (re(r"^func\s+(?P<name>[A-Za-z_]\w*)\s*\("), EntityKind::Function),
            ],
            imports: vec![
                re(r#"^\s*import\s+(?:\w+\s+)?"(?P<target>[^"]+)""#),
                re(r#"^\s+(?:\w+\s+)?"(?P<target>[\w./-]+)"\s*$"#),
            ],
            comment_prefixes: &["//"],
        },
    );
    let jvm = |fn_keyword: &str| LanguagePatterns {
        definitions: vec![
            (
                re(r"^\s*(?:(?:public|private|protected|internal|abstract|final|static|sealed|open|data|partial)\s+)*(?:class|object|record|struct)\s+(?P<name>[A-Za-z_]\w*)"),
                EntityKind::Class,
            ),
            (
                re(r"^\s*(?:(?:public|private|protected|internal|sealed)\s+)*interface\s+(?P<name>[A-Za-z_]\w*)"),
                EntityKind::Interface,
            ),
            (
                re(&format!(
                    r"^\s*(?:(?:public|private|protected|internal|static|final|abstract|synchronized|override|async|virtual|suspend|open)\s+)*{fn_keyword}(?P<name>[A-Za-z_]\w*)\s*\([^;]*$"
                )),
                EntityKind::Method,
            ),
        ],
        imports: vec![
            re(r"^\s*import\s+(?:static\s+)?(?P<target>[\w.]+)"),
            re(r"^\s*using\s+(?P<target>[\w.]+)\s*;"),
        ],
        comment_prefixes: &["//", "/*", "*"],
    };
    // Java and C# methods have a return type before the name
    m.insert("java", jvm(r"[\w<>\[\],?]+\s+"));
    m.insert("csharp", jvm(r"[\w<>\[\],?]+\s+"));
    m.insert("kotlin", jvm(r"fun\s+(?:<[^>]*>\s*)?"));
    m.insert("scala", jvm(r"def\s+"));
    m.insert("swift", jvm(r"func\s+"));
    let c_like = || LanguagePatterns {
        definitions: vec![
            (re(r"^\s*(?:class|struct)\s+(?P<name>[A-Za-z_]\w*)\s*[:{]?\s*$"), EntityKind::Class),
            (
                re(r"^[A-Za-z_][\w\s\*&:<>,]*?[\s\*&]+(?P<name>[A-Za-z_][\w:]*)\s*\([^;]*$"),
                EntityKind::Function,
            ),
        ],
        imports: vec![re(r#"^\s*#\s*include\s+[<"](?P<target>[^>"]+)[>"]"#)],
        comment_prefixes: &["//", "/*", "*"],
    };
    m.insert("c", c_like());
    m.insert("cpp", c_like());
    m.insert(
        "ruby",
        LanguagePatterns {
            definitions: vec![
                (re(r"^\s*(?:class|module)\s+(?P<name>[A-Z]\w*)"), EntityKind::Class),
                (re(r"^\s*def\s+(?:self\.)?(?P<name>[A-Za-z_]\w*)"), EntityKind::Function),
            ],
            imports: vec![re(r#"^\s*require(?:_relative)?\s+['"](?P<target>[^'"]+)['"]"#)],
            comment_prefixes: &["#"],
        },
    );
    m.insert(
        "php",
        LanguagePatterns {
            definitions: vec![
                (
                    re(r"^\s*(?:(?:abstract|final)\s+)?class\s+(?P<name>[A-Za-z_]\w*)"),
                    EntityKind::Class,
                ),
                (re(r"^\s*interface\s+(?P<name>[A-Za-z_]\w*)"), EntityKind::Interface),
                (
                    re(r"^\s*(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+(?P<name>[A-Za-z_]\w*)"),
                    EntityKind::Function,
                ),
            ],
            imports: vec![re(r"^\s*use\s+(?P<target>[\w\\]+)\s*;")],
            comment_prefixes: &["//", "#", "/*", "*"],
        },
    );
    m
});

static CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(?P<receiver>[A-Za-z_]\w*)\s*(?:\.|::|->)\s*)?(?P<callee>[A-Za-z_]\w*)\s*\(").unwrap()
});
static ROUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:@|\b)(?:app|router|bp|blueprint|api)\.(?P<method>get|post|put|delete|patch|route)\(\s*['"](?P<path>[^'"]+)['"]"#)
        .unwrap()
});
static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*create\s+table\s+(?:if\s+not\s+exists\s+)?[`"\[]?(?P<name>\w+)"#).unwrap()
});
static COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*[`"\[]?(?P<name>\w+)[`"\]]?\s+(?P<ty>[A-Za-z]+(?:\s*\([^)]*\))?)"#).unwrap()
});
static REFERENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\breferences\s+[`"\[]?(?P<target>\w+)"#).unwrap());

/// Words that look like calls or definitions but are language syntax
const KEYWORDS: &[&str] = &[
    "if", "else", "elif", "for", "while", "switch", "match", "return", "catch", "sizeof",
    "function", "fn", "def", "class", "new", "typeof", "await", "yield", "assert", "print",
    "super", "self", "this", "not", "and", "or", "in", "with", "lambda", "async", "loop",
    "do", "try", "throw", "raise", "except", "import", "from", "delete", "void", "func",
];

const SQL_NON_COLUMNS: &[&str] = &["constraint", "primary", "foreign", "unique", "key", "index", "check"];

/// Regex-based facts scanner; runs on the blocking pool
#[derive(Debug, Clone, Default)]
pub struct PatternFactsProvider;

impl PatternFactsProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FactsProvider for PatternFactsProvider {
    async fn extract(&self, chunk: &Chunk) -> PipelineResult<StaticFacts> {
        let chunk = chunk.clone();
        tokio::task::spawn_blocking(move || scan_chunk(&chunk))
            .await
            .map_err(|e| PipelineError::stage("static", format!("facts scan failed: {e}")))
    }
}

struct Definition {
    name: String,
    kind: EntityKind,
    line: u32,
    indent: usize,
    signature: String,
    docstring: Option<String>,
}

/// Scan one chunk synchronously
pub fn scan_chunk(chunk: &Chunk) -> StaticFacts {
    if chunk.language == "sql" {
        return scan_sql(chunk);
    }
    let Some(patterns) = PATTERNS.get(chunk.language.as_str()) else {
        return StaticFacts::default();
    };

    let lines: Vec<&str> = chunk.content.lines().collect();
    let mut facts = StaticFacts::default();
    let mut definitions: Vec<Definition> = Vec::new();
    let mut routes: Vec<(String, String, u32)> = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let line_no = chunk.start_line + idx as u32;
        let trimmed = raw.trim_start();
        if trimmed.is_empty()
            || patterns
                .comment_prefixes
                .iter()
                .any(|prefix| trimmed.starts_with(prefix))
        {
            continue;
        }

        if let Some(caps) = ROUTE.captures(raw) {
            routes.push((
                caps["method"].to_ascii_uppercase(),
                caps["path"].to_string(),
                line_no,
            ));
        }

        if let Some(target) = patterns
            .imports
            .iter()
            .find_map(|re| re.captures(raw).map(|c| c["target"].to_string()))
        {
            facts.imports.push(ImportEdge {
                source_file: chunk.file_path.clone(),
                target,
                line: line_no,
            });
            continue;
        }

        let definition = patterns.definitions.iter().find_map(|(re, kind)| {
            let caps = re.captures(raw)?;
            let name = caps["name"].to_string();
            (!KEYWORDS.contains(&name.as_str())).then_some((name, *kind))
        });
        if let Some((name, kind)) = definition {
            let indent = raw.len() - trimmed.len();
            let kind = if kind == EntityKind::Function && indent > 0 && chunk.language == "python" {
                EntityKind::Method
            } else {
                kind
            };
            definitions.push(Definition {
                name,
                kind,
                line: line_no,
                indent,
                signature: truncate(raw.trim().trim_end_matches('{').trim_end(), 200),
                docstring: docstring_at(&lines, idx, &chunk.language),
            });
            continue;
        }

        for caps in CALL.captures_iter(raw) {
            let callee = &caps["callee"];
            if KEYWORDS.contains(&callee) || callee.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            facts.calls.push(CallEdge {
                caller_file: chunk.file_path.clone(),
                caller_line: line_no,
                callee: callee.to_string(),
                receiver: caps.name("receiver").map(|m| m.as_str().to_string()),
                confidence: ConfidenceLevel::Medium,
            });
        }
    }

    for (i, def) in definitions.iter().enumerate() {
        let end_line = definitions[i + 1..]
            .iter()
            .find(|next| next.indent <= def.indent)
            .map(|next| next.line.saturating_sub(1).max(def.line))
            .unwrap_or(chunk.end_line);
        facts.entities.push(CodeEntity {
            name: def.name.clone(),
            kind: def.kind,
            file_path: chunk.file_path.clone(),
            start_line: def.line,
            end_line,
            language: chunk.language.clone(),
            signature: Some(def.signature.clone()),
            docstring: def.docstring.clone(),
        });
    }

    for (method, path, line) in routes {
        let handler = definitions
            .iter()
            .find(|d| d.line >= line && d.kind.is_callable())
            .map(|d| d.name.clone());
        facts.endpoints.push(ApiEndpoint {
            method: if method == "ROUTE" { "GET".to_string() } else { method },
            path,
            handler_file: chunk.file_path.clone(),
            handler_line: line,
            handler_function: handler,
        });
    }

    facts
}

fn docstring_at(lines: &[&str], idx: usize, language: &str) -> Option<String> {
    if language == "python" {
        let next = lines.get(idx + 1)?.trim();
        let quote = ["\"\"\"", "'''"].into_iter().find(|q| next.starts_with(q))?;
        let text = next.trim_start_matches(quote).trim_end_matches(quote).trim();
        return (!text.is_empty()).then(|| text.to_string());
    }
    let prev = lines.get(idx.checked_sub(1)?)?.trim();
    let text = ["///", "//", "#", "*", "/**"]
        .into_iter()
        .find_map(|prefix| prev.strip_prefix(prefix))?
        .trim()
        .trim_end_matches("*/")
        .trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn scan_sql(chunk: &Chunk) -> StaticFacts {
    let mut facts = StaticFacts::default();
    let mut current: Option<SchemaFact> = None;

    for (idx, raw) in chunk.content.lines().enumerate() {
        let line_no = chunk.start_line + idx as u32;
        if let Some(caps) = CREATE_TABLE.captures(raw) {
            if let Some(done) = current.take() {
                facts.schemas.push(done);
            }
            current = Some(SchemaFact {
                name: caps["name"].to_string(),
                file_path: chunk.file_path.clone(),
                start_line: line_no,
                source_type: "sql".to_string(),
                attributes: Vec::new(),
                relationships: Vec::new(),
            });
            continue;
        }
        let Some(table) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = REFERENCES.captures(raw) {
            table.relationships.push(SchemaRelation {
                target_entity: caps["target"].to_string(),
                relation_type: "foreign_key".to_string(),
            });
        }
        if let Some(caps) = COLUMN.captures(raw) {
            let name = caps["name"].to_string();
            if !SQL_NON_COLUMNS.contains(&name.to_ascii_lowercase().as_str()) {
                table.attributes.push(SchemaAttribute {
                    name,
                    data_type: caps["ty"].to_string(),
                });
            }
        }
        if raw.trim_start().starts_with(')') {
            if let Some(done) = current.take() {
                facts.schemas.push(done);
            }
        }
    }
    if let Some(done) = current {
        facts.schemas.push(done);
    }
    facts
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python(content: &str) -> Chunk {
        let lines = content.lines().count() as u32;
        Chunk::new("app/greeter.py", "python", 1, lines, content)
    }

    #[tokio::test]
    async fn test_python_functions_classes_and_calls() {
        let chunk = python(
            "import os\nfrom app.models import User\n\nclass Greeter:\n    def hello(self, name):\n        \"\"\"Say hello.\"\"\"\n        return format_name(name)\n\ndef greet(name):\n    return Greeter().hello(name)\n",
        );
        let facts = PatternFactsProvider::new().extract(&chunk).await.unwrap();

        let names: Vec<_> = facts.entities.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("Greeter", EntityKind::Class),
                ("hello", EntityKind::Method),
                ("greet", EntityKind::Function),
            ]
        );
        let hello = &facts.entities[1];
        assert_eq!((hello.start_line, hello.end_line), (5, 8));
        assert_eq!(hello.docstring.as_deref(), Some("Say hello."));
        // Class body ends where the next top-level definition starts
        assert_eq!(facts.entities[0].end_line, 8);

        let imports: Vec<_> = facts.imports.iter().map(|i| i.target.as_str()).collect();
        assert_eq!(imports, vec!["os", "app.models"]);

        assert!(facts.calls.iter().any(|c| c.callee == "format_name" && c.caller_line == 7));
        assert!(facts
            .calls
            .iter()
            .any(|c| c.callee == "hello" && c.receiver.is_none() && c.caller_line == 10));
    }

    #[test]
    fn test_keywords_are_not_calls() {
        let facts = scan_chunk(&python("def f(x):\n    if (x):\n        return (x)\n"));
        assert!(facts.calls.is_empty());
    }

    #[test]
    fn test_line_numbers_are_absolute() {
        let chunk = Chunk::new("lib.rs", "rust", 41, 43, "use std::fmt;\n\npub fn render() {}");
        let facts = scan_chunk(&chunk);
        assert_eq!(facts.imports[0].line, 41);
        assert_eq!(facts.entities[0].name, "render");
        assert_eq!(facts.entities[0].start_line, 43);
    }

    #[test]
    fn test_go_methods_and_structs() {
        let chunk = Chunk::new(
            "svc.go",
            "go",
            1,
            4,
            "type Service struct {}\nfunc (s *Service) Run() error {\n\treturn nil\n}\n",
        );
        let facts = scan_chunk(&chunk);
        let kinds: Vec<_> = facts.entities.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            kinds,
            vec![("Service", EntityKind::Class), ("Run", EntityKind::Method)]
        );
    }

    #[test]
    fn test_routes_become_endpoints() {
        let facts = scan_chunk(&python(
            "@app.post(\"/orders\")\ndef create_order(req):\n    return save(req)\n",
        ));
        assert_eq!(facts.endpoints.len(), 1);
        let endpoint = &facts.endpoints[0];
        assert_eq!(endpoint.method, "POST");
        assert_eq!(endpoint.path, "/orders");
        assert_eq!(endpoint.handler_function.as_deref(), Some("create_order"));
    }

    #[test]
    fn test_sql_tables() {
        let chunk = Chunk::new(
            "schema.sql",
            "sql",
            1,
            6,
            "CREATE TABLE orders (\n  id INTEGER PRIMARY KEY,\n  user_id INTEGER REFERENCES users(id),\n  total DECIMAL(10,2),\n  PRIMARY KEY (id)\n);",
        );
        let facts = scan_chunk(&chunk);
        assert_eq!(facts.schemas.len(), 1);
        let table = &facts.schemas[0];
        assert_eq!(table.name, "orders");
        let columns: Vec<_> = table.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(columns, vec!["id", "user_id", "total"]);
        assert_eq!(table.relationships[0].target_entity, "users");
    }

    #[test]
    fn test_unknown_language_yields_nothing() {
        let chunk = Chunk::new("notes.md", "markdown", 1, 1, "# greet()");
        assert!(scan_chunk(&chunk).is_empty());
    }
}
