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

//! Template renderers, one per built-in section
//!
//! Each renderer reads the knowledge graph and reasoning graph only and
//! returns markdown plus the citations it drew from.

use super::markdown::{bullets, cell, clip, code, mermaid_id, table};
use super::{Rendered, SectionContext};
use repograph_core::graph::InferredRule;
use repograph_core::{Citation, EntityKind, GraphEntity, Provenance, RelationshipKind, Severity};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// Confidence of a section rendered without any supporting entity
const EMPTY_SECTION_CONFIDENCE: f64 = 0.5;
const MAX_DIAGRAM_EDGES: usize = 40;
const MAX_NAMES_PER_ROW: usize = 8;

const VULNERABILITY_KEYWORDS: &[&str] = &[
    "eval", "exec", "system", "popen", "subprocess", "shell", "pickle", "deserialize", "unsafe",
    "raw_sql", "sql", "inject",
];
const SENSITIVE_KEYWORDS: &[&str] = &["password", "secret", "key", "token", "credential", "private"];
const AUTH_KEYWORDS: &[&str] = &["auth", "login", "logout", "session", "permission", "role"];
const HANDLER_KEYWORDS: &[&str] = &["route", "handler", "endpoint", "view"];
const SERVICE_KEYWORDS: &[&str] = &["service", "repository", "handler", "controller"];

fn citation(entity: &GraphEntity) -> Citation {
    Citation::new(
        entity.file_path.clone(),
        entity.start_line.max(1),
        entity.end_line.max(entity.start_line).max(1),
    )
}

fn average_confidence(entities: &[&GraphEntity]) -> f64 {
    if entities.is_empty() {
        return EMPTY_SECTION_CONFIDENCE;
    }
    entities.iter().map(|e| e.confidence.value).sum::<f64>() / entities.len() as f64
}

fn rendered(markdown: String, entities: &[&GraphEntity]) -> Rendered {
    Rendered {
        markdown,
        citations: entities.iter().map(|e| citation(e)).collect(),
        context_items: entities.len(),
        base_confidence: average_confidence(entities),
    }
}

fn callables(ctx: &SectionContext) -> Vec<&GraphEntity> {
    ctx.intelligence
        .graph
        .sorted_entities()
        .into_iter()
        .filter(|e| e.kind.is_callable())
        .collect()
}

fn name_has_any(entity: &GraphEntity, keywords: &'static [&'static str]) -> Option<&'static str> {
    let lower = entity.name.to_ascii_lowercase();
    keywords.iter().copied().find(|k| lower.contains(k))
}

fn location(entity: &GraphEntity) -> String {
    code(&format!("{}:{}", entity.file_path, entity.start_line))
}

pub fn executive_overview(ctx: &SectionContext) -> Rendered {
    let graph = &ctx.intelligence.graph;
    let reasoning = &ctx.intelligence.reasoning;
    let entities = graph.sorted_entities();
    let stats = graph.stats();

    let mut md = String::from("# Executive Overview\n\n## Summary\n\n");
    match reasoning.purposes().next() {
        Some(purpose) => {
            let _ = writeln!(md, "{}\n", purpose.statement.trim());
        }
        None => md.push_str("No narrative summary is available for this codebase.\n\n"),
    }

    let languages = if ctx.languages.is_empty() {
        "none detected".to_string()
    } else {
        ctx.languages
            .iter()
            .map(|(lang, files)| format!("{lang} ({files})"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let cross_validated = entities
        .iter()
        .filter(|e| e.confidence.provenance == Provenance::CrossValidated)
        .count();

    md.push_str("## At a Glance\n\n");
    md.push_str(&bullets([
        format!("**Entities:** {}", stats.entities),
        format!("**Cross-validated entities:** {cross_validated}"),
        format!("**Files:** {}", stats.files),
        format!("**Languages:** {languages}"),
        format!("**Relationships:** {}", stats.relationships),
        format!("**Business rules:** {}", reasoning.rule_count()),
        format!("**Workflows:** {}", reasoning.workflow_count()),
        format!("**Risks:** {}", reasoning.risk_count()),
    ]));

    let components: Vec<String> = reasoning
        .purposes()
        .take(5)
        .map(|p| format!("{}: {}", code(&p.entity_id), cell(&p.statement)))
        .collect();
    if !components.is_empty() {
        md.push_str("\n## Key Components\n\n");
        md.push_str(&bullets(components));
    }

    rendered(md, &entities)
}

pub fn features(ctx: &SectionContext) -> Rendered {
    let reasoning = &ctx.intelligence.reasoning;
    let functions = callables(ctx);
    let mut by_file: BTreeMap<&str, Vec<&GraphEntity>> = BTreeMap::new();
    for entity in &functions {
        by_file.entry(entity.file_path.as_str()).or_default().push(*entity);
    }

    let mut md = String::from("# Main Application Features\n\n");
    let _ = writeln!(
        md,
        "Capabilities discovered from {} functions across {} files.\n",
        functions.len(),
        by_file.len()
    );

    md.push_str("## Feature Areas\n\n");
    if by_file.is_empty() {
        md.push_str("No functions or methods were discovered.\n\n");
    } else {
        let rows: Vec<Vec<String>> = by_file
            .iter()
            .map(|(file, members)| {
                let purpose = reasoning
                    .purpose(file)
                    .map(|p| cell(&p.statement))
                    .unwrap_or_else(|| "-".to_string());
                let mut names: Vec<String> = members
                    .iter()
                    .take(MAX_NAMES_PER_ROW)
                    .map(|e| cell(&e.name))
                    .collect();
                if members.len() > MAX_NAMES_PER_ROW {
                    names.push(format!("+{} more", members.len() - MAX_NAMES_PER_ROW));
                }
                vec![code(file), purpose, names.join(", ")]
            })
            .collect();
        md.push_str(&table(&["File", "Purpose", "Entities"], &rows));
        md.push('\n');
    }

    if !functions.is_empty() {
        let mut sorted = functions.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then(a.file_path.cmp(&b.file_path)));
        let rows: Vec<Vec<String>> = sorted
            .iter()
            .map(|e| {
                vec![
                    code(&e.name),
                    code(&e.file_path),
                    code(e.signature.as_deref().unwrap_or("")),
                ]
            })
            .collect();
        md.push_str("## Functions\n\n");
        md.push_str(&table(&["Name", "File", "Signature"], &rows));
    }

    rendered(md, &functions)
}

pub fn system_overview(ctx: &SectionContext) -> Rendered {
    let graph = &ctx.intelligence.graph;
    let entities = graph.sorted_entities();

    let mut dirs: BTreeMap<String, BTreeMap<&str, usize>> = BTreeMap::new();
    for entity in &entities {
        let dir = entity
            .file_path
            .rsplit_once('/')
            .map(|(dir, _)| format!("{dir}/"))
            .unwrap_or_else(|| "./".to_string());
        *dirs
            .entry(dir)
            .or_default()
            .entry(entity.file_path.as_str())
            .or_insert(0) += 1;
    }

    let mut md = String::from("# System Overview\n\n## Module Tree\n\n");
    if dirs.is_empty() {
        md.push_str("No modules were discovered.\n");
    }
    for (dir, files) in &dirs {
        let _ = writeln!(md, "- {}", code(dir));
        for (file, count) in files {
            let noun = if *count == 1 { "entity" } else { "entities" };
            let _ = writeln!(md, "  - {} ({count} {noun})", code(file));
        }
    }

    md.push_str("\n## Architecture Diagram\n\n```mermaid\ngraph TD\n");
    let mut nodes: BTreeSet<String> = BTreeSet::new();
    let mut edges = Vec::new();
    for rel in graph
        .relationships()
        .iter()
        .filter(|r| matches!(r.kind, RelationshipKind::Calls | RelationshipKind::Imports))
        .take(MAX_DIAGRAM_EDGES)
    {
        for id in [&rel.source_id, &rel.target_id] {
            let label = graph.entity(id).map(|e| e.name.as_str()).unwrap_or(id.as_str());
            nodes.insert(format!(
                "    {}[\"{}\"]",
                mermaid_id(id),
                label.replace('"', "'")
            ));
        }
        let arrow = if rel.kind == RelationshipKind::Calls {
            "-->|calls|"
        } else {
            "-.->|imports|"
        };
        edges.push(format!(
            "    {} {} {}",
            mermaid_id(&rel.source_id),
            arrow,
            mermaid_id(&rel.target_id)
        ));
    }
    if edges.is_empty() {
        md.push_str("    empty[\"No relationships discovered\"]\n");
    }
    for line in nodes.iter().chain(edges.iter()) {
        md.push_str(line);
        md.push('\n');
    }
    md.push_str("```\n");

    rendered(md, &entities)
}

pub fn data_models(ctx: &SectionContext) -> Rendered {
    let graph = &ctx.intelligence.graph;
    let models: Vec<&GraphEntity> = graph
        .sorted_entities()
        .into_iter()
        .filter(|e| matches!(e.kind, EntityKind::Class | EntityKind::Table))
        .collect();

    let mut md = String::from("# Data Models\n\n");
    if models.is_empty() {
        md.push_str("No data model entities (class, table) discovered in the codebase.\n");
        return rendered(md, &models);
    }

    let rows: Vec<Vec<String>> = models
        .iter()
        .map(|e| {
            vec![
                code(&e.name),
                e.kind.to_string(),
                location(e),
                cell(e.description.as_deref().unwrap_or("-")),
            ]
        })
        .collect();
    md.push_str("## Entities\n\n");
    md.push_str(&table(&["Name", "Kind", "Location", "Description"], &rows));

    let ids: BTreeSet<&str> = models.iter().map(|e| e.id.as_str()).collect();
    let references: Vec<String> = graph
        .relationships()
        .iter()
        .filter(|r| r.kind == RelationshipKind::References && ids.contains(r.source_id.as_str()))
        .map(|r| {
            let source = graph.entity(&r.source_id).map(|e| e.name.as_str()).unwrap_or(r.source_id.as_str());
            let target = graph
                .entity(&r.target_id)
                .map(|e| e.name.as_str())
                .unwrap_or_else(|| r.target_id.rsplit(':').next().unwrap_or(r.target_id.as_str()));
            match &r.context {
                Some(kind) => format!("{} references {} ({})", code(source), code(target), kind),
                None => format!("{} references {}", code(source), code(target)),
            }
        })
        .collect();
    if !references.is_empty() {
        md.push_str("\n## Relationships\n\n");
        md.push_str(&bullets(references));
    }

    rendered(md, &models)
}

pub fn api_specs(ctx: &SectionContext) -> Rendered {
    let graph = &ctx.intelligence.graph;
    let mut endpoints = graph.entities_of_kind(EntityKind::Endpoint);
    endpoints.sort_by(|a, b| a.name.cmp(&b.name));
    let handlers: Vec<&GraphEntity> = callables(ctx)
        .into_iter()
        .filter(|e| name_has_any(e, HANDLER_KEYWORDS).is_some())
        .collect();

    let mut md = String::from("# API Specifications\n\n## Endpoints\n\n");
    if endpoints.is_empty() {
        md.push_str("No HTTP endpoints were declared in the analyzed code.\n");
    } else {
        let rows: Vec<Vec<String>> = endpoints
            .iter()
            .map(|e| {
                let (method, path) = e.name.split_once(' ').unwrap_or(("-", e.name.as_str()));
                vec![
                    method.to_string(),
                    code(path),
                    code(e.signature.as_deref().unwrap_or("")),
                    location(e),
                ]
            })
            .collect();
        md.push_str(&table(&["Method", "Path", "Handler", "Location"], &rows));
    }

    md.push_str("\n## Route Handlers\n\n");
    if handlers.is_empty() {
        md.push_str("No route handler functions were identified by name.\n");
    } else {
        let rows: Vec<Vec<String>> = handlers
            .iter()
            .map(|e| vec![code(&e.name), location(e), code(e.signature.as_deref().unwrap_or(""))])
            .collect();
        md.push_str(&table(&["Name", "Location", "Signature"], &rows));
    }

    let cited: Vec<&GraphEntity> = endpoints.iter().chain(handlers.iter()).copied().collect();
    rendered(md, &cited)
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 0,
        Severity::High => 1,
        Severity::Medium => 2,
        Severity::Low => 3,
    }
}

pub fn security_considerations(ctx: &SectionContext) -> Rendered {
    let graph = &ctx.intelligence.graph;
    let reasoning = &ctx.intelligence.reasoning;
    let entities = graph.sorted_entities();

    let vulnerable: Vec<(&GraphEntity, &str)> = entities
        .iter()
        .filter(|e| e.kind.is_callable())
        .filter_map(|e| name_has_any(e, VULNERABILITY_KEYWORDS).map(|k| (*e, k)))
        .collect();
    let sensitive: Vec<(&GraphEntity, &str)> = entities
        .iter()
        .filter_map(|e| name_has_any(e, SENSITIVE_KEYWORDS).map(|k| (*e, k)))
        .collect();
    let auth = entities
        .iter()
        .filter(|e| name_has_any(e, AUTH_KEYWORDS).is_some())
        .count();
    let validation_rules = reasoning
        .rules()
        .filter(|r| matches!(r.rule_type.as_str(), "validation" | "access_control"))
        .count();
    let mut risks: Vec<_> = reasoning.risks().collect();
    risks.sort_by_key(|r| (severity_rank(r.severity), r.file_path.clone(), r.line));

    let mut md = String::from("# Security Considerations\n\n## Potential Vulnerabilities\n\n");
    if vulnerable.is_empty() {
        md.push_str("No functions matched known dangerous-operation patterns.\n");
    } else {
        let rows: Vec<Vec<String>> = vulnerable
            .iter()
            .map(|(e, keyword)| vec![code(&e.name), location(e), code(keyword)])
            .collect();
        md.push_str(&table(&["Name", "Location", "Pattern"], &rows));
    }

    md.push_str("\n## Sensitive Data Handling\n\n");
    if sensitive.is_empty() {
        md.push_str("No identifiers suggest direct handling of secrets or credentials.\n");
    } else {
        let rows: Vec<Vec<String>> = sensitive
            .iter()
            .map(|(e, keyword)| vec![code(&e.name), e.kind.to_string(), location(e), code(keyword)])
            .collect();
        md.push_str(&table(&["Name", "Kind", "Location", "Pattern"], &rows));
    }

    if !risks.is_empty() {
        md.push_str("\n## LLM-Detected Risks\n\n");
        let rows: Vec<Vec<String>> = risks
            .iter()
            .map(|r| {
                vec![
                    format!("{:?}", r.severity).to_ascii_lowercase(),
                    cell(&r.title),
                    code(&format!("{}:{}", r.file_path, r.line)),
                    cell(r.recommendations.first().map(String::as_str).unwrap_or("-")),
                ]
            })
            .collect();
        md.push_str(&table(&["Severity", "Title", "Location", "Recommendation"], &rows));
    }

    md.push_str("\n## Coverage Summary\n\n");
    md.push_str(&bullets([
        format!("Authentication-related entities: {auth}"),
        format!("Validation and access rules: {validation_rules}"),
        format!("Potential vulnerabilities flagged: {}", vulnerable.len()),
        format!("Sensitive identifiers: {}", sensitive.len()),
        format!("Model-detected risks: {}", risks.len()),
    ]));

    let cited: Vec<&GraphEntity> = vulnerable
        .iter()
        .chain(sensitive.iter())
        .map(|(e, _)| *e)
        .collect();
    let mut out = rendered(md, &cited);
    out.citations.extend(
        risks
            .iter()
            .filter(|r| r.line > 0)
            .map(|r| Citation::new(r.file_path.clone(), r.line, r.line)),
    );
    out.context_items += risks.len();
    out
}

fn story_outcome(rule: &InferredRule) -> String {
    let mapped = match rule.rule_type.as_str() {
        "validation" => "the data I submit is always valid",
        "pricing" => "charges are calculated correctly",
        "workflow" => "my work moves through the right steps",
        "access_control" => "only authorized people can act on my behalf",
        "data_constraint" => "records stay consistent",
        _ if !rule.consequence.trim().is_empty() => return lower_first(rule.consequence.trim()),
        _ => "the system behaves predictably",
    };
    mapped.to_string()
}

fn lower_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn user_stories(ctx: &SectionContext) -> Rendered {
    let reasoning = &ctx.intelligence.reasoning;
    let graph = &ctx.intelligence.graph;

    let mut md = String::from("# User Stories\n\n## From Business Rules\n\n");
    let rules: Vec<&InferredRule> = reasoning.rules().collect();
    if rules.is_empty() {
        md.push_str("No business rules were extracted, so no user stories could be derived.\n");
    }
    for rule in &rules {
        let want = lower_first(rule.rule_text.trim().trim_end_matches('.'));
        let _ = writeln!(
            md,
            "- **As a** user, **I want** {}, **so that** {}.",
            want,
            story_outcome(rule)
        );
    }

    let workflows: Vec<_> = reasoning.workflows().collect();
    if !workflows.is_empty() {
        md.push_str("\n## From Workflows\n\n");
        for workflow in &workflows {
            let steps: Vec<String> = workflow
                .steps
                .iter()
                .skip(1)
                .map(|s| {
                    graph
                        .entity(&s.entity_id)
                        .map(|e| code(&e.name))
                        .unwrap_or_else(|| code(&s.entity_id))
                })
                .collect();
            let _ = writeln!(
                md,
                "- **As a** user, **I want** {} to run end to end ({}).",
                code(&workflow.name),
                steps.join(" then ")
            );
        }
    }

    let entities: Vec<&GraphEntity> = workflows
        .iter()
        .filter_map(|w| w.steps.first())
        .filter_map(|s| graph.entity(&s.entity_id))
        .collect();
    let mut out = rendered(md, &entities);
    out.citations.extend(
        rules
            .iter()
            .filter(|r| r.line_start > 0)
            .map(|r| Citation::new(r.file_path.clone(), r.line_start, r.line_end.max(r.line_start))),
    );
    out.context_items += rules.len();
    if entities.is_empty() && !rules.is_empty() {
        out.base_confidence =
            rules.iter().map(|r| r.confidence.value).sum::<f64>() / rules.len() as f64;
    }
    out
}

pub fn interfaces(ctx: &SectionContext) -> Rendered {
    let graph = &ctx.intelligence.graph;
    let protocols: Vec<&GraphEntity> = graph.entities_of_kind(EntityKind::Interface);
    let services: Vec<&GraphEntity> = graph
        .entities_of_kind(EntityKind::Class)
        .into_iter()
        .filter(|e| name_has_any(e, SERVICE_KEYWORDS).is_some())
        .collect();

    let mut md = String::from("# Interface Specifications\n\n## Interfaces / Protocols\n\n");
    if protocols.is_empty() {
        md.push_str("No interfaces, traits or protocols were declared.\n");
    } else {
        let rows: Vec<Vec<String>> = protocols
            .iter()
            .map(|e| {
                vec![
                    code(&e.name),
                    location(e),
                    cell(&clip(e.description.as_deref().unwrap_or("-"), 120)),
                ]
            })
            .collect();
        md.push_str(&table(&["Name", "Location", "Description"], &rows));
    }

    md.push_str("\n## Service Boundaries\n\n");
    if services.is_empty() {
        md.push_str("No service, repository, handler or controller classes were found.\n");
    } else {
        let rows: Vec<Vec<String>> = services
            .iter()
            .map(|e| {
                let dependents = graph.callers(&e.id, 1).len();
                vec![code(&e.name), location(e), dependents.to_string()]
            })
            .collect();
        md.push_str(&table(&["Name", "Location", "Direct callers"], &rows));
    }

    let cited: Vec<&GraphEntity> = protocols.iter().chain(services.iter()).copied().collect();
    rendered(md, &cited)
}
