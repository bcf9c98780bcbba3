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

//! Builds the knowledge and reasoning graphs from reconciled findings.

use super::reasoning::{
    InferredRisk, InferredRule, Purpose, ReasoningGraph, Workflow, WorkflowStep,
};
use super::KnowledgeGraph;
use crate::analysis::ModelAnalysis;
use crate::entity::{
    confidence, entity_id, Confidence, GraphEntity, GraphRelationship, Provenance,
    RelationshipKind,
};
use crate::error::CoreResult;
use crate::facts::{ApiEndpoint, CallEdge, ConfidenceLevel, EntityKind, StaticFacts};
use crate::validation::ValidationReport;
use std::collections::HashMap;

const ID_HEX_LENGTH: usize = 12;
/// Assumed extent of an entity whose end line is unknown
const OPEN_RANGE_LINES: u32 = 1000;
const LOW_CALL_WEIGHT: f64 = 0.6;

/// The graph pair handed to section generation and retrieval
#[derive(Debug, Clone, Default)]
pub struct IntelligenceModel {
    pub project_id: String,
    pub graph: KnowledgeGraph,
    pub reasoning: ReasoningGraph,
}

pub fn build_intelligence_model(
    project_id: &str,
    report: &ValidationReport,
    facts: &StaticFacts,
    model: &ModelAnalysis,
) -> CoreResult<IntelligenceModel> {
    let mut graph = KnowledgeGraph::new();

    for validated in &report.entities {
        graph.add_entity(validated.clone().into_graph_entity())?;
    }

    for edge in &facts.calls {
        let Some(source_id) = resolve_caller(&graph, edge) else {
            continue;
        };
        let Some(target_id) = resolve_callee(&graph, edge) else {
            continue;
        };
        let weight = if edge.confidence == ConfidenceLevel::High {
            1.0
        } else {
            LOW_CALL_WEIGHT
        };
        graph.add_relationship(
            GraphRelationship::new(
                format!("call:{}:{}", source_id, target_id),
                source_id,
                target_id,
                RelationshipKind::Calls,
            )
            .with_weight(weight),
        )?;
    }

    for import in &facts.imports {
        let source_id = graph
            .entities_in_file(&import.source_file)
            .first()
            .map(|e| e.id.clone())
            .unwrap_or_else(|| import.source_file.clone());
        graph.add_relationship(GraphRelationship::new(
            format!("import:{}:{}", source_id, import.target),
            source_id,
            import.target.clone(),
            RelationshipKind::Imports,
        ))?;
    }

    for endpoint in &facts.endpoints {
        add_endpoint(&mut graph, endpoint)?;
    }

    let schema_ids: HashMap<&str, String> = facts
        .schemas
        .iter()
        .map(|s| (s.name.as_str(), entity_id(&s.file_path, &format!("table:{}", s.name))))
        .collect();

    for schema in &facts.schemas {
        let schema_id = entity_id(&schema.file_path, &format!("table:{}", schema.name));
        let extra = schema.attributes.len().saturating_sub(5);
        let more = format!("(+{} more)", extra);
        let mut summary: Vec<&str> = schema
            .attributes
            .iter()
            .take(5)
            .map(|a| a.name.as_str())
            .collect();
        if extra > 0 {
            summary.push(&more);
        }
        let description = if summary.is_empty() {
            schema.source_type.clone()
        } else {
            format!("{}: {}", schema.source_type, summary.join(", "))
        };

        graph.add_entity(GraphEntity {
            id: schema_id.clone(),
            name: schema.name.clone(),
            kind: EntityKind::Table,
            file_path: schema.file_path.clone(),
            start_line: schema.start_line,
            end_line: schema.start_line,
            language: String::new(),
            signature: None,
            description: Some(description),
            confidence: Confidence::new(
                confidence::RELATIONSHIP_DEFAULT,
                Provenance::Deterministic,
                format!("Extracted from {}", schema.source_type),
            ),
        })?;

        for relation in &schema.relationships {
            let target_id = schema_ids
                .get(relation.target_entity.as_str())
                .cloned()
                .unwrap_or_else(|| {
                    entity_id(&schema.file_path, &format!("table:{}", relation.target_entity))
                });
            graph.add_relationship(
                GraphRelationship::new(
                    format!("schema_ref:{}:{}", schema_id, target_id),
                    schema_id.clone(),
                    target_id,
                    RelationshipKind::References,
                )
                .with_context(relation.relation_type.clone()),
            )?;
        }
    }

    let mut reasoning = ReasoningGraph::new();
    populate_reasoning(&mut reasoning, model);
    infer_workflows(&graph, &mut reasoning);

    let stats = graph.stats();
    tracing::info!(
        project_id,
        entities = stats.entities,
        relationships = stats.relationships,
        dangling = stats.dangling_targets,
        purposes = reasoning.purpose_count(),
        rules = reasoning.rule_count(),
        workflows = reasoning.workflow_count(),
        "Built intelligence model"
    );

    Ok(IntelligenceModel {
        project_id: project_id.to_string(),
        graph,
        reasoning,
    })
}

fn is_code(entity: &GraphEntity) -> bool {
    !matches!(
        entity.kind,
        EntityKind::BusinessRule | EntityKind::Table | EntityKind::Endpoint
    )
}

/// Innermost code entity in the caller's file whose range contains the
/// call line, falling back to the first entity in that file.
fn resolve_caller(graph: &KnowledgeGraph, edge: &CallEdge) -> Option<String> {
    let candidates: Vec<&GraphEntity> = graph
        .entities_in_file(&edge.caller_file)
        .into_iter()
        .filter(|e| is_code(e))
        .collect();

    candidates
        .iter()
        .filter(|e| {
            let end = if e.end_line > 0 {
                e.end_line
            } else {
                e.start_line + OPEN_RANGE_LINES
            };
            e.start_line <= edge.caller_line && edge.caller_line <= end
        })
        .min_by_key(|e| e.end_line.saturating_sub(e.start_line))
        .or_else(|| candidates.first())
        .map(|e| e.id.clone())
}

/// Qualified `receiver.callee` match, then same-file, then any file.
fn resolve_callee(graph: &KnowledgeGraph, edge: &CallEdge) -> Option<String> {
    if let Some(receiver) = &edge.receiver {
        let qualified = format!("{}.{}", receiver, edge.callee);
        if let Some(e) = graph.entities_named(&qualified).into_iter().find(|e| is_code(e)) {
            return Some(e.id.clone());
        }
    }

    let named: Vec<&GraphEntity> = graph
        .entities_named(&edge.callee)
        .into_iter()
        .filter(|e| is_code(e))
        .collect();
    named
        .iter()
        .find(|e| e.file_path == edge.caller_file)
        .or_else(|| named.first())
        .map(|e| e.id.clone())
}

fn add_endpoint(graph: &mut KnowledgeGraph, endpoint: &ApiEndpoint) -> CoreResult<()> {
    let id = entity_id(
        &endpoint.handler_file,
        &format!("{}_{}", endpoint.method, endpoint.path),
    );
    let handler_id = endpoint.handler_function.as_ref().and_then(|handler| {
        graph
            .entities_named(handler)
            .into_iter()
            .find(|e| e.file_path == endpoint.handler_file)
            .map(|e| e.id.clone())
    });

    graph.add_entity(GraphEntity {
        id: id.clone(),
        name: format!("{} {}", endpoint.method, endpoint.path),
        kind: EntityKind::Endpoint,
        file_path: endpoint.handler_file.clone(),
        start_line: endpoint.handler_line,
        end_line: endpoint.handler_line,
        language: String::new(),
        signature: endpoint.handler_function.clone(),
        description: Some(format!("{} {}", endpoint.method, endpoint.path)),
        confidence: Confidence::new(
            confidence::RELATIONSHIP_DEFAULT,
            Provenance::Deterministic,
            "Discovered from route declaration",
        ),
    })?;

    if let Some(handler_id) = handler_id {
        graph.add_relationship(GraphRelationship::new(
            format!("route:{}:{}", id, handler_id),
            id,
            handler_id,
            RelationshipKind::Uses,
        ))?;
    }
    Ok(())
}

fn short_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    let digest = hex::encode(hasher.finalize().as_bytes());
    format!("{}:{}", prefix, &digest[..ID_HEX_LENGTH])
}

fn level_confidence(level: ConfidenceLevel, explanation: String) -> Confidence {
    Confidence::new(level.score(), Provenance::Probabilistic, explanation)
}

/// Copy model findings in, dropping anything the model marked low-confidence
fn populate_reasoning(reasoning: &mut ReasoningGraph, model: &ModelAnalysis) {
    let mut filtered = 0usize;

    for narrative in &model.narratives {
        if narrative.confidence == ConfidenceLevel::Low {
            filtered += 1;
            continue;
        }
        if narrative.purpose.trim().is_empty() {
            continue;
        }
        reasoning.add_purpose(Purpose {
            entity_id: narrative.file_path.clone(),
            statement: narrative.purpose.clone(),
            confidence: level_confidence(
                narrative.confidence,
                format!("Narrated: {}", narrative.confidence),
            ),
        });
    }

    for rule in &model.rules {
        if rule.confidence == ConfidenceLevel::Low {
            filtered += 1;
            continue;
        }
        reasoning.add_rule(InferredRule {
            id: short_id("rule", &[&rule.file_path, &rule.rule_text]),
            rule_text: rule.rule_text.clone(),
            rule_type: rule.rule_type.clone(),
            condition: rule.condition.clone(),
            consequence: rule.consequence.clone(),
            file_path: rule.file_path.clone(),
            line_start: rule.line_start,
            line_end: rule.line_end,
            confidence: level_confidence(
                rule.confidence,
                format!("Extracted rule: {}", rule.confidence),
            ),
        });
    }

    for risk in &model.risks {
        if risk.confidence == ConfidenceLevel::Low {
            filtered += 1;
            continue;
        }
        reasoning.add_risk(InferredRisk {
            id: short_id("risk", &[&risk.file_path, &risk.title, &risk.line.to_string()]),
            title: risk.title.clone(),
            risk_type: risk.risk_type.clone(),
            severity: risk.severity,
            description: risk.description.clone(),
            file_path: risk.file_path.clone(),
            line: risk.line,
            recommendations: risk.recommendations.clone(),
            confidence: level_confidence(
                risk.confidence,
                format!("Detected risk: {}", risk.confidence),
            ),
        });
    }

    if filtered > 0 {
        tracing::info!(filtered, "Dropped low-confidence model findings");
    }
}

/// A callable with two or more direct callees becomes a workflow
fn infer_workflows(graph: &KnowledgeGraph, reasoning: &mut ReasoningGraph) {
    for entity in graph.sorted_entities() {
        if !entity.kind.is_callable() {
            continue;
        }
        let callees = graph.callees(&entity.id, 1);
        if callees.len() < 2 {
            continue;
        }

        let mut steps = vec![WorkflowStep {
            order: 0,
            entity_id: entity.id.clone(),
            description: format!("Entry: {}", entity.name),
        }];
        steps.extend(callees.iter().enumerate().map(|(i, callee)| WorkflowStep {
            order: i + 1,
            entity_id: callee.id.clone(),
            description: format!("Calls {}", callee.name),
        }));

        reasoning.add_workflow(Workflow {
            id: format!("workflow:{}", entity.id),
            name: format!("{} workflow", entity.name),
            description: format!("{} calls {} functions", entity.name, callees.len()),
            steps,
            confidence: Confidence::new(
                confidence::WORKFLOW,
                Provenance::Deterministic,
                "Inferred from call chain",
            ),
        });
    }
}
