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

//! Section generation
//!
//! Sections are produced by [`SectionGenerator`]s looked up by name in a
//! [`SectionRegistry`]. [`generate_gated`] runs one generator against the
//! quality gate, re-invoking it with the gate's feedback until it passes
//! or the attempt budget is spent; the last attempt is kept either way.

pub mod markdown;
pub mod templates;

use crate::error::PipelineResult;
use async_trait::async_trait;
use repograph_core::config::QualityConfig;
use repograph_core::{Citation, IntelligenceModel};
use repograph_llm::{strip_code_fence, ChatMessage, GuardedModels, LlmResult};
use repograph_quality::{
    evaluate_section_gate, gate_low_confidence_output, gated_confidence, GateResult,
    SectionGateConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Confidence of a synthesized section backed by enough context
const SYNTHESIS_CONFIDENCE: f64 = 0.90;
/// Confidence of a synthesized section with thin context
const SYNTHESIS_THIN_CONFIDENCE: f64 = 0.80;
const SYNTHESIS_MIN_CONTEXT: usize = 3;
const MAX_ERROR_CHARS: usize = 200;

/// Read-only inputs shared by every section of a run
#[derive(Clone)]
pub struct SectionContext {
    pub project_id: String,
    pub intelligence: Arc<IntelligenceModel>,
    /// Language tag -> file count
    pub languages: BTreeMap<String, usize>,
}

/// Template output before synthesis
#[derive(Debug, Clone)]
pub struct Rendered {
    pub markdown: String,
    pub citations: Vec<Citation>,
    /// Graph items the template drew from
    pub context_items: usize,
    pub base_confidence: f64,
}

/// One generator attempt, not yet gated
#[derive(Debug, Clone)]
pub struct SectionDraft {
    pub content: String,
    pub confidence: f64,
    pub citations: Vec<Citation>,
}

/// A finished section as returned to the caller and persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSection {
    pub name: String,
    pub title: String,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateResult>,
    /// Failed its gate or could not be generated
    pub degraded: bool,
    /// Content carries the low-confidence prefix
    pub low_confidence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeneratedSection {
    /// Stand-in for a section whose generator never produced content
    pub fn placeholder(name: &str, title: &str, error: &str, attempts: u32) -> Self {
        let error: String = error.chars().take(MAX_ERROR_CHARS).collect();
        Self {
            name: name.to_string(),
            title: title.to_string(),
            content: format!(
                "# {title}\n\n*This section could not be generated. Error: {error}*\n"
            ),
            confidence: 0.0,
            citations: Vec::new(),
            attempts,
            gate: None,
            degraded: true,
            low_confidence: true,
            error: Some(error),
        }
    }
}

#[async_trait]
pub trait SectionGenerator: Send + Sync {
    fn name(&self) -> &str;

    fn title(&self) -> &str;

    /// Produce one draft. `feedback` is the previous attempt's failed gate.
    async fn generate(
        &self,
        ctx: &SectionContext,
        feedback: Option<&GateResult>,
    ) -> PipelineResult<SectionDraft>;
}

/// Rewrites template output into prose through the completion chain
pub struct SectionSynthesizer {
    models: Arc<GuardedModels>,
}

impl SectionSynthesizer {
    pub fn new(models: Arc<GuardedModels>) -> Self {
        Self { models }
    }

    pub async fn synthesize(
        &self,
        title: &str,
        rendered: &Rendered,
        feedback: Option<&GateResult>,
    ) -> LlmResult<String> {
        let mut prompt = format!(
            "Rewrite the following \"{title}\" documentation section so it reads well for \
             engineers and product owners. Keep every heading, table row, diagram and fact. \
             Do not invent components and do not leave bracketed placeholders.\n\n{}",
            rendered.markdown
        );
        if let Some(gate) = feedback {
            prompt.push_str("\n\nThe previous draft was rejected:\n");
            for failure in &gate.failures {
                prompt.push_str(&format!("- {}: {}\n", failure.field, failure.remediation));
            }
        }
        let messages = [
            ChatMessage::system("You are a technical writer producing markdown documentation."),
            ChatMessage::user(prompt),
        ];
        let completion = self.models.complete_with_fallback(&messages, false).await?;
        Ok(strip_code_fence(&completion.content).to_string())
    }
}

type Renderer = fn(&SectionContext) -> Rendered;

/// A section rendered from the graphs, optionally synthesized
pub struct TemplateSection {
    name: &'static str,
    title: &'static str,
    render: Renderer,
    synthesizer: Option<Arc<SectionSynthesizer>>,
}

impl TemplateSection {
    pub fn new(name: &'static str, title: &'static str, render: Renderer) -> Self {
        Self {
            name,
            title,
            render,
            synthesizer: None,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<SectionSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }
}

#[async_trait]
impl SectionGenerator for TemplateSection {
    fn name(&self) -> &str {
        self.name
    }

    fn title(&self) -> &str {
        self.title
    }

    async fn generate(
        &self,
        ctx: &SectionContext,
        feedback: Option<&GateResult>,
    ) -> PipelineResult<SectionDraft> {
        let rendered = (self.render)(ctx);

        if let Some(synthesizer) = &self.synthesizer {
            match synthesizer.synthesize(self.title, &rendered, feedback).await {
                Ok(text) if !text.trim().is_empty() => {
                    let confidence = if rendered.context_items >= SYNTHESIS_MIN_CONTEXT {
                        SYNTHESIS_CONFIDENCE
                    } else {
                        SYNTHESIS_THIN_CONFIDENCE
                    };
                    return Ok(SectionDraft {
                        content: text,
                        confidence,
                        citations: rendered.citations,
                    });
                }
                Ok(_) => {
                    tracing::warn!(section = %self.name, "Empty synthesis, using template");
                }
                Err(e) => {
                    tracing::warn!(section = %self.name, error = %e, "Synthesis failed, using template");
                }
            }
        }

        Ok(SectionDraft {
            content: rendered.markdown,
            confidence: rendered.base_confidence,
            citations: rendered.citations,
        })
    }
}

/// Name -> generator lookup, in registration order
#[derive(Default)]
pub struct SectionRegistry {
    generators: HashMap<String, Arc<dyn SectionGenerator>>,
    order: Vec<String>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The eight built-in sections
    pub fn builtin(synthesizer: Option<Arc<SectionSynthesizer>>) -> Self {
        let builtins: [(&'static str, &'static str, Renderer); 8] = [
            ("executive_overview", "Executive Overview", templates::executive_overview),
            ("features", "Main Application Features", templates::features),
            ("system_overview", "System Overview", templates::system_overview),
            ("data_models", "Data Models", templates::data_models),
            ("api_specs", "API Specifications", templates::api_specs),
            (
                "security_considerations",
                "Security Considerations",
                templates::security_considerations,
            ),
            ("user_stories", "User Stories", templates::user_stories),
            ("interfaces", "Interface Specifications", templates::interfaces),
        ];

        let mut registry = Self::new();
        for (name, title, render) in builtins {
            let mut section = TemplateSection::new(name, title, render);
            if let Some(synthesizer) = &synthesizer {
                section = section.with_synthesizer(Arc::clone(synthesizer));
            }
            registry.register(Arc::new(section));
        }
        registry
    }

    /// Add or replace a generator
    pub fn register(&mut self, generator: Arc<dyn SectionGenerator>) {
        let name = generator.name().to_string();
        if self.generators.insert(name.clone(), generator).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SectionGenerator>> {
        self.generators.get(name).cloned()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Run a generator against its gate, keeping the last attempt
pub async fn generate_gated(
    generator: &dyn SectionGenerator,
    ctx: &SectionContext,
    gate_config: &SectionGateConfig,
    quality: &QualityConfig,
) -> GeneratedSection {
    let max_attempts = gate_config.max_iterations.max(1);
    let mut last: Option<(SectionDraft, GateResult)> = None;
    let mut last_error: Option<String> = None;
    let mut attempts = 0;

    while attempts < max_attempts {
        attempts += 1;
        let feedback = last.as_ref().map(|(_, gate)| gate);
        match generator.generate(ctx, feedback).await {
            Ok(draft) => {
                let gate = evaluate_section_gate(generator.name(), &draft.content, gate_config);
                let passed = gate.passed;
                if !passed {
                    tracing::info!(
                        section = %generator.name(),
                        attempt = attempts,
                        failures = %gate.summary(),
                        "Section failed quality gate"
                    );
                }
                last = Some((draft, gate));
                if passed {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(section = %generator.name(), attempt = attempts, error = %e, "Section generator failed");
                last_error = Some(e.to_string());
            }
        }
    }

    let Some((draft, gate)) = last else {
        let error = last_error.unwrap_or_else(|| "generator produced no output".to_string());
        return GeneratedSection::placeholder(generator.name(), generator.title(), &error, attempts);
    };

    let confidence = gated_confidence(
        draft.confidence,
        gate.score,
        quality.confidence_floor,
        quality.confidence_ceiling,
    );
    let (content, low_confidence) =
        gate_low_confidence_output(&draft.content, confidence, quality.low_confidence_threshold);

    GeneratedSection {
        name: generator.name().to_string(),
        title: generator.title().to_string(),
        content,
        confidence,
        citations: draft.citations,
        attempts,
        degraded: !gate.passed,
        gate: Some(gate),
        low_confidence,
        error: None,
    }
}
