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

//! Pipeline orchestrator
//!
//! Phases run strictly in order:
//!
//! 1. ingestion (fatal on failure)
//! 2. dual analysis: the `static` and `model` stages in one parallel group
//! 3. reconciliation: cross-validation and graph build (fatal on failure)
//! 4. section generation, one gated stage per section, concurrency-capped
//! 5. citation verification (advisory)
//! 6. persistence
//!
//! Every phase transition is reported through [`Progress`]. A run always
//! returns an [`AnalysisResult`] listing every stage outcome and every
//! requested section; only the fatal phases short-circuit it.

use crate::error::{PipelineError, PipelineResult};
use crate::facts::{FactsProvider, PatternFactsProvider};
use crate::ingest::{IngestedRepo, Ingestor};
use crate::model_analysis::{ModelAnalyzer, MODEL_STAGE};
use crate::progress::{Progress, StageEvent};
use crate::sections::{
    generate_gated, GeneratedSection, SectionContext, SectionRegistry, SectionSynthesizer,
};
use crate::stage::{run_stage, FnStage, ParallelGroup, Stage, StageOutcome, StageResult, StageStatusRecord};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use repograph_core::{
    build_intelligence_model, cross_validate, AnalysisConfig, GraphStats, IdempotencyGuard,
    IntelligenceModel, ModelAnalysis, StaticFacts, ValidationReport,
};
use repograph_llm::{GuardedModels, ModelUsage};
use repograph_quality::{gate_config_for, verify_citations, CitationCheck};
use repograph_storage::{
    CheckpointStore, MemoryCheckpointStore, MemoryPersistenceStore, PersistenceStore,
    ProjectRecord, SectionRecord, VectorIndex,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub const INGESTION_STAGE: &str = "ingestion";
pub const STATIC_STAGE: &str = "static";
pub const DUAL_ANALYSIS_GROUP: &str = "dual_analysis";
pub const RECONCILIATION_STAGE: &str = "reconciliation";
pub const SECTION_GROUP: &str = "section_generation";
pub const CITATION_STAGE: &str = "citation_verification";
pub const PERSISTENCE_STAGE: &str = "persistence";

/// How long the dual-analysis group waits past the pipeline deadline, so
/// the model stage can hand back what it finished
const DUAL_ANALYSIS_GRACE: Duration = Duration::from_secs(5);
/// Chunks handed to the facts provider at once
const STATIC_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub cross_validated: usize,
    pub deterministic_only: usize,
    pub model_only: usize,
    #[serde(default)]
    pub conflicts: Vec<String>,
}

impl From<&ValidationReport> for ValidationSummary {
    fn from(report: &ValidationReport) -> Self {
        Self {
            cross_validated: report.cross_validated,
            deterministic_only: report.deterministic_only,
            model_only: report.model_only,
            conflicts: report.conflicts.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationSummary {
    pub checked: usize,
    /// Only the failing checks
    pub failed: Vec<CitationCheck>,
}

/// Everything a run produced, including partial output of failed runs
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub run_id: Uuid,
    pub project_id: String,
    pub commit_sha: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub stages: Vec<StageStatusRecord>,
    pub sections: Vec<GeneratedSection>,
    pub validation: Option<ValidationSummary>,
    pub graph: Option<GraphStats>,
    pub citations: Option<CitationSummary>,
    pub checkpoint_hits: usize,
    pub degraded_chunks: usize,
    pub usage: Vec<(String, ModelUsage)>,
    pub total_cost: f64,
    pub duration_ms: u64,
    #[serde(skip)]
    pub intelligence: Option<Arc<IntelligenceModel>>,
}

impl AnalysisResult {
    fn new(project_id: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            project_id: project_id.to_string(),
            commit_sha: None,
            success: false,
            error: None,
            stages: Vec::new(),
            sections: Vec::new(),
            validation: None,
            graph: None,
            citations: None,
            checkpoint_hits: 0,
            degraded_chunks: 0,
            usage: Vec::new(),
            total_cost: 0.0,
            duration_ms: 0,
            intelligence: None,
        }
    }

    pub fn section(&self, name: &str) -> Option<&GeneratedSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn stage(&self, name: &str) -> Option<&StageStatusRecord> {
        self.stages.iter().find(|s| s.name == name)
    }
}

enum DualOutput {
    Static(StaticFacts),
    Model(ModelAnalysis),
}

struct DualInput {
    project_id: String,
    repo: Arc<IngestedRepo>,
    deadline: Instant,
}

struct ReconcileInput {
    project_id: String,
    facts: StaticFacts,
    model: ModelAnalysis,
}

struct PipelineInner {
    config: AnalysisConfig,
    ingestor: Arc<dyn Ingestor>,
    facts: Arc<dyn FactsProvider>,
    models: Arc<GuardedModels>,
    checkpoints: Arc<dyn CheckpointStore>,
    persistence: Arc<dyn PersistenceStore>,
    vectors: Option<Arc<dyn VectorIndex>>,
    sections: Arc<SectionRegistry>,
    progress: Progress,
}

/// Runs analyses; concurrent runs for one project share a single execution
pub struct Pipeline {
    inner: Arc<PipelineInner>,
    guard: IdempotencyGuard<Arc<AnalysisResult>>,
}

pub struct PipelineBuilder {
    config: AnalysisConfig,
    models: Arc<GuardedModels>,
    ingestor: Option<Arc<dyn Ingestor>>,
    facts: Option<Arc<dyn FactsProvider>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    persistence: Option<Arc<dyn PersistenceStore>>,
    vectors: Option<Arc<dyn VectorIndex>>,
    sections: Option<SectionRegistry>,
    progress: Progress,
}

impl PipelineBuilder {
    pub fn ingestor(mut self, ingestor: Arc<dyn Ingestor>) -> Self {
        self.ingestor = Some(ingestor);
        self
    }

    pub fn facts_provider(mut self, facts: Arc<dyn FactsProvider>) -> Self {
        self.facts = Some(facts);
        self
    }

    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn PersistenceStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn vector_index(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn sections(mut self, sections: SectionRegistry) -> Self {
        self.sections = Some(sections);
        self
    }

    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Facts, checkpoint and persistence collaborators default to the
    /// regex scanner and in-memory stores; the ingestor is required.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let ingestor = self
            .ingestor
            .ok_or_else(|| PipelineError::Ingestion("no ingestor configured".to_string()))?;
        let sections = self.sections.unwrap_or_else(|| {
            let synthesizer = self
                .config
                .llm
                .synthesize_sections
                .then(|| Arc::new(SectionSynthesizer::new(Arc::clone(&self.models))));
            SectionRegistry::builtin(synthesizer)
        });

        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                config: self.config,
                ingestor,
                facts: self
                    .facts
                    .unwrap_or_else(|| Arc::new(PatternFactsProvider::new())),
                models: self.models,
                checkpoints: self
                    .checkpoints
                    .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new())),
                persistence: self
                    .persistence
                    .unwrap_or_else(|| Arc::new(MemoryPersistenceStore::new())),
                vectors: self.vectors,
                sections: Arc::new(sections),
                progress: self.progress,
            }),
            guard: IdempotencyGuard::new(),
        })
    }
}

impl Pipeline {
    pub fn builder(config: AnalysisConfig, models: Arc<GuardedModels>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            models,
            ingestor: None,
            facts: None,
            checkpoints: None,
            persistence: None,
            vectors: None,
            sections: None,
            progress: Progress::disabled(),
        }
    }

    /// Analyze a project. A call arriving while a run for the same project
    /// is in flight receives that run's result.
    pub async fn run(&self, project_id: &str) -> Arc<AnalysisResult> {
        let inner = Arc::clone(&self.inner);
        let owned = project_id.to_string();
        self.guard
            .execute(project_id, async move { Arc::new(inner.run(owned).await) })
            .await
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.guard.is_in_flight(project_id)
    }

    pub fn models(&self) -> &GuardedModels {
        &self.inner.models
    }
}

impl PipelineInner {
    fn record<O>(&self, result: &mut AnalysisResult, stage: &StageResult<O>, detail: &str) {
        let ok = stage.outcome == StageOutcome::Completed;
        let message = match (&stage.outcome, &stage.error) {
            (StageOutcome::Completed, _) => detail.to_string(),
            (_, Some(error)) => error.clone(),
            (StageOutcome::Skipped, None) => "Skipped".to_string(),
            (StageOutcome::Failed, None) => "Failed".to_string(),
        };
        self.progress
            .emit(StageEvent::finished(&stage.stage_name, ok, stage.duration, message));
        result.stages.push(stage.status());
    }

    fn finish(&self, mut result: AnalysisResult, started: Instant) -> AnalysisResult {
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.usage = self.models.usage().snapshot();
        result.total_cost = self.models.usage().total_cost();
        if result.success {
            tracing::info!(
                project = %result.project_id,
                run_id = %result.run_id,
                duration_ms = result.duration_ms,
                sections = result.sections.len(),
                "Analysis finished"
            );
        } else {
            tracing::error!(
                project = %result.project_id,
                run_id = %result.run_id,
                error = result.error.as_deref().unwrap_or(""),
                "Analysis failed"
            );
        }
        result
    }

    async fn run(self: Arc<Self>, project_id: String) -> AnalysisResult {
        let started = Instant::now();
        let mut result = AnalysisResult::new(&project_id);
        tracing::info!(project = %project_id, run_id = %result.run_id, "Analysis started");

        // 1. Ingestion
        self.progress
            .emit(StageEvent::running(INGESTION_STAGE, "Resolving repository"));
        let ingestor = Arc::clone(&self.ingestor);
        let ingestion = run_stage(
            FnStage::new(INGESTION_STAGE, move |project: Arc<String>| {
                let ingestor = Arc::clone(&ingestor);
                async move { ingestor.ingest(&project).await }
            })
            .arc(),
            Arc::new(project_id.clone()),
        )
        .await;
        let detail = ingestion
            .output
            .as_ref()
            .map(|repo| format!("{} files, {} chunks", repo.file_count(), repo.chunks.len()))
            .unwrap_or_default();
        self.record(&mut result, &ingestion, &detail);
        let Some(repo) = ingestion.output else {
            result.error = Some(format!(
                "Ingestion failed: {}",
                ingestion.error.unwrap_or_default()
            ));
            return self.finish(result, started);
        };
        let repo = Arc::new(repo);
        result.commit_sha = Some(repo.commit_sha.clone());

        // 2. Dual analysis
        let (facts, model) = self.dual_analysis(&project_id, &repo, &mut result).await;
        result.checkpoint_hits = model.checkpoint_hits;
        result.degraded_chunks = model.degraded_chunks;

        // 3. Reconciliation
        self.progress.emit(StageEvent::running(
            RECONCILIATION_STAGE,
            "Cross-validating findings",
        ));
        let reconciliation = run_stage(
            FnStage::new(RECONCILIATION_STAGE, |input: Arc<ReconcileInput>| async move {
                let report = cross_validate(&input.facts, &input.model);
                let model =
                    build_intelligence_model(&input.project_id, &report, &input.facts, &input.model)?;
                Ok((report, model))
            })
            .arc(),
            Arc::new(ReconcileInput {
                project_id: project_id.clone(),
                facts,
                model,
            }),
        )
        .await;
        let detail = reconciliation
            .output
            .as_ref()
            .map(|(report, model)| {
                format!(
                    "{} cross-validated, {} entities, {} relationships",
                    report.cross_validated,
                    model.graph.entity_count(),
                    model.graph.relationship_count()
                )
            })
            .unwrap_or_default();
        self.record(&mut result, &reconciliation, &detail);
        let Some((report, intelligence)) = reconciliation.output else {
            result.error = Some(format!(
                "Graph build failed: {}",
                reconciliation.error.unwrap_or_default()
            ));
            return self.finish(result, started);
        };
        if report.has_conflict() {
            tracing::warn!(project = %project_id, conflicts = ?report.conflicts, "Reconciliation conflict");
        }
        result.validation = Some(ValidationSummary::from(&report));
        result.graph = Some(intelligence.graph.stats());
        let intelligence = Arc::new(intelligence);
        result.intelligence = Some(Arc::clone(&intelligence));

        // 4. Section generation
        let ctx = SectionContext {
            project_id: project_id.clone(),
            intelligence: Arc::clone(&intelligence),
            languages: repo.languages.clone(),
        };
        let sections = self.generate_sections(ctx, &mut result).await;
        result.sections = sections;

        // 5. Citation verification
        if self.config.analysis.verify_citations {
            let stage_start = Instant::now();
            let tree = repo.source_tree();
            let mut summary = CitationSummary::default();
            for section in &result.sections {
                let checks = verify_citations(&section.citations, &tree);
                summary.checked += checks.len();
                summary.failed.extend(checks.into_iter().filter(|c| !c.passed));
            }
            if !summary.failed.is_empty() {
                tracing::warn!(
                    project = %project_id,
                    failed = summary.failed.len(),
                    checked = summary.checked,
                    "Unresolvable citations"
                );
            }
            let detail = format!(
                "{}/{} citations resolved",
                summary.checked - summary.failed.len(),
                summary.checked
            );
            let stage: StageResult<()> =
                StageResult::completed(CITATION_STAGE, (), stage_start.elapsed());
            self.record(&mut result, &stage, &detail);
            result.citations = Some(summary);
        }

        // 6. Persistence
        self.progress
            .emit(StageEvent::running(PERSISTENCE_STAGE, "Saving results"));
        let now = Utc::now();
        let record = ProjectRecord {
            project_id: project_id.clone(),
            commit_sha: repo.commit_sha.clone(),
            sections: result
                .sections
                .iter()
                .map(|s| SectionRecord {
                    section_name: s.name.clone(),
                    title: s.title.clone(),
                    content: s.content.clone(),
                    confidence: s.confidence,
                    citations: s.citations.clone(),
                    generated_at: now,
                })
                .collect(),
            graph: intelligence.graph.snapshot(),
            saved_at: now,
        };
        let persistence = Arc::clone(&self.persistence);
        let saved = run_stage(
            FnStage::new(PERSISTENCE_STAGE, move |record: Arc<ProjectRecord>| {
                let persistence = Arc::clone(&persistence);
                async move {
                    persistence.save((*record).clone()).await?;
                    Ok(())
                }
            })
            .arc(),
            Arc::new(record),
        )
        .await;
        self.record(&mut result, &saved, "Results saved");

        result.success = true;
        self.finish(result, started)
    }

    async fn dual_analysis(
        &self,
        project_id: &str,
        repo: &Arc<IngestedRepo>,
        result: &mut AnalysisResult,
    ) -> (StaticFacts, ModelAnalysis) {
        let timeout = self.config.analysis_timeout();
        self.progress.emit(StageEvent::running(
            DUAL_ANALYSIS_GROUP,
            format!("Analyzing {} chunks", repo.chunks.len()),
        ));

        let facts_provider = Arc::clone(&self.facts);
        let static_stage = FnStage::new(STATIC_STAGE, move |input: Arc<DualInput>| {
            let provider = Arc::clone(&facts_provider);
            async move {
                let chunks = &input.repo.chunks;
                let extracted: Vec<StaticFacts> = stream::iter(chunks.iter())
                    .map(|chunk| provider.extract(chunk))
                    .boxed()
                    .buffered(STATIC_CONCURRENCY)
                    .try_collect()
                    .await?;
                let mut facts = StaticFacts::default();
                for part in extracted {
                    facts.merge(part);
                }
                Ok(DualOutput::Static(facts))
            }
        })
        .arc();

        let mut analyzer = ModelAnalyzer::new(
            Arc::clone(&self.models),
            Arc::clone(&self.checkpoints),
            self.config.llm.max_concurrency,
        )
        .with_progress(self.progress.clone());
        if let Some(vectors) = &self.vectors {
            analyzer = analyzer.with_vector_index(Arc::clone(vectors));
        }
        let analyzer = Arc::new(analyzer);
        let model_stage = FnStage::new(MODEL_STAGE, move |input: Arc<DualInput>| {
            let analyzer = Arc::clone(&analyzer);
            async move {
                let analysis = analyzer
                    .analyze(
                        &input.project_id,
                        &input.repo.commit_sha,
                        &input.repo.chunks,
                        Some(input.deadline),
                    )
                    .await;
                Ok(DualOutput::Model(analysis))
            }
        })
        .arc();

        let input = Arc::new(DualInput {
            project_id: project_id.to_string(),
            repo: Arc::clone(repo),
            deadline: Instant::now() + timeout,
        });
        let results = ParallelGroup::new(DUAL_ANALYSIS_GROUP)
            .with_stage(static_stage)
            .with_stage(model_stage)
            .with_timeout(timeout + DUAL_ANALYSIS_GRACE)
            .execute(input)
            .await;

        let mut facts = StaticFacts::default();
        let mut model = ModelAnalysis::default();
        for stage in results {
            let detail = match &stage.output {
                Some(DualOutput::Static(f)) => format!(
                    "{} entities, {} calls, {} imports",
                    f.entities.len(),
                    f.calls.len(),
                    f.imports.len()
                ),
                Some(DualOutput::Model(m)) => format!(
                    "{} narratives, {} rules, {} risks",
                    m.narratives.len(),
                    m.rules.len(),
                    m.risks.len()
                ),
                None => String::new(),
            };
            self.record(result, &stage, &detail);
            match stage.output {
                Some(DualOutput::Static(f)) => facts = f,
                Some(DualOutput::Model(m)) => model = m,
                None => tracing::warn!(
                    project = %project_id,
                    stage = %stage.stage_name,
                    "Continuing without {} results",
                    stage.stage_name
                ),
            }
        }
        (facts, model)
    }

    async fn generate_sections(
        &self,
        ctx: SectionContext,
        result: &mut AnalysisResult,
    ) -> Vec<GeneratedSection> {
        let names = self.config.analysis.sections.clone();
        self.progress.emit(StageEvent::running(
            SECTION_GROUP,
            format!("Generating {} sections", names.len()),
        ));

        let stages: Vec<Arc<dyn Stage<SectionContext, GeneratedSection>>> = names
            .iter()
            .map(|name| {
                let stage_name = format!("generate_{name}");
                let generator = self.sections.get(name);
                let gate = gate_config_for(name).with_max_iterations(self.config.quality.max_iterations);
                let quality = self.config.quality.clone();
                let progress = self.progress.clone();
                let section_name = name.clone();
                FnStage::new(stage_name.clone(), move |ctx: Arc<SectionContext>| {
                    let generator = generator.clone();
                    let gate = gate.clone();
                    let quality = quality.clone();
                    let progress = progress.clone();
                    let stage_name = stage_name.clone();
                    let section_name = section_name.clone();
                    async move {
                        let generator = generator.ok_or_else(|| {
                            PipelineError::stage(
                                &stage_name,
                                format!("no generator registered for section '{section_name}'"),
                            )
                        })?;
                        progress.emit(StageEvent::running(
                            &stage_name,
                            format!("Generating {}", generator.title()),
                        ));
                        Ok(generate_gated(&*generator, &ctx, &gate, &quality).await)
                    }
                })
                .arc()
            })
            .collect();

        let results = ParallelGroup::new(SECTION_GROUP)
            .with_stages(stages)
            .with_max_concurrency(self.config.analysis.max_concurrency)
            .execute(Arc::new(ctx))
            .await;

        names
            .iter()
            .zip(results)
            .map(|(name, stage)| {
                let detail = stage
                    .output
                    .as_ref()
                    .map(|s| format!("confidence {:.2}, {} attempt(s)", s.confidence, s.attempts))
                    .unwrap_or_default();
                self.record(result, &stage, &detail);
                match stage.output {
                    Some(section) => section,
                    None => {
                        let title = self
                            .sections
                            .get(name)
                            .map(|g| g.title().to_string())
                            .unwrap_or_else(|| name.clone());
                        let error = stage.error.unwrap_or_else(|| "section stage did not finish".to_string());
                        GeneratedSection::placeholder(name, &title, &error, 0)
                    }
                }
            })
            .collect()
    }
}
