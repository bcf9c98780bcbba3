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

//! The repograph analysis pipeline: ingestion, dual analysis,
//! reconciliation, gated section generation, citation verification and
//! persistence, with progress reporting throughout.

pub mod error;
pub mod facts;
pub mod ingest;
pub mod model_analysis;
pub mod orchestrator;
pub mod progress;
pub mod sections;
pub mod stage;

pub use error::{PipelineError, PipelineResult};
pub use facts::{scan_chunk, FactsProvider, PatternFactsProvider};
pub use ingest::{chunk_lines, IngestedRepo, Ingestor, LocalIngestor, MemoryIngestor, SourceFile};
pub use model_analysis::{parse_chunk_analysis, ModelAnalyzer, MODEL_STAGE};
pub use orchestrator::{
    AnalysisResult, CitationSummary, Pipeline, PipelineBuilder, ValidationSummary,
    CITATION_STAGE, DUAL_ANALYSIS_GROUP, INGESTION_STAGE, PERSISTENCE_STAGE,
    RECONCILIATION_STAGE, SECTION_GROUP, STATIC_STAGE,
};
pub use progress::{
    stage_label, ChannelProgressSink, Progress, ProgressSink, StageEvent, StageStatus,
    TracingProgressSink,
};
pub use sections::{
    generate_gated, GeneratedSection, SectionContext, SectionDraft, SectionGenerator,
    SectionRegistry, SectionSynthesizer, TemplateSection,
};
pub use stage::{
    run_stage, FnStage, ParallelGroup, Stage, StageOutcome, StageResult, StageStatusRecord,
};
