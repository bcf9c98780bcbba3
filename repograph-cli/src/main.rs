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

//! Repograph CLI
//!
//! Analyze a local repository into documentation sections, ask questions
//! against a finished analysis, and maintain the checkpoint store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use repograph_core::resilience::Breakers;
use repograph_core::AnalysisConfig;
use repograph_llm::{GuardedModels, OpenAIClient};
use repograph_pipeline::{LocalIngestor, Pipeline, Progress, TracingProgressSink};
use repograph_query::{HybridRetriever, QuestionAnswerer};
use repograph_storage::{
    CheckpointStore, FileCheckpointStore, MemoryPersistenceStore, MemoryVectorIndex,
    PersistenceStore, ProjectRecord,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "repograph")]
#[command(about = "Repograph - repository intelligence and documentation", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a repository and write its documentation sections
    Analyze {
        /// Repository root
        path: PathBuf,

        /// Project id (defaults to the directory name)
        #[arg(long)]
        project: Option<String>,

        /// Sections to generate, comma-separated (defaults to all)
        #[arg(long, value_delimiter = ',')]
        sections: Vec<String>,

        /// Output directory for sections and the saved analysis
        #[arg(short, long, default_value = "./repograph-out")]
        out: PathBuf,

        /// Checkpoint directory
        #[arg(long, default_value = "./repograph-checkpoints")]
        checkpoints: PathBuf,

        /// Print the analysis result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask a question about an analyzed project
    Ask {
        /// Project id given to `analyze`
        project: String,

        /// The question
        question: String,

        /// Directory `analyze` wrote to
        #[arg(short, long, default_value = "./repograph-out")]
        out: PathBuf,
    },

    /// Inspect or clear stored checkpoints
    Checkpoints {
        /// Project id
        project: String,

        /// Checkpoint directory
        #[arg(long, default_value = "./repograph-checkpoints")]
        dir: PathBuf,

        /// Remove every checkpoint of the project
        #[arg(long)]
        clear: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "repograph=debug" } else { "repograph=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn models(config: &AnalysisConfig) -> Result<Arc<GuardedModels>> {
    let Some(api_key) = config.llm.api_key.clone() else {
        bail!("No API key configured; set REPOGRAPH_API_KEY or OPENAI_API_KEY");
    };
    let client = Arc::new(OpenAIClient::new(api_key).with_base_url(config.llm.api_base.clone()));
    let breakers = Arc::new(Breakers::from_config(&config.resilience));
    Ok(Arc::new(
        GuardedModels::new(client.clone(), breakers, config).with_embedding(client),
    ))
}

/// Project ids name files under the output directory, so they must stay a
/// single plain path component
fn check_project_id(project: &str) -> Result<()> {
    let plain = project
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if project.is_empty() || project.chars().all(|c| c == '.') || !plain {
        bail!("Invalid project id '{project}': use letters, digits, '-', '_' or '.'");
    }
    Ok(())
}

fn record_path(out: &Path, project: &str) -> Result<PathBuf> {
    check_project_id(project)?;
    Ok(out.join(format!("{project}.json")))
}

async fn analyze(
    mut config: AnalysisConfig,
    path: PathBuf,
    project: Option<String>,
    sections: Vec<String>,
    out: PathBuf,
    checkpoint_dir: PathBuf,
    json: bool,
) -> Result<()> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Repository not found: {}", path.display()))?;
    let project = match project {
        Some(project) => project,
        None => root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Cannot derive a project id from the path; pass --project")?,
    };
    check_project_id(&project)?;
    if !sections.is_empty() {
        config.analysis.sections = sections;
    }

    let models = models(&config)?;
    let checkpoints = FileCheckpointStore::new(&checkpoint_dir)
        .await
        .with_context(|| format!("Failed to open checkpoints at {}", checkpoint_dir.display()))?;
    let store = Arc::new(MemoryPersistenceStore::new());
    let pipeline = Pipeline::builder(config.clone(), models)
        .ingestor(Arc::new(LocalIngestor::new(&root, config.analysis.chunk_max_lines)))
        .checkpoints(Arc::new(checkpoints))
        .persistence(store.clone())
        .vector_index(Arc::new(MemoryVectorIndex::new()))
        .progress(Progress::new(Arc::new(TracingProgressSink)))
        .build()?;

    let result = pipeline.run(&project).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&*result)?);
    } else {
        for stage in &result.stages {
            let status = if stage.ok() { "ok" } else { "FAILED" };
            println!("{:<28} {:<7} {:>8} ms", stage.name, status, stage.duration_ms);
        }
        println!();
        for section in &result.sections {
            let flag = if section.degraded { " (degraded)" } else { "" };
            println!("{:<28} confidence {:.2}{}", section.name, section.confidence, flag);
        }
        println!("\nTotal cost: ${:.4}", result.total_cost);
    }

    if !result.success {
        bail!(
            "Analysis failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    let section_dir = out.join(&project);
    std::fs::create_dir_all(&section_dir)
        .with_context(|| format!("Failed to create {}", section_dir.display()))?;
    for section in &result.sections {
        let file = section_dir.join(format!("{}.md", section.name));
        std::fs::write(&file, &section.content)
            .with_context(|| format!("Failed to write {}", file.display()))?;
    }
    if let Some(record) = store.load(&project).await? {
        let file = record_path(&out, &project)?;
        std::fs::write(&file, serde_json::to_vec_pretty(&record)?)
            .with_context(|| format!("Failed to write {}", file.display()))?;
    }
    tracing::info!(project = %project, out = %section_dir.display(), "Sections written");
    Ok(())
}

async fn ask(config: AnalysisConfig, project: String, question: String, out: PathBuf) -> Result<()> {
    let file = record_path(&out, &project)?;
    let bytes = std::fs::read(&file)
        .with_context(|| format!("No saved analysis for '{project}' at {}", file.display()))?;
    let record: ProjectRecord = serde_json::from_slice(&bytes)
        .with_context(|| format!("Corrupt analysis file {}", file.display()))?;

    let store = Arc::new(MemoryPersistenceStore::new());
    store.save(record).await?;
    let models = models(&config)?;
    // The vector index lives only for an analyze run; questions fall back to keywords
    let retriever = HybridRetriever::new(
        Arc::clone(&models),
        Arc::new(MemoryVectorIndex::new()),
        store,
        config.retrieval.clone(),
    );
    let answerer = QuestionAnswerer::new(retriever, models, config.quality.low_confidence_threshold);
    let answer = answerer.answer(&project, &question).await?;
    println!("{}", answer.text);
    Ok(())
}

async fn checkpoints(project: String, dir: PathBuf, clear: bool) -> Result<()> {
    let store = FileCheckpointStore::new(&dir)
        .await
        .with_context(|| format!("Failed to open checkpoints at {}", dir.display()))?;
    if clear {
        let removed = store.invalidate(&project).await?;
        println!("Removed {removed} checkpoints for {project}");
    } else {
        println!("{} checkpoints for {project}", store.count(&project).await?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = AnalysisConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Analyze {
            path,
            project,
            sections,
            out,
            checkpoints,
            json,
        } => analyze(config, path, project, sections, out, checkpoints, json).await,
        Commands::Ask {
            project,
            question,
            out,
        } => ask(config, project, question, out).await,
        Commands::Checkpoints {
            project,
            dir,
            clear,
        } => checkpoints(project, dir, clear).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_analyze_sections_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "repograph",
            "analyze",
            "./repo",
            "--sections",
            "features,api_specs",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Analyze { sections, out, .. } => {
                assert_eq!(sections, vec!["features", "api_specs"]);
                assert_eq!(out, PathBuf::from("./repograph-out"));
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_project_ids_cannot_leave_the_output_dir() {
        for bad in ["", ".", "..", "../shop", "org/repo", "a\\b"] {
            assert!(check_project_id(bad).is_err(), "{bad:?}");
            assert!(record_path(Path::new("out"), bad).is_err(), "{bad:?}");
        }
        for good in ["shop", "shop-api_v2", "shop.web"] {
            assert!(check_project_id(good).is_ok(), "{good:?}");
        }
        assert_eq!(
            record_path(Path::new("out"), "shop").unwrap(),
            PathBuf::from("out/shop.json")
        );
    }

    #[test]
    fn test_checkpoints_defaults_to_count() {
        let cli = Cli::try_parse_from(["repograph", "checkpoints", "shop"]).unwrap();
        match cli.command {
            Commands::Checkpoints { project, clear, .. } => {
                assert_eq!(project, "shop");
                assert!(!clear);
            }
            _ => panic!("expected checkpoints"),
        }
    }
}
