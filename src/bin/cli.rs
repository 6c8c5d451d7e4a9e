//! Knowledge-base indexer CLI
//!
//! Command-line interface for running the hierarchical indexing pipeline,
//! previewing plans, cleaning generated artifacts, and initializing
//! per-handler configuration files.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use kbindexer::config::{CleanupType, IndexingMode};
use kbindexer::config_manager::ConfigManager;
use kbindexer::decision::{summarize_report, DecisionOutcome};
use kbindexer::defaults;
use kbindexer::handlers::{
    GitCloneHandler, Handler, HandlerRegistry, PdfKnowledgeHandler, ProjectBaseHandler,
};
use kbindexer::indexer::HierarchicalIndexer;
use kbindexer::llm::{AnthropicProvider, LlmProvider, LlmRequest, LlmResponse};
use kbindexer::source::{IndexableSource, SourceType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "kbindexer")]
#[command(about = "Hierarchical knowledge-base indexer with incremental LLM summarization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Commands {
    /// Index a source tree into per-directory knowledge files
    Index {
        /// Source root to index
        #[arg(value_name = "PATH", default_value = ".")]
        path: String,

        /// Override the indexing mode (full, full_kb_rebuild, incremental)
        #[arg(short, long)]
        mode: Option<String>,

        /// Knowledge directory (defaults to {path}/.knowledge or the
        /// enclosing .knowledge for git clones)
        #[arg(short, long)]
        knowledge_dir: Option<String>,

        /// Plan and report only; perform no LLM calls or writes
        #[arg(long)]
        dry_run: bool,

        /// Capture every LLM prompt/response under the debug layout
        #[arg(long)]
        debug: bool,

        /// Serve LLM responses from captured debug files
        #[arg(long)]
        replay: bool,

        /// Directory for debug artifacts (required with --debug/--replay)
        #[arg(long)]
        debug_dir: Option<String>,
    },

    /// Show the decision report and task plan without executing
    Plan {
        /// Source root to analyze
        #[arg(value_name = "PATH", default_value = ".")]
        path: String,

        /// Knowledge directory override
        #[arg(short, long)]
        knowledge_dir: Option<String>,
    },

    /// Remove generated artifacts within the handler's namespace
    Cleanup {
        /// Source root whose artifacts to clean
        #[arg(value_name = "PATH", default_value = ".")]
        path: String,

        /// Knowledge directory override
        #[arg(short, long)]
        knowledge_dir: Option<String>,

        /// Remove generated knowledge files
        #[arg(long)]
        kb_files: bool,

        /// Remove cached LLM analyses
        #[arg(long)]
        analysis_files: bool,
    },

    /// Write default configuration files for the known handler types
    InitConfig {
        /// Knowledge directory to place config files in
        #[arg(value_name = "KNOWLEDGE_DIR")]
        knowledge_dir: String,
    },
}

/// Provider stand-in for paths that never reach the LLM (plan, dry-run).
struct UnavailableProvider;

#[async_trait::async_trait]
impl LlmProvider for UnavailableProvider {
    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
        bail!("no LLM provider configured; set ANTHROPIC_API_KEY")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Index {
            path,
            mode,
            knowledge_dir,
            dry_run,
            debug,
            replay,
            debug_dir,
        } => {
            let source_root = expand_path(&path)?;
            let knowledge_dir = resolve_knowledge_dir(&source_root, knowledge_dir.as_deref())?;
            let handler = build_handler(&source_root, &knowledge_dir, |config| {
                if let Some(mode) = &mode {
                    config.change_detection.indexing_mode = mode.parse::<IndexingMode>()?;
                }
                config.debug_config.dry_run = dry_run;
                config.debug_config.debug_mode = debug;
                config.debug_config.enable_llm_replay = replay;
                if let Some(dir) = &debug_dir {
                    config.debug_config.debug_output_directory =
                        Some(PathBuf::from(shellexpand::tilde(dir).into_owned()));
                }
                Ok(())
            })?;

            let provider: Arc<dyn LlmProvider> = if dry_run || replay {
                Arc::new(UnavailableProvider)
            } else {
                Arc::new(AnthropicProvider::from_env()?)
            };

            let source_type = source_type_for(handler.handler_type());
            let source =
                IndexableSource::new(source_type, source_root, handler.handler_type());
            let status = HierarchicalIndexer::new(handler, provider)
                .index(&source)
                .await?;

            let stats = &status.stats;
            println!(
                "\n{} {} | files: {} discovered, {} processed, {} completed, {} failed, {} skipped",
                "Status:".bold(),
                format!("{}", status.overall_status).cyan(),
                stats.files_discovered,
                stats.files_processed,
                stats.files_completed,
                stats.files_failed,
                stats.files_skipped,
            );
            println!(
                "{} {} directories, {} LLM requests, {} orphan(s) deleted{}",
                "Work:".bold(),
                stats.directories_processed,
                stats.llm_requests,
                stats.orphans_deleted,
                stats
                    .duration_seconds()
                    .map(|s| format!(", {s:.1}s"))
                    .unwrap_or_default(),
            );
            for error in &stats.errors {
                println!("{} {}", "error:".red(), error);
            }

            if !status.is_success() && !dry_run {
                std::process::exit(1);
            }
        }

        Commands::Plan {
            path,
            knowledge_dir,
        } => {
            let source_root = expand_path(&path)?;
            let knowledge_dir = resolve_knowledge_dir(&source_root, knowledge_dir.as_deref())?;
            let handler = build_handler(&source_root, &knowledge_dir, |_| Ok(()))?;

            let indexer = HierarchicalIndexer::new(handler, Arc::new(UnavailableProvider));
            let (_, report, plan) = indexer.prepare(&source_root)?;

            println!("{}", "Decisions".bold().underline());
            for decision in &report.decisions {
                let outcome = match decision.outcome {
                    DecisionOutcome::Rebuild => "REBUILD".yellow(),
                    DecisionOutcome::Skip => "SKIP".green(),
                    DecisionOutcome::Delete => "DELETE".red(),
                };
                println!(
                    "  {:<8} {:<22} {}",
                    outcome,
                    decision.reason.as_str(),
                    decision.path.display()
                );
            }
            for orphan in &report.orphans {
                println!("  {:<8} {:<22} {}", "DELETE".red(), "ORPHAN", orphan.display());
            }
            println!("\n{} {}", "Summary:".bold(), summarize_report(&report));
            println!("\n{}", "Plan".bold().underline());
            print!("{}", plan.describe());
        }

        Commands::Cleanup {
            path,
            knowledge_dir,
            kb_files,
            analysis_files,
        } => {
            if !kb_files && !analysis_files {
                bail!("nothing to clean: pass --kb-files and/or --analysis-files");
            }
            let source_root = expand_path(&path)?;
            let knowledge_dir = resolve_knowledge_dir(&source_root, knowledge_dir.as_deref())?;
            let handler = build_handler(&source_root, &knowledge_dir, |config| {
                config.cleanup_config.cleanup_mode_enabled = true;
                config.cleanup_config.cleanup_types = [
                    kb_files.then_some(CleanupType::KbFiles),
                    analysis_files.then_some(CleanupType::AnalysisFiles),
                ]
                .into_iter()
                .flatten()
                .collect();
                Ok(())
            })?;

            let indexer = HierarchicalIndexer::new(handler, Arc::new(UnavailableProvider));
            let removed = indexer.run_cleanup(&source_root)?;
            println!("Removed {} file(s)", removed.to_string().bold());
        }

        Commands::InitConfig { knowledge_dir } => {
            let dir = PathBuf::from(shellexpand::tilde(&knowledge_dir).into_owned());
            let manager = ConfigManager::new(&dir);
            for handler_type in defaults::KNOWN_HANDLER_TYPES {
                let path = manager.config_file_path(handler_type);
                if path.exists() {
                    println!("{} {}", "exists:".yellow(), path.display());
                } else {
                    manager.generate_default(handler_type, &path)?;
                    println!("{} {}", "created:".green(), path.display());
                }
            }
        }
    }

    Ok(())
}

/// Expand `~` and canonicalize a user-supplied path.
fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::tilde(raw).into_owned();
    PathBuf::from(&expanded)
        .canonicalize()
        .with_context(|| format!("path not found: {expanded}"))
}

/// Find the knowledge directory for a source root: an explicit override, an
/// enclosing `.knowledge` ancestor (git clones live inside one), or
/// `{source_root}/.knowledge`.
fn resolve_knowledge_dir(source_root: &Path, explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(PathBuf::from(shellexpand::tilde(dir).into_owned()));
    }
    for ancestor in source_root.ancestors() {
        if ancestor.file_name().is_some_and(|n| n == ".knowledge") {
            return Ok(ancestor.to_path_buf());
        }
    }
    Ok(source_root.join(".knowledge"))
}

/// Construct the registry, route the source root, and apply CLI overrides to
/// the selected handler's configuration.
fn build_handler(
    source_root: &Path,
    knowledge_dir: &Path,
    mut adjust: impl FnMut(&mut kbindexer::config::IndexingConfig) -> Result<()>,
) -> Result<Arc<dyn Handler>> {
    let manager = ConfigManager::new(knowledge_dir);
    let mut registry = HandlerRegistry::new();

    // Most specific first; project-base is the catch-all.
    for handler_type in ["git-clones", "pdf-knowledge", "project-base"] {
        let mut config = manager.load(handler_type)?;
        adjust(&mut config)?;
        config.validate()?;
        let handler: Arc<dyn Handler> = match handler_type {
            "git-clones" => Arc::new(GitCloneHandler::new(knowledge_dir.to_path_buf(), config)),
            "pdf-knowledge" => {
                Arc::new(PdfKnowledgeHandler::new(knowledge_dir.to_path_buf(), config))
            }
            _ => Arc::new(ProjectBaseHandler::new(knowledge_dir.to_path_buf(), config)),
        };
        registry.register(handler);
    }

    let handler = registry
        .handler_for(source_root)
        .with_context(|| format!("no handler available for {}", source_root.display()))?;
    info!(
        "Routed {} to the {} handler",
        source_root.display(),
        handler.handler_type()
    );
    Ok(handler)
}

fn source_type_for(handler_type: &str) -> SourceType {
    match handler_type {
        "git-clones" => SourceType::GitClone,
        "pdf-knowledge" => SourceType::Pdf,
        _ => SourceType::ProjectBase,
    }
}
