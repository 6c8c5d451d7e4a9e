//! Hierarchical Indexer
//!
//! Orchestrates one indexing run end to end: optional cleanup pre-pass,
//! discovery, rebuild decisions, planning, and plan execution. This is the
//! only module that sequences the pipeline; each phase lives in its own
//! component and stays independently testable.

use crate::cache::AnalysisCache;
use crate::config::CleanupType;
use crate::context::IndexingStatus;
use crate::debug_capture::DebugHandler;
use crate::decision::{summarize_report, DecisionReport, RebuildDecisionEngine};
use crate::discovery;
use crate::executor::Executor;
use crate::handlers::Handler;
use crate::llm::{LlmClient, LlmProvider};
use crate::plan::{Plan, Planner};
use crate::source::IndexableSource;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// One-shot pipeline runner for a single source
pub struct HierarchicalIndexer {
    handler: Arc<dyn Handler>,
    provider: Arc<dyn LlmProvider>,
}

impl HierarchicalIndexer {
    pub fn new(handler: Arc<dyn Handler>, provider: Arc<dyn LlmProvider>) -> Self {
        Self { handler, provider }
    }

    /// Run the full pipeline for `source` and return its final status.
    pub async fn index(&self, source: &IndexableSource) -> Result<IndexingStatus> {
        let config = self.handler.config();
        let source_root = source.source_path.clone();
        info!(
            "Indexing {} ({} handler, {} mode)",
            source_root.display(),
            self.handler.handler_type(),
            config.change_detection.indexing_mode
        );

        if config.cleanup_config.cleanup_mode_enabled && !config.debug_config.dry_run {
            let removed = self.run_cleanup(&source_root)?;
            info!("Cleanup pre-pass removed {removed} file(s)");
        }

        let (tree, report, plan) = self.prepare(&source_root)?;
        info!("Decisions: {}", summarize_report(&report));
        info!("Plan: {} task(s)", plan.len());

        // Dry-run performs no writes at all, including the debug layout.
        let debug = Arc::new(if config.debug_config.dry_run {
            DebugHandler::disabled()
        } else {
            DebugHandler::new(
                config.debug_config.debug_mode,
                config.debug_config.enable_llm_replay,
                config.debug_config.debug_output_directory.as_deref(),
            )?
        });
        let cache = Arc::new(AnalysisCache::new(
            Arc::clone(&self.handler),
            source_root.clone(),
        ));
        let llm = Arc::new(LlmClient::new(
            Arc::clone(&self.provider),
            config.llm_config.clone(),
            config.error_handling.clone(),
            debug,
        ));
        let executor = Arc::new(Executor::new(
            Arc::clone(&self.handler),
            source_root,
            cache,
            llm,
        ));

        Ok(executor.execute(plan, Arc::new(tree), Arc::new(report)).await)
    }

    /// Discovery, decisions, and planning without execution. Used by the
    /// `plan` CLI command and by dry-run reporting.
    pub fn prepare(
        &self,
        source_root: &Path,
    ) -> Result<(crate::context::DirectoryContext, DecisionReport, Plan)> {
        let tree = discovery::discover(self.handler.as_ref(), source_root)
            .context("source discovery failed")?;
        let cache = AnalysisCache::new(Arc::clone(&self.handler), source_root.to_path_buf());
        let engine =
            RebuildDecisionEngine::new(Arc::clone(&self.handler), source_root.to_path_buf());
        let report = engine
            .evaluate(&tree, &cache)
            .context("rebuild decision evaluation failed")?;
        let plan = Planner::new(&report).build(&tree);
        Ok((tree, report, plan))
    }

    /// Delete generated artifacts per `cleanup_types`, strictly within this
    /// handler's namespaces. Returns the number of files removed.
    pub fn run_cleanup(&self, source_root: &Path) -> Result<usize> {
        let config = self.handler.config();
        let mut removed = 0usize;

        for cleanup_type in &config.cleanup_config.cleanup_types {
            let root = match cleanup_type {
                CleanupType::KbFiles => self.handler.kb_root(source_root),
                CleanupType::AnalysisFiles => self.handler.cache_root(source_root),
            };
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let ours = match cleanup_type {
                    CleanupType::KbFiles => self
                        .handler
                        .source_path_for_kb_file(path, source_root)
                        .is_some(),
                    CleanupType::AnalysisFiles => self
                        .handler
                        .source_path_for_cache_entry(path, source_root)
                        .is_some(),
                };
                if !ours || !self.handler.owns_output_path(path, source_root) {
                    continue;
                }
                match std::fs::remove_file(path) {
                    Ok(()) => {
                        info!("Cleanup removed {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("Cleanup could not remove {}: {e}", path.display()),
                }
            }
        }
        Ok(removed)
    }
}
