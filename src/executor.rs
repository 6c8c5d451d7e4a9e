//! Plan Executor
//!
//! Generic DAG runner over the planner's task list. Tasks become eligible
//! when every dependency has finished; eligible tasks run concurrently up to
//! a global semaphore of `max_concurrent_operations`. Each task gets retries
//! with exponential backoff and a wall-clock timeout.
//!
//! # Failure semantics
//!
//! - A permanently failed `analyze_file` is isolated when
//!   `continue_on_file_errors` is on: the file is marked failed, its parent
//!   synthesizes without it, and the run can still complete.
//! - A failed `synthesize_directory` fails its own subtree: the directory's
//!   KB is not written. Ancestors still run with whatever children completed.
//! - With `continue_on_file_errors` off, the first permanent failure fails
//!   the run; remaining tasks are dropped.
//!
//! # Dry-run
//!
//! In dry-run mode no LLM call, cache write, KB write, or deletion happens;
//! the plan is logged task by task and an all-pending status is returned.

use crate::assembler::KnowledgeFileAssembler;
use crate::cache::{AnalysisCache, CacheKey};
use crate::config::IndexingConfig;
use crate::context::{DirectoryContext, FileContext, IndexingStatus, ProcessingStats, ProcessingStatus};
use crate::decision::{DecisionReason, DecisionReport};
use crate::handlers::Handler;
use crate::llm::{prompts, LlmClient};
use crate::paths::{portable_dir_path, portable_path};
use crate::plan::{Plan, Task, TaskId, TaskKind};
use crate::stage::PipelineStage;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Wall-clock limit for one task attempt
const TASK_TIMEOUT_SECS: u64 = 600;

/// Directory synthesis inputs above this many estimated tokens are chunked
const CHUNK_TOKEN_THRESHOLD: usize = 24_000;

/// Target size of one chunk, in estimated tokens
const CHUNK_TOKEN_TARGET: usize = 16_000;

/// Rough bytes-per-token heuristic used for the chunking estimate
const BYTES_PER_TOKEN: usize = 4;

// ============================================================================
// Run State
// ============================================================================

#[derive(Debug, Clone)]
enum FileOutcome {
    Completed(String),
    Failed(String),
}

/// Mutable state shared by executing tasks. Each node of the context tree has
/// exactly one writing task, so plain maps behind mutexes are enough.
#[derive(Default)]
struct RunState {
    file_outcomes: Mutex<HashMap<PathBuf, FileOutcome>>,
    dir_summaries: Mutex<HashMap<PathBuf, String>>,
    global_summary: Mutex<Option<String>>,
    /// Directories whose synthesis failed; their KB must not be written
    failed_dirs: Mutex<HashSet<PathBuf>>,
    stats: Mutex<ProcessingStats>,
    run_failed: Mutex<bool>,
}

impl RunState {
    fn record_error(&self, message: String) {
        error!("{message}");
        self.stats.lock().unwrap().add_error(message);
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct Executor {
    handler: Arc<dyn Handler>,
    source_root: PathBuf,
    cache: Arc<AnalysisCache>,
    llm: Arc<LlmClient>,
    assembler: Arc<KnowledgeFileAssembler>,
}

impl Executor {
    pub fn new(
        handler: Arc<dyn Handler>,
        source_root: PathBuf,
        cache: Arc<AnalysisCache>,
        llm: Arc<LlmClient>,
    ) -> Self {
        let assembler = Arc::new(KnowledgeFileAssembler::new(source_root.clone()));
        Self {
            handler,
            source_root,
            cache,
            llm,
            assembler,
        }
    }

    fn config(&self) -> &IndexingConfig {
        self.handler.config()
    }

    /// Run `plan` against the discovered `tree` and return the final status.
    ///
    /// The decision report is consulted for *why* a directory rebuilds:
    /// content-driven reasons force fresh synthesis, while `KB_MISSING` and
    /// `PROJECT_ROOT_FORCED` reuse cached synthesis so an unchanged rerun
    /// stays LLM-free.
    pub async fn execute(
        self: Arc<Self>,
        plan: Plan,
        tree: Arc<DirectoryContext>,
        report: Arc<DecisionReport>,
    ) -> IndexingStatus {
        let run_id = uuid::Uuid::new_v4();
        info!(
            "Executing plan: {} task(s), concurrency {}",
            plan.len(),
            self.config().file_processing.max_concurrent_operations
        );

        let state = Arc::new(RunState::default());
        {
            let mut stats = state.stats.lock().unwrap();
            stats.started_at = Some(Utc::now());
            stats.files_discovered = tree.total_files();
            stats.total_bytes = tree.total_bytes();
        }

        if self.config().debug_config.dry_run {
            info!("Dry-run: no LLM calls, cache writes, KB writes, or deletions");
            for task in &plan.tasks {
                info!(
                    "[dry-run] {} {}",
                    task.kind.name(),
                    task.kind.target().display()
                );
            }
            let mut stats = state.stats.lock().unwrap();
            stats.completed_at = Some(Utc::now());
            return IndexingStatus {
                run_id,
                overall_status: ProcessingStatus::Skipped,
                root_context: (*tree).clone(),
                stats: stats.clone(),
            };
        }

        self.run_dag(&plan, &tree, &report, &state).await;

        let run_failed = *state.run_failed.lock().unwrap();
        let mut root_context = (*tree).clone();
        apply_outcomes(&mut root_context, &state);
        root_context.processing_status = if run_failed {
            ProcessingStatus::Failed
        } else {
            ProcessingStatus::Completed
        };

        let mut stats = state.stats.lock().unwrap().clone();
        stats.llm_requests = self.llm.requests_made();
        stats.files_skipped = stats
            .files_discovered
            .saturating_sub(stats.files_processed);
        stats.completed_at = Some(Utc::now());

        IndexingStatus {
            run_id,
            overall_status: if run_failed {
                ProcessingStatus::Failed
            } else {
                ProcessingStatus::Completed
            },
            root_context,
            stats,
        }
    }

    /// Core scheduler: ready-queue feeding a JoinSet, gated by the semaphore.
    async fn run_dag(
        self: &Arc<Self>,
        plan: &Plan,
        tree: &Arc<DirectoryContext>,
        report: &Arc<DecisionReport>,
        state: &Arc<RunState>,
    ) {
        let tasks: HashMap<TaskId, Task> =
            plan.tasks.iter().map(|t| (t.id, t.clone())).collect();

        let mut remaining_deps: HashMap<TaskId, usize> = HashMap::new();
        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for task in plan.tasks.iter() {
            remaining_deps.insert(task.id, task.depends_on.len());
            for dep in &task.depends_on {
                dependents.entry(*dep).or_default().push(task.id);
            }
        }

        let mut ready: VecDeque<TaskId> = plan
            .tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| t.id)
            .collect();

        let semaphore = Arc::new(Semaphore::new(
            self.config().file_processing.max_concurrent_operations,
        ));
        let mut join_set: JoinSet<TaskId> = JoinSet::new();
        let mut completed = 0usize;

        loop {
            // Launch everything currently eligible.
            while let Some(task_id) = ready.pop_front() {
                let task = tasks[&task_id].clone();
                let executor = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let state = Arc::clone(state);
                let tree = Arc::clone(tree);
                let report = Arc::clone(report);
                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("semaphore closed mid-run");
                    executor
                        .run_task_with_retries(&task, &tree, &report, &state)
                        .await;
                    task.id
                });
            }

            let Some(finished) = join_set.join_next().await else {
                break;
            };
            let finished_id = match finished {
                Ok(id) => id,
                Err(e) => {
                    state.record_error(format!("task panicked: {e}"));
                    *state.run_failed.lock().unwrap() = true;
                    break;
                }
            };
            completed += 1;

            if *state.run_failed.lock().unwrap() {
                // Fail-fast: drop pending tasks, let in-flight ones drain.
                warn!("Run failed; dropping pending tasks");
                while join_set.join_next().await.is_some() {}
                break;
            }

            for dependent in dependents.get(&finished_id).cloned().unwrap_or_default() {
                let count = remaining_deps
                    .get_mut(&dependent)
                    .expect("dependent tracked");
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependent);
                }
            }

            if completed == tasks.len() && ready.is_empty() {
                break;
            }
        }
    }

    async fn run_task_with_retries(
        &self,
        task: &Task,
        tree: &DirectoryContext,
        report: &DecisionReport,
        state: &RunState,
    ) {
        let max_attempts = self.config().error_handling.max_retries.max(1);
        let base_delay = self.config().error_handling.retry_delay_seconds;
        let mut last_error = None;

        if matches!(task.kind, TaskKind::AnalyzeFile { .. }) {
            state.stats.lock().unwrap().files_processed += 1;
        }

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = Duration::from_secs_f64(base_delay * 2f64.powi(attempt as i32 - 1));
                info!(
                    "Retrying {} {} (attempt {}/{}) after {:?}",
                    task.kind.name(),
                    task.kind.target().display(),
                    attempt + 1,
                    max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let outcome = tokio::time::timeout(
                Duration::from_secs(TASK_TIMEOUT_SECS),
                self.run_task(task, tree, report, state),
            )
            .await;

            match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => {
                    warn!(
                        "{} {} failed (attempt {}): {e:#}",
                        task.kind.name(),
                        task.kind.target().display(),
                        attempt + 1
                    );
                    last_error = Some(format!("{e:#}"));
                }
                Err(_) => {
                    warn!(
                        "{} {} timed out after {}s (attempt {})",
                        task.kind.name(),
                        task.kind.target().display(),
                        TASK_TIMEOUT_SECS,
                        attempt + 1
                    );
                    last_error = Some(format!("timed out after {TASK_TIMEOUT_SECS}s"));
                }
            }
        }

        let message = last_error.unwrap_or_else(|| "unknown failure".to_string());
        self.record_permanent_failure(task, state, message);
    }

    fn record_permanent_failure(&self, task: &Task, state: &RunState, message: String) {
        match &task.kind {
            TaskKind::AnalyzeFile { file } => {
                state.record_error(format!("analyze_file {} failed: {message}", file.display()));
                state
                    .file_outcomes
                    .lock()
                    .unwrap()
                    .insert(file.clone(), FileOutcome::Failed(message));
                state.stats.lock().unwrap().files_failed += 1;
                if !self.config().error_handling.continue_on_file_errors {
                    *state.run_failed.lock().unwrap() = true;
                }
            }
            TaskKind::SynthesizeDirectory { directory } => {
                state.record_error(format!(
                    "synthesize_directory {} failed: {message}",
                    directory.display()
                ));
                state.failed_dirs.lock().unwrap().insert(directory.clone());
                *state.run_failed.lock().unwrap() = true;
            }
            TaskKind::AssembleKb { directory } => {
                state.record_error(format!(
                    "assemble_kb {} failed: {message}",
                    directory.display()
                ));
                *state.run_failed.lock().unwrap() = true;
            }
            TaskKind::DeleteOrphan { path } => {
                state.record_error(format!("delete_orphan {} failed: {message}", path.display()));
                *state.run_failed.lock().unwrap() = true;
            }
        }
    }

    async fn run_task(
        &self,
        task: &Task,
        tree: &DirectoryContext,
        report: &DecisionReport,
        state: &RunState,
    ) -> Result<()> {
        match &task.kind {
            TaskKind::AnalyzeFile { file } => self.analyze_file(file, tree, state).await,
            TaskKind::SynthesizeDirectory { directory } => {
                self.synthesize_directory(directory, tree, report, state).await
            }
            TaskKind::AssembleKb { directory } => self.assemble_kb(directory, tree, state),
            TaskKind::DeleteOrphan { path } => self.delete_orphan(path, state),
        }
    }

    // ------------------------------------------------------------------
    // analyze_file
    // ------------------------------------------------------------------

    async fn analyze_file(
        &self,
        file: &Path,
        tree: &DirectoryContext,
        state: &RunState,
    ) -> Result<()> {
        let file_ctx = find_file(tree, file)
            .with_context(|| format!("{} is not in the discovered tree", file.display()))?;
        let key = CacheKey::new(file, PipelineStage::FileAnalysis);
        let rendered_path = portable_path(file, &self.source_root);

        let content = if file_ctx.file_size == 0 {
            // Empty files never reach the LLM; the standardized analysis is
            // cached so later runs skip them too.
            let analysis = prompts::empty_file_analysis(file, &rendered_path);
            self.cache.put(&key, &analysis)?;
            analysis
        } else {
            let llm = Arc::clone(&self.llm);
            let file_path = file.to_path_buf();
            self.cache
                .rebuild(&key, || async move {
                    let source = tokio::fs::read_to_string(&file_path)
                        .await
                        .with_context(|| format!("failed to read {}", file_path.display()))?;
                    let prompt = prompts::file_analysis(&rendered_path, &source);
                    llm.call(PipelineStage::FileAnalysis, &file_path, None, &prompt)
                        .await
                })
                .await?
        };

        state
            .file_outcomes
            .lock()
            .unwrap()
            .insert(file.to_path_buf(), FileOutcome::Completed(content));
        state.stats.lock().unwrap().files_completed += 1;
        Ok(())
    }

    // ------------------------------------------------------------------
    // synthesize_directory
    // ------------------------------------------------------------------

    async fn synthesize_directory(
        &self,
        directory: &Path,
        tree: &DirectoryContext,
        report: &DecisionReport,
        state: &RunState,
    ) -> Result<()> {
        let dir_ctx = tree
            .find_directory(directory)
            .with_context(|| format!("{} is not in the discovered tree", directory.display()))?;
        let rendered_dir = portable_dir_path(directory, &self.source_root);

        // Content-driven rebuilds regenerate the synthesis; KB_MISSING and
        // the forced root reuse cached synthesis when it exists, keeping
        // unchanged reruns LLM-free.
        let force = report
            .decision_for(directory)
            .map(|d| {
                !matches!(
                    d.reason,
                    DecisionReason::KbMissing | DecisionReason::ProjectRootForced
                )
            })
            .unwrap_or(true);

        let combined = self.gather_synthesis_input(dir_ctx, state);
        let estimated_tokens = combined.len() / BYTES_PER_TOKEN;

        let analysis = if estimated_tokens > CHUNK_TOKEN_THRESHOLD {
            info!(
                "Chunking synthesis input for {} (~{estimated_tokens} tokens)",
                directory.display()
            );
            self.synthesize_chunked(directory, &rendered_dir, &combined, force)
                .await?
        } else {
            let key = CacheKey::new(directory, PipelineStage::DirectoryAnalysis);
            let llm = Arc::clone(&self.llm);
            let dir = directory.to_path_buf();
            let prompt = prompts::directory_analysis(&rendered_dir, &combined);
            self.build_cached(&key, force, || async move {
                llm.call(PipelineStage::DirectoryAnalysis, &dir, None, &prompt)
                    .await
            })
            .await?
        };

        if directory == self.source_root {
            let key = CacheKey::new(directory, PipelineStage::GlobalSummary);
            let llm = Arc::clone(&self.llm);
            let dir = directory.to_path_buf();
            let prompt = prompts::global_summary(
                &rendered_dir,
                &analysis,
                tree.total_files(),
                tree.total_directories(),
            );
            let global = self
                .build_cached(&key, force, || async move {
                    llm.call(PipelineStage::GlobalSummary, &dir, None, &prompt).await
                })
                .await?;
            *state.global_summary.lock().unwrap() = Some(global);
        }

        state
            .dir_summaries
            .lock()
            .unwrap()
            .insert(directory.to_path_buf(), analysis);
        state.stats.lock().unwrap().directories_processed += 1;
        Ok(())
    }

    async fn build_cached<F, Fut>(&self, key: &CacheKey, force: bool, producer: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        if force {
            self.cache.rebuild(key, producer).await
        } else {
            self.cache.get_or_build(key, producer).await
        }
    }

    /// Chunk pipeline: chunk-analysis per slice, chunk-aggregate across the
    /// partial summaries, then directory-analysis over the merged text.
    async fn synthesize_chunked(
        &self,
        directory: &Path,
        rendered_dir: &str,
        combined: &str,
        force: bool,
    ) -> Result<String> {
        let chunks = split_into_chunks(combined, CHUNK_TOKEN_TARGET * BYTES_PER_TOKEN);
        let chunk_count = chunks.len();
        let mut chunk_summaries = Vec::with_capacity(chunk_count);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let key = CacheKey::chunked(directory, PipelineStage::ChunkAnalysis, index);
            let llm = Arc::clone(&self.llm);
            let dir = directory.to_path_buf();
            let prompt = prompts::chunk_analysis(rendered_dir, index, chunk_count, &chunk);
            let chunk_info = index.to_string();
            let summary = self
                .build_cached(&key, force, || async move {
                    llm.call(
                        PipelineStage::ChunkAnalysis,
                        &dir,
                        Some(&chunk_info),
                        &prompt,
                    )
                    .await
                })
                .await?;
            chunk_summaries.push(summary);
        }

        let aggregate_key = CacheKey::new(directory, PipelineStage::ChunkAggregate);
        let llm = Arc::clone(&self.llm);
        let dir = directory.to_path_buf();
        let prompt = prompts::chunk_aggregate(rendered_dir, &chunk_summaries.join("\n\n---\n\n"));
        let aggregated = self
            .build_cached(&aggregate_key, force, || async move {
                llm.call(PipelineStage::ChunkAggregate, &dir, None, &prompt).await
            })
            .await?;

        let analysis_key = CacheKey::new(directory, PipelineStage::DirectoryAnalysis);
        let llm = Arc::clone(&self.llm);
        let dir = directory.to_path_buf();
        let prompt = prompts::directory_analysis(rendered_dir, &aggregated);
        self.build_cached(&analysis_key, force, || async move {
            llm.call(PipelineStage::DirectoryAnalysis, &dir, None, &prompt)
                .await
        })
        .await
    }

    /// Collect file analyses and child summaries for synthesis. Failed files
    /// are omitted; kept (not rebuilt) entries come from the cache.
    fn gather_synthesis_input(&self, dir_ctx: &DirectoryContext, state: &RunState) -> String {
        let mut sections = Vec::new();

        for file in dir_ctx.processable_files() {
            let analysis = self.file_analysis_for(&file.file_path, state);
            match analysis {
                Some(content) => sections.push(format!(
                    "### File: {}\n\n{content}",
                    portable_path(&file.file_path, &self.source_root)
                )),
                None => debug!(
                    "No analysis available for {}; omitting from synthesis",
                    file.file_path.display()
                ),
            }
        }

        for sub in dir_ctx.in_scope_subdirectories() {
            match self.directory_summary_for(&sub.directory_path, state) {
                Some(summary) => sections.push(format!(
                    "### Subdirectory: {}\n\n{summary}",
                    portable_dir_path(&sub.directory_path, &self.source_root)
                )),
                None => warn!(
                    "No summary available for subdirectory {}; omitting",
                    sub.directory_path.display()
                ),
            }
        }

        sections.join("\n\n")
    }

    /// This run's outcome, else the cached analysis from an earlier run.
    fn file_analysis_for(&self, file: &Path, state: &RunState) -> Option<String> {
        match state.file_outcomes.lock().unwrap().get(file) {
            Some(FileOutcome::Completed(content)) => return Some(content.clone()),
            Some(FileOutcome::Failed(_)) => return None,
            None => {}
        }
        let key = CacheKey::new(file, PipelineStage::FileAnalysis);
        self.cache.get(&key).map(|entry| entry.content)
    }

    fn directory_summary_for(&self, directory: &Path, state: &RunState) -> Option<String> {
        if let Some(summary) = state.dir_summaries.lock().unwrap().get(directory) {
            return Some(summary.clone());
        }
        let key = CacheKey::new(directory, PipelineStage::DirectoryAnalysis);
        self.cache.get(&key).map(|entry| entry.content)
    }

    // ------------------------------------------------------------------
    // assemble_kb
    // ------------------------------------------------------------------

    fn assemble_kb(&self, directory: &Path, tree: &DirectoryContext, state: &RunState) -> Result<()> {
        if state.failed_dirs.lock().unwrap().contains(directory) {
            warn!(
                "Skipping KB assembly for {}: synthesis failed",
                directory.display()
            );
            return Ok(());
        }

        let dir_ctx = tree
            .find_directory(directory)
            .with_context(|| format!("{} is not in the discovered tree", directory.display()))?;
        let kb_path = &dir_ctx.knowledge_file_path;
        if !self.handler.owns_output_path(kb_path, &self.source_root) {
            bail!(
                "refusing to write {} outside the {} namespace",
                kb_path.display(),
                self.handler.handler_type()
            );
        }

        // The root KB's Global Summary comes from the global-summary stage;
        // every other KB uses the directory's own synthesis.
        let global_summary = if directory == self.source_root {
            state
                .global_summary
                .lock()
                .unwrap()
                .clone()
                .or_else(|| {
                    self.cache
                        .get(&CacheKey::new(directory, PipelineStage::GlobalSummary))
                        .map(|e| e.content)
                })
                .unwrap_or_default()
        } else {
            self.directory_summary_for(directory, state).unwrap_or_default()
        };

        let file_outcomes = state.file_outcomes.lock().unwrap();
        let mut rendered_files: Vec<FileContext> = Vec::new();
        for file in dir_ctx.processable_files() {
            let mut rendered = file.clone();
            match file_outcomes.get(&file.file_path) {
                Some(FileOutcome::Completed(content)) => {
                    rendered.processing_status = ProcessingStatus::Completed;
                    rendered.knowledge_content = Some(content.clone());
                }
                Some(FileOutcome::Failed(message)) => {
                    rendered.processing_status = ProcessingStatus::Failed;
                    rendered.error_message = Some(message.clone());
                }
                None => {
                    let key = CacheKey::new(&file.file_path, PipelineStage::FileAnalysis);
                    if let Some(entry) = self.cache.get(&key) {
                        rendered.processing_status = ProcessingStatus::Completed;
                        rendered.knowledge_content = Some(entry.content);
                    }
                }
            }
            rendered_files.push(rendered);
        }
        drop(file_outcomes);

        let subdir_summaries: Vec<(PathBuf, String)> = dir_ctx
            .in_scope_subdirectories()
            .map(|sub| {
                let summary = self
                    .directory_summary_for(&sub.directory_path, state)
                    .unwrap_or_default();
                (sub.directory_path.clone(), summary)
            })
            .collect();

        let file_refs: Vec<&FileContext> = rendered_files.iter().collect();
        self.assembler.write(
            directory,
            &global_summary,
            &file_refs,
            &subdir_summaries,
            kb_path,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // delete_orphan
    // ------------------------------------------------------------------

    fn delete_orphan(&self, path: &Path, state: &RunState) -> Result<()> {
        if !self.handler.owns_output_path(path, &self.source_root) {
            bail!(
                "refusing to delete {} outside the {} namespace",
                path.display(),
                self.handler.handler_type()
            );
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!("Deleted orphan {}", path.display());
                state.stats.lock().unwrap().orphans_deleted += 1;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn find_file<'a>(tree: &'a DirectoryContext, path: &Path) -> Option<&'a FileContext> {
    if let Some(found) = tree.files.iter().find(|f| f.file_path == path) {
        return Some(found);
    }
    tree.subdirectories
        .iter()
        .find_map(|sub| find_file(sub, path))
}

/// Split `input` into chunks of at most `max_bytes`, preferring paragraph
/// boundaries so a section never straddles two chunks unless it is itself
/// oversized.
fn split_into_chunks(input: &str, max_bytes: usize) -> Vec<String> {
    if input.len() <= max_bytes {
        return vec![input.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for paragraph in input.split("\n\n") {
        if !current.is_empty() && current.len() + paragraph.len() + 2 > max_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
        // An individual paragraph larger than the budget is split hard.
        while current.len() > max_bytes {
            let split_at = floor_char_boundary(&current, max_bytes);
            let rest = current.split_off(split_at);
            chunks.push(std::mem::take(&mut current));
            current = rest;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Fold the run outcomes back into the context tree for the final status.
fn apply_outcomes(dir: &mut DirectoryContext, state: &RunState) {
    let file_outcomes = state.file_outcomes.lock().unwrap();
    let dir_summaries = state.dir_summaries.lock().unwrap();
    let failed_dirs = state.failed_dirs.lock().unwrap();
    apply_outcomes_inner(dir, &file_outcomes, &dir_summaries, &failed_dirs);
}

fn apply_outcomes_inner(
    dir: &mut DirectoryContext,
    file_outcomes: &HashMap<PathBuf, FileOutcome>,
    dir_summaries: &HashMap<PathBuf, String>,
    failed_dirs: &HashSet<PathBuf>,
) {
    for file in dir.files.iter_mut() {
        match file_outcomes.get(&file.file_path) {
            Some(FileOutcome::Completed(content)) => {
                file.processing_status = ProcessingStatus::Completed;
                file.knowledge_content = Some(content.clone());
                file.processing_completed = Some(Utc::now());
            }
            Some(FileOutcome::Failed(message)) => {
                file.processing_status = ProcessingStatus::Failed;
                file.error_message = Some(message.clone());
            }
            None if file.processing_status == ProcessingStatus::Pending => {
                file.processing_status = ProcessingStatus::Skipped;
            }
            None => {}
        }
    }
    if let Some(summary) = dir_summaries.get(&dir.directory_path) {
        dir.directory_summary = Some(summary.clone());
    }
    dir.processing_status = if failed_dirs.contains(&dir.directory_path) {
        ProcessingStatus::Failed
    } else if dir.is_empty() {
        ProcessingStatus::Skipped
    } else {
        ProcessingStatus::Completed
    };
    for sub in dir.subdirectories.iter_mut() {
        apply_outcomes_inner(sub, file_outcomes, dir_summaries, failed_dirs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_chunks_respects_budget() {
        let paragraphs: Vec<String> = (0..20).map(|i| format!("paragraph {i} {}", "x".repeat(50))).collect();
        let input = paragraphs.join("\n\n");
        let chunks = split_into_chunks(&input, 200);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 200, "chunk of {} bytes", chunk.len());
        }
        // Nothing is lost.
        let rejoined: usize = chunks.iter().map(|c| c.len()).sum();
        assert!(rejoined >= input.len() - chunks.len() * 2);
    }

    #[test]
    fn test_split_small_input_is_single_chunk() {
        let chunks = split_into_chunks("short text", 1000);
        assert_eq!(chunks, vec!["short text".to_string()]);
    }

    #[test]
    fn test_split_oversized_paragraph_hard_splits() {
        let input = "y".repeat(500);
        let chunks = split_into_chunks(&input, 200);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= 200));
        assert_eq!(chunks.concat(), input);
    }

    #[test]
    fn test_floor_char_boundary_on_multibyte() {
        let s = "héllo wörld";
        for i in 0..=s.len() {
            let b = floor_char_boundary(s, i);
            assert!(s.is_char_boundary(b));
            assert!(b <= i);
        }
    }
}
