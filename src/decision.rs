//! Rebuild Decision Engine
//!
//! Single authority for REBUILD / SKIP / DELETE decisions across a discovered
//! tree. Staleness checks used to be scattered across the executor, the
//! cache, and ad-hoc mtime comparisons; every caller now consumes this
//! engine's `DecisionReport` and never re-derives an outcome.
//!
//! The engine is pure with respect to side effects: it reads file metadata
//! but performs no writes and no LLM calls.

use crate::cache::{file_mtime, AnalysisCache, CacheKey};
use crate::config::IndexingMode;
use crate::context::DirectoryContext;
use crate::error::DecisionError;
use crate::handlers::Handler;
use crate::stage::PipelineStage;
use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

// ============================================================================
// Decision Types
// ============================================================================

/// What the pipeline should do with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Rebuild,
    Skip,
    Delete,
}

/// Why the outcome was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    CacheMissing,
    SourceNewer,
    FullMode,
    FullKbRebuildMode,
    UpToDate,
    FileTooLarge,
    ProjectRootForced,
    EmptyDirectory,
    KbMissing,
    StructureChanged,
    SubdirKbNewer,
    Orphan,
    NoHandlerAvailable,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheMissing => "CACHE_MISSING",
            Self::SourceNewer => "SOURCE_NEWER",
            Self::FullMode => "FULL_MODE",
            Self::FullKbRebuildMode => "FULL_KB_REBUILD_MODE",
            Self::UpToDate => "UP_TO_DATE",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::ProjectRootForced => "PROJECT_ROOT_FORCED",
            Self::EmptyDirectory => "EMPTY_DIRECTORY",
            Self::KbMissing => "KB_MISSING",
            Self::StructureChanged => "STRUCTURE_CHANGED",
            Self::SubdirKbNewer => "SUBDIR_KB_NEWER",
            Self::Orphan => "ORPHAN",
            Self::NoHandlerAvailable => "NO_HANDLER_AVAILABLE",
        }
    }
}

/// Whether a decision targets a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    File,
    Directory,
}

/// One decision for one path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub path: PathBuf,
    pub kind: DecisionKind,
    pub outcome: DecisionOutcome,
    pub reason: DecisionReason,

    /// Human-readable explanation, surfaced in dry-run reports
    pub reasoning_text: String,
}

/// Complete decision coverage for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionReport {
    pub decisions: Vec<Decision>,

    /// KB and cache files whose source no longer exists
    pub orphans: Vec<PathBuf>,
}

impl DecisionReport {
    /// Look up the decision recorded for `path`.
    pub fn decision_for(&self, path: &Path) -> Option<&Decision> {
        self.decisions.iter().find(|d| d.path == path)
    }

    /// Count of decisions with the given outcome
    pub fn count(&self, outcome: DecisionOutcome) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.outcome == outcome)
            .count()
    }

    /// Detect contradictory coverage: each path must be decided exactly once.
    pub fn validate(&self) -> Result<(), DecisionError> {
        let mut seen: HashMap<&Path, &Decision> = HashMap::new();
        for decision in &self.decisions {
            if let Some(previous) = seen.insert(decision.path.as_path(), decision) {
                return Err(DecisionError::Conflict {
                    path: decision.path.clone(),
                    first: previous.reason.as_str().to_string(),
                    second: decision.reason.as_str().to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Three-trigger staleness evaluation over a discovered tree
pub struct RebuildDecisionEngine {
    handler: Arc<dyn Handler>,
    source_root: PathBuf,
}

impl RebuildDecisionEngine {
    pub fn new(handler: Arc<dyn Handler>, source_root: PathBuf) -> Self {
        Self {
            handler,
            source_root,
        }
    }

    fn tolerance(&self) -> Duration {
        Duration::seconds(
            self.handler
                .config()
                .change_detection
                .timestamp_tolerance_seconds as i64,
        )
    }

    fn mode(&self) -> IndexingMode {
        self.handler.config().change_detection.indexing_mode
    }

    /// Produce decisions for every file and directory in `tree`, plus the
    /// orphan list for this handler's namespaces.
    pub fn evaluate(&self, tree: &DirectoryContext, cache: &AnalysisCache) -> Result<DecisionReport> {
        let mut report = DecisionReport::default();
        self.evaluate_directory(tree, cache, &mut report);
        self.collect_orphans(tree, &mut report);
        report.validate()?;
        Ok(report)
    }

    fn evaluate_directory(
        &self,
        dir: &DirectoryContext,
        cache: &AnalysisCache,
        report: &mut DecisionReport,
    ) {
        for file in &dir.files {
            let decision = self.decide_file(file, cache);
            report.decisions.push(decision);
        }
        for sub in &dir.subdirectories {
            self.evaluate_directory(sub, cache, report);
        }
        // Children (files and subdirectories) are decided first; the
        // directory decision couples to them so that a rebuild propagates
        // upward within the same run.
        let decision = self.decide_directory(dir, cache, report);
        report.decisions.push(decision);
    }

    // ------------------------------------------------------------------
    // Per-file decision
    // ------------------------------------------------------------------

    fn decide_file(&self, file: &crate::context::FileContext, cache: &AnalysisCache) -> Decision {
        use crate::context::ProcessingStatus;

        let make = |outcome, reason, text: String| Decision {
            path: file.file_path.clone(),
            kind: DecisionKind::File,
            outcome,
            reason,
            reasoning_text: text,
        };

        if file.processing_status == ProcessingStatus::Skipped {
            return make(
                DecisionOutcome::Skip,
                DecisionReason::FileTooLarge,
                format!("file size {} exceeds the configured limit", file.file_size),
            );
        }

        let key = CacheKey::new(&file.file_path, PipelineStage::FileAnalysis);
        let Some(cache_mtime) = cache.mtime(&key) else {
            return make(
                DecisionOutcome::Rebuild,
                DecisionReason::CacheMissing,
                "no cached analysis exists for this file".to_string(),
            );
        };

        if file.last_modified > cache_mtime + self.tolerance() {
            return make(
                DecisionOutcome::Rebuild,
                DecisionReason::SourceNewer,
                format!(
                    "source modified at {} is newer than cached analysis from {}",
                    file.last_modified.format("%Y-%m-%dT%H:%M:%SZ"),
                    cache_mtime.format("%Y-%m-%dT%H:%M:%SZ"),
                ),
            );
        }

        if self.mode() == IndexingMode::Full {
            return make(
                DecisionOutcome::Rebuild,
                DecisionReason::FullMode,
                "full mode regenerates every analysis".to_string(),
            );
        }

        make(
            DecisionOutcome::Skip,
            DecisionReason::UpToDate,
            "cached analysis is current".to_string(),
        )
    }

    // ------------------------------------------------------------------
    // Per-directory decision (three-trigger staleness)
    // ------------------------------------------------------------------

    fn decide_directory(
        &self,
        dir: &DirectoryContext,
        cache: &AnalysisCache,
        report: &DecisionReport,
    ) -> Decision {
        let make = |outcome, reason, text: String| Decision {
            path: dir.directory_path.clone(),
            kind: DecisionKind::Directory,
            outcome,
            reason,
            reasoning_text: text,
        };
        let is_root = dir.directory_path == self.source_root;

        if dir.is_empty() {
            return make(
                DecisionOutcome::Skip,
                DecisionReason::EmptyDirectory,
                "directory contains no processable files and no in-scope subdirectories"
                    .to_string(),
            );
        }

        let Some(kb_mtime) = file_mtime(&dir.knowledge_file_path) else {
            return make(
                DecisionOutcome::Rebuild,
                DecisionReason::KbMissing,
                format!(
                    "knowledge file {} does not exist",
                    dir.knowledge_file_path.display()
                ),
            );
        };
        let threshold = kb_mtime + self.tolerance();

        // Trigger A: directory inode newer than the KB file means entries
        // were added, removed, or renamed.
        if let Some(dir_mtime) = file_mtime(&dir.directory_path) {
            if dir_mtime > threshold {
                return make(
                    DecisionOutcome::Rebuild,
                    DecisionReason::StructureChanged,
                    "directory structure changed after the knowledge file was written"
                        .to_string(),
                );
            }
        }

        // Trigger B: a child file changed and its analysis has been (or is
        // being) refreshed this run. A modified source alone is not enough;
        // the layered pipeline only propagates once the file-level analysis
        // caught up.
        for file in dir.processable_files() {
            let file_rebuilds = report
                .decision_for(&file.file_path)
                .is_some_and(|d| d.outcome == DecisionOutcome::Rebuild);
            let cache_refreshed = file.last_modified > threshold
                && cache
                    .mtime(&CacheKey::new(&file.file_path, PipelineStage::FileAnalysis))
                    .is_some_and(|cache_mtime| cache_mtime > threshold);
            if file_rebuilds || cache_refreshed {
                return make(
                    DecisionOutcome::Rebuild,
                    DecisionReason::SourceNewer,
                    format!(
                        "analysis of {} is newer than the knowledge file",
                        file.file_name()
                    ),
                );
            }
        }

        // Trigger C: a subdirectory's KB was (or is being) refreshed; the
        // parent embeds subdirectory summaries verbatim, so it must follow.
        for sub in dir.in_scope_subdirectories() {
            let sub_rebuilds = report
                .decision_for(&sub.directory_path)
                .is_some_and(|d| d.outcome == DecisionOutcome::Rebuild);
            let sub_kb_newer = file_mtime(&sub.knowledge_file_path)
                .is_some_and(|sub_kb_mtime| sub_kb_mtime > threshold);
            if sub_rebuilds || sub_kb_newer {
                return make(
                    DecisionOutcome::Rebuild,
                    DecisionReason::SubdirKbNewer,
                    format!(
                        "subdirectory knowledge file {} is newer",
                        sub.knowledge_file_path.display()
                    ),
                );
            }
        }

        match self.mode() {
            IndexingMode::FullKbRebuild => make(
                DecisionOutcome::Rebuild,
                DecisionReason::FullKbRebuildMode,
                "full_kb_rebuild mode regenerates every knowledge file".to_string(),
            ),
            IndexingMode::Full => make(
                DecisionOutcome::Rebuild,
                DecisionReason::FullMode,
                "full mode regenerates everything".to_string(),
            ),
            // The root never skips: its KB must be current after every run.
            // With no staleness signal the rebuild reuses cached synthesis,
            // so an unchanged rerun still makes zero LLM calls.
            IndexingMode::Incremental if is_root => {
                let kb_name = dir
                    .knowledge_file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                make(
                    DecisionOutcome::Rebuild,
                    DecisionReason::ProjectRootForced,
                    format!("project root always rebuilds to keep {kb_name} current"),
                )
            }
            IndexingMode::Incremental => make(
                DecisionOutcome::Skip,
                DecisionReason::UpToDate,
                "knowledge file is current".to_string(),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Orphan detection
    // ------------------------------------------------------------------

    /// Emit DELETE entries for cache and KB files whose source path no
    /// longer exists or has dropped out of scope. The scan never leaves this
    /// handler's namespaces.
    fn collect_orphans(&self, tree: &DirectoryContext, report: &mut DecisionReport) {
        let cache_root = self.handler.cache_root(&self.source_root);
        if cache_root.is_dir() {
            for entry in WalkDir::new(&cache_root).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let Some(source) = self
                    .handler
                    .source_path_for_cache_entry(path, &self.source_root)
                else {
                    continue;
                };
                if !source.exists() {
                    debug!(
                        "Orphaned cache entry {} (source {} gone)",
                        path.display(),
                        source.display()
                    );
                    report.orphans.push(path.to_path_buf());
                }
            }
        }

        let kb_root = self.handler.kb_root(&self.source_root);
        if kb_root.is_dir() {
            for entry in WalkDir::new(&kb_root).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                if path.starts_with(&cache_root) {
                    continue;
                }
                let Some(source_dir) = self
                    .handler
                    .source_path_for_kb_file(path, &self.source_root)
                else {
                    continue;
                };
                let in_scope = tree
                    .find_directory(&source_dir)
                    .map(|d| !d.is_empty())
                    .unwrap_or(false);
                if !source_dir.is_dir() || !in_scope {
                    debug!(
                        "Orphaned knowledge file {} (directory {} gone or out of scope)",
                        path.display(),
                        source_dir.display()
                    );
                    report.orphans.push(path.to_path_buf());
                }
            }
        }

        report.orphans.sort();
        report.orphans.dedup();
    }
}

/// Summary line describing a report, used by dry-run output.
pub fn summarize_report(report: &DecisionReport) -> String {
    format!(
        "{} rebuild, {} skip, {} orphan(s)",
        report.count(DecisionOutcome::Rebuild),
        report.count(DecisionOutcome::Skip),
        report.orphans.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AnalysisCache;
    use crate::defaults;
    use crate::discovery;
    use crate::handlers::ProjectBaseHandler;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        handler: Arc<dyn Handler>,
        cache: AnalysisCache,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        fs::write(root.join("README.md"), "# X").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.py"), "print('x')").unwrap();

        let config = defaults::default_config_for("project-base").unwrap();
        let handler: Arc<dyn Handler> =
            Arc::new(ProjectBaseHandler::new(root.join(".knowledge"), config));
        let cache = AnalysisCache::new(Arc::clone(&handler), root.clone());
        Fixture {
            _tmp: tmp,
            root,
            handler,
            cache,
        }
    }

    fn engine(fx: &Fixture) -> RebuildDecisionEngine {
        RebuildDecisionEngine::new(Arc::clone(&fx.handler), fx.root.clone())
    }

    #[test]
    fn test_fresh_tree_rebuilds_everything() {
        let fx = fixture();
        let tree = discovery::discover(fx.handler.as_ref(), &fx.root).unwrap();
        let report = engine(&fx).evaluate(&tree, &fx.cache).unwrap();

        let file_decision = report.decision_for(&fx.root.join("src/main.py")).unwrap();
        assert_eq!(file_decision.outcome, DecisionOutcome::Rebuild);
        assert_eq!(file_decision.reason, DecisionReason::CacheMissing);

        let dir_decision = report.decision_for(&fx.root.join("src")).unwrap();
        assert_eq!(dir_decision.outcome, DecisionOutcome::Rebuild);
        assert_eq!(dir_decision.reason, DecisionReason::KbMissing);

        // No knowledge file exists yet, so the root reports KB_MISSING
        // rather than the forced-root fallback.
        let root_decision = report.decision_for(&fx.root).unwrap();
        assert_eq!(root_decision.outcome, DecisionOutcome::Rebuild);
        assert_eq!(root_decision.reason, DecisionReason::KbMissing);
    }

    /// Write fresh caches and KB files so no staleness signal fires.
    fn make_everything_current(fx: &Fixture, tree: &DirectoryContext) {
        for file in [fx.root.join("README.md"), fx.root.join("src/main.py")] {
            if file.exists() {
                fx.cache
                    .put(&CacheKey::new(&file, PipelineStage::FileAnalysis), "cached")
                    .unwrap();
            }
        }
        let mut kb_paths = Vec::new();
        tree.visit_bottom_up(&mut |d| kb_paths.push(d.knowledge_file_path.clone()));
        for kb in kb_paths {
            crate::cache::write_atomic(&kb, "kb content").unwrap();
        }
    }

    #[test]
    fn test_project_root_always_rebuilds_even_when_current() {
        let fx = fixture();
        let tree = discovery::discover(fx.handler.as_ref(), &fx.root).unwrap();
        make_everything_current(&fx, &tree);

        let report = engine(&fx).evaluate(&tree, &fx.cache).unwrap();

        let src_decision = report.decision_for(&fx.root.join("src")).unwrap();
        assert_eq!(src_decision.outcome, DecisionOutcome::Skip);
        assert_eq!(src_decision.reason, DecisionReason::UpToDate);

        let root_decision = report.decision_for(&fx.root).unwrap();
        assert_eq!(root_decision.outcome, DecisionOutcome::Rebuild);
        assert_eq!(root_decision.reason, DecisionReason::ProjectRootForced);
        assert!(root_decision.reasoning_text.contains("root_kb.md"));
    }

    #[test]
    fn test_rebuilding_file_propagates_to_ancestors_in_same_run() {
        let fx = fixture();
        let tree = discovery::discover(fx.handler.as_ref(), &fx.root).unwrap();
        make_everything_current(&fx, &tree);

        // Drop one file's cache entry: the file rebuilds, so its directory
        // and the root must follow within this run.
        fx.cache
            .delete(&CacheKey::new(
                fx.root.join("src/main.py"),
                PipelineStage::FileAnalysis,
            ))
            .unwrap();

        let report = engine(&fx).evaluate(&tree, &fx.cache).unwrap();
        let file_decision = report.decision_for(&fx.root.join("src/main.py")).unwrap();
        assert_eq!(file_decision.reason, DecisionReason::CacheMissing);

        let src_decision = report.decision_for(&fx.root.join("src")).unwrap();
        assert_eq!(src_decision.outcome, DecisionOutcome::Rebuild);
        assert_eq!(src_decision.reason, DecisionReason::SourceNewer);

        let root_decision = report.decision_for(&fx.root).unwrap();
        assert_eq!(root_decision.outcome, DecisionOutcome::Rebuild);
        assert_eq!(root_decision.reason, DecisionReason::SubdirKbNewer);
    }

    #[test]
    fn test_empty_directory_skips_every_run() {
        let fx = fixture();
        fs::create_dir_all(fx.root.join("images")).unwrap();
        let tree = discovery::discover(fx.handler.as_ref(), &fx.root).unwrap();

        for _ in 0..2 {
            let report = engine(&fx).evaluate(&tree, &fx.cache).unwrap();
            let decision = report.decision_for(&fx.root.join("images")).unwrap();
            assert_eq!(decision.outcome, DecisionOutcome::Skip);
            assert_eq!(decision.reason, DecisionReason::EmptyDirectory);
        }
    }

    #[test]
    fn test_up_to_date_file_skips() {
        let fx = fixture();
        let file = fx.root.join("src/main.py");
        fx.cache
            .put(&CacheKey::new(&file, PipelineStage::FileAnalysis), "cached")
            .unwrap();

        let tree = discovery::discover(fx.handler.as_ref(), &fx.root).unwrap();
        let report = engine(&fx).evaluate(&tree, &fx.cache).unwrap();
        let decision = report.decision_for(&file).unwrap();
        assert_eq!(decision.outcome, DecisionOutcome::Skip);
        assert_eq!(decision.reason, DecisionReason::UpToDate);
    }

    #[test]
    fn test_full_mode_rebuilds_cached_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        fs::write(root.join("a.py"), "x").unwrap();

        let mut config = defaults::default_config_for("project-base").unwrap();
        config.change_detection.indexing_mode = IndexingMode::Full;
        let handler: Arc<dyn Handler> =
            Arc::new(ProjectBaseHandler::new(root.join(".knowledge"), config));
        let cache = AnalysisCache::new(Arc::clone(&handler), root.clone());
        cache
            .put(
                &CacheKey::new(root.join("a.py"), PipelineStage::FileAnalysis),
                "cached",
            )
            .unwrap();

        let tree = discovery::discover(handler.as_ref(), &root).unwrap();
        let report = RebuildDecisionEngine::new(Arc::clone(&handler), root.clone())
            .evaluate(&tree, &cache)
            .unwrap();
        let decision = report.decision_for(&root.join("a.py")).unwrap();
        assert_eq!(decision.outcome, DecisionOutcome::Rebuild);
        assert_eq!(decision.reason, DecisionReason::FullMode);
    }

    #[test]
    fn test_orphaned_cache_entry_is_deleted() {
        let fx = fixture();
        let ghost = fx.root.join("src/removed.py");
        fx.cache
            .put(&CacheKey::new(&ghost, PipelineStage::FileAnalysis), "stale")
            .unwrap();

        let tree = discovery::discover(fx.handler.as_ref(), &fx.root).unwrap();
        let report = engine(&fx).evaluate(&tree, &fx.cache).unwrap();
        assert_eq!(report.orphans.len(), 1);
        assert!(report.orphans[0]
            .to_string_lossy()
            .contains("removed.py.file-analysis.md"));
    }

    #[test]
    fn test_live_cache_entry_is_not_an_orphan() {
        let fx = fixture();
        fx.cache
            .put(
                &CacheKey::new(fx.root.join("src/main.py"), PipelineStage::FileAnalysis),
                "live",
            )
            .unwrap();

        let tree = discovery::discover(fx.handler.as_ref(), &fx.root).unwrap();
        let report = engine(&fx).evaluate(&tree, &fx.cache).unwrap();
        assert!(report.orphans.is_empty());
    }

    #[test]
    fn test_report_covers_every_node_once() {
        let fx = fixture();
        let tree = discovery::discover(fx.handler.as_ref(), &fx.root).unwrap();
        let report = engine(&fx).evaluate(&tree, &fx.cache).unwrap();

        // Two files, two directories.
        assert_eq!(report.decisions.len(), 4);
        report.validate().unwrap();
    }
}
