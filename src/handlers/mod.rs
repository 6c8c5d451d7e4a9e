//! Source Handlers
//!
//! A handler owns one kind of indexable source: it declares responsibility
//! via `can_handle`, computes the knowledge-file and cache-file paths for its
//! namespace, and applies its own exclusion rules during discovery.
//!
//! # Isolation
//!
//! Each filesystem path is owned by exactly one handler, and a handler's
//! writes are confined to the namespace its `knowledge_path` / `cache_path`
//! declare. The executor checks `owns_output_path` before every write or
//! delete; a git-clone run must never touch project-base KB files.

mod git_clone;
mod pdf_knowledge;
mod project_base;

pub use git_clone::GitCloneHandler;
pub use pdf_knowledge::PdfKnowledgeHandler;
pub use project_base::ProjectBaseHandler;

use crate::config::IndexingConfig;
use crate::stage::PipelineStage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Knowledge-file name for a source root
pub const ROOT_KB_FILENAME: &str = "root_kb.md";

/// Suffix of every generated knowledge file
pub const KB_FILE_SUFFIX: &str = "_kb.md";

/// Cache subdirectory name within a handler namespace
pub const CACHE_DIR_NAME: &str = "cache";

/// Strategy object owning one kind of indexable source
pub trait Handler: Send + Sync {
    /// Handler type string, also the config file prefix and namespace name
    fn handler_type(&self) -> &str;

    /// Whether this handler is responsible for `path`
    fn can_handle(&self, path: &Path) -> bool;

    /// Absolute KB file location for a directory under `source_root`.
    ///
    /// The source root itself maps to `root_kb.md`; descendants map to
    /// `<relative-dir>/<dirname>_kb.md` within the handler namespace.
    fn knowledge_path(&self, target_path: &Path, source_root: &Path) -> PathBuf;

    /// Absolute cache file location for `(target_path, stage)`. Chunk stages
    /// carry an index making each chunk entry distinct.
    fn cache_path(
        &self,
        target_path: &Path,
        source_root: &Path,
        stage: PipelineStage,
        chunk: Option<usize>,
    ) -> PathBuf;

    /// Handler-specific exclusion predicate; `true` means skip the path.
    fn is_excluded(&self, candidate: &Path) -> bool;

    /// Whether `path` lies inside this handler's writable output namespace.
    fn owns_output_path(&self, path: &Path, source_root: &Path) -> bool;

    /// Root of this handler's cache namespace for orphan scans.
    fn cache_root(&self, source_root: &Path) -> PathBuf;

    /// Root of this handler's KB namespace for orphan scans.
    fn kb_root(&self, source_root: &Path) -> PathBuf;

    /// Source path a cache entry belongs to, for orphan detection.
    fn source_path_for_cache_entry(&self, cache_file: &Path, source_root: &Path)
        -> Option<PathBuf>;

    /// Source directory a KB file belongs to, for orphan detection.
    fn source_path_for_kb_file(&self, kb_file: &Path, source_root: &Path) -> Option<PathBuf>;

    /// The configuration this handler was constructed with
    fn config(&self) -> &IndexingConfig;
}

/// Compose a cache filename: `<stem>.<stage>[.<chunk>].md`
pub(crate) fn cache_file_name(file_name: &str, stage: PipelineStage, chunk: Option<usize>) -> String {
    match chunk {
        Some(n) => format!("{file_name}.{}.{n}.md", stage.cache_suffix()),
        None => format!("{file_name}.{}.md", stage.cache_suffix()),
    }
}

/// Inverse of [`cache_file_name`]: recover `(stem, stage, chunk)`.
pub(crate) fn parse_cache_file_name(name: &str) -> Option<(String, PipelineStage, Option<usize>)> {
    let rest = name.strip_suffix(".md")?;
    for stage in PipelineStage::all() {
        let suffix = format!(".{}", stage.cache_suffix());
        if let Some(stem) = rest.strip_suffix(&suffix) {
            return Some((stem.to_string(), stage, None));
        }
        let chunk_marker = format!("{suffix}.");
        if let Some(pos) = rest.rfind(&chunk_marker) {
            let tail = &rest[pos + chunk_marker.len()..];
            if let Ok(chunk) = tail.parse::<usize>() {
                return Some((rest[..pos].to_string(), stage, Some(chunk)));
            }
        }
    }
    None
}

/// Shared KB reverse mapping for handlers whose KB namespace mirrors the
/// source tree: `<kb_root>/root_kb.md` maps to the source root and
/// `<kb_root>/<rel>/<dirname>_kb.md` maps to `<source_root>/<rel>`.
pub(crate) fn mirrored_kb_source_path(
    kb_file: &Path,
    kb_root: &Path,
    source_root: &Path,
) -> Option<PathBuf> {
    let rel = kb_file.strip_prefix(kb_root).ok()?;
    let name = rel.file_name()?.to_string_lossy();
    if rel.components().count() == 1 && name == ROOT_KB_FILENAME {
        return Some(source_root.to_path_buf());
    }
    let parent = rel.parent()?;
    let dirname = parent.file_name()?.to_string_lossy();
    if name == format!("{dirname}{KB_FILE_SUFFIX}") {
        Some(source_root.join(parent))
    } else {
        None
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Priority-ordered handler lookup.
///
/// The first handler whose `can_handle` returns true wins. Paths no handler
/// claims are warned about and skipped; callers must treat `None` as a SKIP
/// decision, never guess a handler.
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler; earlier registrations take priority.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.push(handler);
    }

    /// Resolve the handler responsible for `path`, or warn and return `None`.
    pub fn handler_for(&self, path: &Path) -> Option<Arc<dyn Handler>> {
        for handler in &self.handlers {
            if handler.can_handle(path) {
                return Some(Arc::clone(handler));
            }
        }
        warn!("No handler available for {}; skipping", path.display());
        None
    }

    /// Resolve a handler by its type string.
    pub fn handler_by_type(&self, handler_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .iter()
            .find(|h| h.handler_type() == handler_type)
            .map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
