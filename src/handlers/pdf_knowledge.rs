//! PDF-Knowledge Handler
//!
//! Owns directories of PDF collections. Only `.pdf` files qualify for
//! analysis; everything else is excluded. Layout mirrors the project-base
//! handler under the `pdf-knowledge` namespace.

use super::{cache_file_name, Handler, CACHE_DIR_NAME, ROOT_KB_FILENAME};
use crate::config::IndexingConfig;
use crate::stage::PipelineStage;
use std::path::{Path, PathBuf};

pub struct PdfKnowledgeHandler {
    knowledge_dir: PathBuf,
    config: IndexingConfig,
}

impl PdfKnowledgeHandler {
    pub fn new(knowledge_dir: PathBuf, config: IndexingConfig) -> Self {
        Self {
            knowledge_dir,
            config,
        }
    }

    fn namespace(&self) -> PathBuf {
        self.knowledge_dir.join(self.handler_type())
    }

    fn relative(&self, target_path: &Path, source_root: &Path) -> PathBuf {
        target_path
            .strip_prefix(source_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(target_path.file_name().unwrap_or_default()))
    }

    fn is_pdf(path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("pdf"))
    }
}

impl Handler for PdfKnowledgeHandler {
    fn handler_type(&self) -> &str {
        "pdf-knowledge"
    }

    fn can_handle(&self, path: &Path) -> bool {
        // A PDF collection is a directory with at least one PDF at top level.
        if !path.is_dir() || path.starts_with(&self.knowledge_dir) {
            return false;
        }
        std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .flatten()
                    .any(|e| e.path().is_file() && Self::is_pdf(&e.path()))
            })
            .unwrap_or(false)
    }

    fn knowledge_path(&self, target_path: &Path, source_root: &Path) -> PathBuf {
        if target_path == source_root {
            return self.namespace().join(ROOT_KB_FILENAME);
        }
        let rel = self.relative(target_path, source_root);
        let dirname = target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        self.namespace().join(rel).join(format!("{dirname}_kb.md"))
    }

    fn cache_path(
        &self,
        target_path: &Path,
        source_root: &Path,
        stage: PipelineStage,
        chunk: Option<usize>,
    ) -> PathBuf {
        let rel = self.relative(target_path, source_root);
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let parent = rel.parent().unwrap_or_else(|| Path::new(""));
        self.namespace()
            .join(CACHE_DIR_NAME)
            .join(parent)
            .join(cache_file_name(&name, stage, chunk))
    }

    fn is_excluded(&self, candidate: &Path) -> bool {
        let name = match candidate.file_name() {
            Some(n) => n.to_string_lossy(),
            None => return false,
        };
        if candidate.is_dir() {
            self.config.content_filtering.is_directory_excluded(&name)
        } else {
            !Self::is_pdf(candidate)
        }
    }

    fn owns_output_path(&self, path: &Path, _source_root: &Path) -> bool {
        path.starts_with(self.namespace())
    }

    fn cache_root(&self, _source_root: &Path) -> PathBuf {
        self.namespace().join(CACHE_DIR_NAME)
    }

    fn kb_root(&self, _source_root: &Path) -> PathBuf {
        self.namespace()
    }

    fn source_path_for_cache_entry(
        &self,
        cache_file: &Path,
        source_root: &Path,
    ) -> Option<PathBuf> {
        let rel = cache_file.strip_prefix(self.cache_root(source_root)).ok()?;
        let name = rel.file_name()?.to_string_lossy();
        let (stem, _, _) = super::parse_cache_file_name(&name)?;
        let parent = rel.parent().unwrap_or_else(|| Path::new(""));
        let candidate = source_root.join(parent).join(&stem);
        // The source root's own entries are stored under the "root" stem.
        if parent.as_os_str().is_empty() && stem == "root" && !candidate.exists() {
            return Some(source_root.to_path_buf());
        }
        Some(candidate)
    }

    fn source_path_for_kb_file(&self, kb_file: &Path, source_root: &Path) -> Option<PathBuf> {
        super::mirrored_kb_source_path(kb_file, &self.kb_root(source_root), source_root)
    }

    fn config(&self) -> &IndexingConfig {
        &self.config
    }
}
