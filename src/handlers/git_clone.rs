//! Git-Clone Handler
//!
//! Owns mirrored repositories under `{knowledge_dir}/git-clones/<repo>/`.
//! KB files are written into the mirror tree itself (`root_kb.md` at the repo
//! root, `<dirname>_kb.md` below), and analyses are cached under the shared
//! `{knowledge_dir}/git-clones/cache/<repo>/` subtree. Enumeration therefore
//! skips generated `*_kb.md` files so the handler never indexes its own
//! output.

use super::{cache_file_name, Handler, CACHE_DIR_NAME, KB_FILE_SUFFIX, ROOT_KB_FILENAME};
use crate::config::IndexingConfig;
use crate::stage::PipelineStage;
use std::path::{Path, PathBuf};

pub struct GitCloneHandler {
    knowledge_dir: PathBuf,
    config: IndexingConfig,
}

impl GitCloneHandler {
    pub fn new(knowledge_dir: PathBuf, config: IndexingConfig) -> Self {
        Self {
            knowledge_dir,
            config,
        }
    }

    /// Directory holding all mirrored repositories
    fn clones_root(&self) -> PathBuf {
        self.knowledge_dir.join("git-clones")
    }

    /// The mirrored repository root containing `path`, if any
    fn repo_root_of(&self, path: &Path) -> Option<PathBuf> {
        let rel = path.strip_prefix(self.clones_root()).ok()?;
        let repo_name = rel.components().next()?;
        Some(self.clones_root().join(repo_name.as_os_str()))
    }
}

impl Handler for GitCloneHandler {
    fn handler_type(&self) -> &str {
        "git-clones"
    }

    fn can_handle(&self, path: &Path) -> bool {
        match self.repo_root_of(path) {
            // The immediate subdirectory must look like a repository.
            Some(repo_root) => repo_root.join(".git").is_dir(),
            None => false,
        }
    }

    fn knowledge_path(&self, target_path: &Path, source_root: &Path) -> PathBuf {
        if target_path == source_root {
            return source_root.join(ROOT_KB_FILENAME);
        }
        let dirname = target_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        target_path.join(format!("{dirname}{KB_FILE_SUFFIX}"))
    }

    fn cache_path(
        &self,
        target_path: &Path,
        _source_root: &Path,
        stage: PipelineStage,
        chunk: Option<usize>,
    ) -> PathBuf {
        // Cache paths are keyed relative to the clones root so every repo
        // shares one cache namespace without collisions.
        let rel = target_path
            .strip_prefix(self.clones_root())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| {
                PathBuf::from(target_path.file_name().unwrap_or_default())
            });
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let parent = rel.parent().unwrap_or_else(|| Path::new(""));
        self.clones_root()
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
            // Generated KB files live inside the mirror tree.
            name.ends_with(KB_FILE_SUFFIX)
                || self.config.content_filtering.is_extension_excluded(candidate)
        }
    }

    fn owns_output_path(&self, path: &Path, _source_root: &Path) -> bool {
        path.starts_with(self.clones_root())
    }

    fn cache_root(&self, _source_root: &Path) -> PathBuf {
        self.clones_root().join(CACHE_DIR_NAME)
    }

    fn kb_root(&self, source_root: &Path) -> PathBuf {
        // KB files live inside the mirror tree itself.
        source_root.to_path_buf()
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
        Some(self.clones_root().join(parent).join(stem))
    }

    fn source_path_for_kb_file(&self, kb_file: &Path, source_root: &Path) -> Option<PathBuf> {
        super::mirrored_kb_source_path(kb_file, &self.kb_root(source_root), source_root)
    }

    fn config(&self) -> &IndexingConfig {
        &self.config
    }
}
