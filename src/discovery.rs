//! Source Discovery
//!
//! Walks a source tree through its handler's exclusion rules and produces the
//! `DirectoryContext` tree the rest of the pipeline operates on. Discovery is
//! read-only and idempotent: two walks over an unchanged tree yield equal
//! contexts up to timestamps.

use crate::context::{DirectoryContext, FileContext, ProcessingStatus};
use crate::handlers::Handler;
use crate::source::SourceMetadata;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Walk `source_root` with `handler`, producing the full context tree.
///
/// Files are included when they exist, are regular files, pass the handler's
/// exclusions, and fit the size cap; oversized files stay in the context as
/// `Skipped` so reports can name them. Symlinks resolving outside the source
/// root are not followed.
pub fn discover(handler: &dyn Handler, source_root: &Path) -> Result<DirectoryContext> {
    let canonical_root = source_root
        .canonicalize()
        .with_context(|| format!("source root {} is not accessible", source_root.display()))?;
    walk_directory(handler, source_root, source_root, &canonical_root)
}

/// Summarize a discovered tree into source metadata.
pub fn source_metadata(tree: &DirectoryContext) -> SourceMetadata {
    let mut metadata = SourceMetadata {
        is_healthy: true,
        last_discovered: Some(Utc::now()),
        estimated_file_count: tree.total_files(),
        estimated_size_mb: tree.total_bytes() as f64 / (1024.0 * 1024.0),
        requires_llm_processing: !tree.is_empty(),
        ..SourceMetadata::default()
    };
    collect_stale(tree, &mut metadata);
    metadata
}

fn collect_stale(tree: &DirectoryContext, metadata: &mut SourceMetadata) {
    for file in &tree.files {
        if file.processing_status == ProcessingStatus::Skipped {
            metadata.stale_files.insert(file.file_path.clone());
        }
    }
    for sub in &tree.subdirectories {
        collect_stale(sub, metadata);
    }
}

fn walk_directory(
    handler: &dyn Handler,
    directory: &Path,
    source_root: &Path,
    canonical_root: &Path,
) -> Result<DirectoryContext> {
    let kb_path = handler.knowledge_path(directory, source_root);
    let mut ctx = DirectoryContext::new(directory.to_path_buf(), kb_path);

    let mut entries: Vec<_> = fs::read_dir(directory)
        .with_context(|| format!("failed to read directory {}", directory.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list {}", directory.display()))?;

    // Deterministic traversal order keeps discovery idempotent.
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if handler.is_excluded(&path) {
            debug!("Excluded by handler: {}", path.display());
            continue;
        }
        if !follows_into_root(&path, canonical_root) {
            warn!(
                "Skipping symlink escaping the source root: {}",
                path.display()
            );
            continue;
        }

        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", path.display()))?;

        if file_type.is_dir() || (file_type.is_symlink() && path.is_dir()) {
            let child = walk_directory(handler, &path, source_root, canonical_root)?;
            ctx.subdirectories.push(child);
        } else if path.is_file() {
            match file_context_for(handler, &path) {
                Ok(Some(file_ctx)) => ctx.files.push(file_ctx),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable file {}: {e:#}", path.display()),
            }
        }
    }

    Ok(ctx)
}

fn file_context_for(handler: &dyn Handler, path: &Path) -> Result<Option<FileContext>> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?;
    if !metadata.is_file() {
        return Ok(None);
    }

    let modified: DateTime<Utc> = metadata
        .modified()
        .with_context(|| format!("no modification time for {}", path.display()))?
        .into();
    let size = metadata.len();
    let mut ctx = FileContext::new(path.to_path_buf(), size, modified);

    let max = handler.config().file_processing.max_file_size;
    if size > max {
        debug!(
            "File exceeds size cap ({size} > {max} bytes), marking skipped: {}",
            path.display()
        );
        ctx.processing_status = ProcessingStatus::Skipped;
        ctx.error_message = Some(format!("file too large: {size} bytes exceeds limit of {max}"));
    }

    Ok(Some(ctx))
}

/// Symlinks are followed only when their target stays inside the source root.
fn follows_into_root(path: &Path, canonical_root: &Path) -> bool {
    let is_symlink = fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_symlink {
        return true;
    }
    match path.canonicalize() {
        Ok(target) => target.starts_with(canonical_root),
        Err(_) => false,
    }
}
