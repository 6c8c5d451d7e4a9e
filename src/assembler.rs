//! Knowledge File Assembler
//!
//! Generates one complete markdown knowledge document per directory and
//! writes it atomically. The whole file is regenerated from its parts every
//! time; LLM content is inserted verbatim with no parsing or reformatting,
//! which keeps the assembler deterministic and the output diff-friendly.

use crate::cache::write_atomic;
use crate::context::FileContext;
use crate::paths::{portable_dir_path, portable_path};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Fixed warning header marking files as autogenerated
const WARNING_HEADER: &str = "\
<!-- ⚠️ DO NOT EDIT MANUALLY! DOCUMENT AUTOMATICALLY GENERATED! ⚠️ -->\n\
<!-- This file is generated by the knowledge base indexer. -->\n\
<!-- Manual edits will be overwritten on the next generation cycle. -->\n\
<!-- To change content, update the source files and re-run the indexer. -->";

/// Builds and writes per-directory knowledge documents
pub struct KnowledgeFileAssembler {
    project_root: PathBuf,
}

impl KnowledgeFileAssembler {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }

    /// Generate the complete document and rename it over `kb_path`.
    pub fn write(
        &self,
        directory_path: &Path,
        global_summary: &str,
        files: &[&FileContext],
        subdirectory_summaries: &[(PathBuf, String)],
        kb_path: &Path,
    ) -> Result<()> {
        let content = self.generate_at(
            directory_path,
            global_summary,
            files,
            subdirectory_summaries,
            kb_path,
            Utc::now(),
        );
        write_atomic(kb_path, &content)
            .with_context(|| format!("failed to write knowledge file {}", kb_path.display()))?;
        debug!("Wrote knowledge file {}", kb_path.display());
        Ok(())
    }

    /// Generate the document with an explicit timestamp.
    pub fn generate_at(
        &self,
        directory_path: &Path,
        global_summary: &str,
        files: &[&FileContext],
        subdirectory_summaries: &[(PathBuf, String)],
        kb_path: &Path,
        now: DateTime<Utc>,
    ) -> String {
        let timestamp = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        // Case-insensitive alphabetical ordering keeps output stable across
        // filesystems with differing directory orders.
        let mut sorted_files: Vec<&FileContext> = files.to_vec();
        sorted_files.sort_by_key(|f| f.file_name().to_lowercase());
        let mut sorted_subdirs: Vec<&(PathBuf, String)> = subdirectory_summaries.iter().collect();
        sorted_subdirs.sort_by_key(|(path, _)| {
            path.file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default()
        });

        let mut parts: Vec<String> = Vec::new();
        parts.push(WARNING_HEADER.to_string());

        let title_path = portable_dir_path(directory_path, &self.project_root);
        parts.push(format!("# Directory Knowledge Base {title_path}"));

        parts.push("\n## Global Summary".to_string());
        if global_summary.trim().is_empty() {
            parts.push("\n*Global summary not available*".to_string());
        } else {
            parts.push(format!("\n{}", global_summary.trim()));
        }

        parts.push("\n## Subdirectory Knowledge Integration".to_string());
        if sorted_subdirs.is_empty() {
            parts.push("\n*No subdirectories processed*".to_string());
        } else {
            for (subdir_path, summary) in sorted_subdirs {
                parts.push(self.subdirectory_section(subdir_path, summary, &timestamp));
            }
        }

        parts.push("\n## File Knowledge Integration".to_string());
        if sorted_files.is_empty() {
            parts.push("\n*No files processed*".to_string());
        } else {
            for file in sorted_files {
                parts.push(self.file_section(file, &timestamp));
            }
        }

        parts.push(self.metadata_footer(
            directory_path,
            files.len(),
            subdirectory_summaries.len(),
            kb_path,
            &timestamp,
        ));

        parts.join("\n")
    }

    fn subdirectory_section(&self, subdir_path: &Path, summary: &str, timestamp: &str) -> String {
        let heading = portable_dir_path(subdir_path, &self.project_root);
        let body = if summary.trim().is_empty() {
            "*No content available*".to_string()
        } else {
            summary.trim().to_string()
        };
        format!("\n### {heading}\n\n*Last Updated: {timestamp}*\n\n{body}")
    }

    fn file_section(&self, file: &FileContext, timestamp: &str) -> String {
        let heading = portable_path(&file.file_path, &self.project_root);
        let body = match &file.knowledge_content {
            Some(content) if !content.trim().is_empty() => content.trim().to_string(),
            _ => "*No analysis available*".to_string(),
        };
        format!("\n### {heading}\n\n*Last Updated: {timestamp}*\n\n{body}")
    }

    fn metadata_footer(
        &self,
        directory_path: &Path,
        file_count: usize,
        subdirectory_count: usize,
        kb_path: &Path,
        timestamp: &str,
    ) -> String {
        let source = portable_path(directory_path, &self.project_root);
        let kb_name = kb_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "\n---\n*Generated: {timestamp}*\n*Source Directory: {source}*\n\
             *Total Files: {file_count}*\n*Total Subdirectories: {subdirectory_count}*\n\n\
             # End of {kb_name}"
        )
    }
}

/// Strip the generated-timestamp lines, leaving the body that must be stable
/// across runs with unchanged inputs.
pub fn body_without_timestamps(kb_content: &str) -> String {
    kb_content
        .lines()
        .filter(|line| {
            !line.starts_with("*Last Updated: ") && !line.starts_with("*Generated: ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
