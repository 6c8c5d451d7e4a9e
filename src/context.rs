//! Processing Contexts
//!
//! In-memory state for one indexing run: per-file and per-directory contexts
//! built by discovery and filled in by the executor, aggregate statistics,
//! and the final `IndexingStatus` returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cap on error messages retained in [`ProcessingStats`]
const MAX_RECORDED_ERRORS: usize = 20;

// ============================================================================
// Processing Status
// ============================================================================

/// Lifecycle state of a file, directory, or the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ============================================================================
// File Context
// ============================================================================

/// One source file in scope for the current run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContext {
    /// Absolute path of the source file
    pub file_path: PathBuf,

    /// Size in bytes at discovery time
    pub file_size: u64,

    /// Modification time at discovery time
    pub last_modified: DateTime<Utc>,

    pub processing_status: ProcessingStatus,

    /// LLM analysis text, populated when processing completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_content: Option<String>,

    /// Failure detail when processing_status is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_completed: Option<DateTime<Utc>>,
}

impl FileContext {
    pub fn new(file_path: PathBuf, file_size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            file_path,
            file_size,
            last_modified,
            processing_status: ProcessingStatus::Pending,
            knowledge_content: None,
            error_message: None,
            processing_started: None,
            processing_completed: None,
        }
    }

    /// Completed means status and content agree; one without the other is a
    /// bookkeeping bug upstream.
    pub fn is_completed(&self) -> bool {
        self.processing_status == ProcessingStatus::Completed && self.knowledge_content.is_some()
    }

    /// File name rendered for listings and sort keys
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

// ============================================================================
// Directory Context
// ============================================================================

/// One directory in scope, holding its in-scope files and subdirectories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryContext {
    /// Absolute path of the directory
    pub directory_path: PathBuf,

    pub files: Vec<FileContext>,

    pub subdirectories: Vec<DirectoryContext>,

    pub processing_status: ProcessingStatus,

    /// Where this directory's KB file is (or would be) written
    pub knowledge_file_path: PathBuf,

    /// Synthesized summary for this directory, populated by the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_completed: Option<DateTime<Utc>>,
}

impl DirectoryContext {
    pub fn new(directory_path: PathBuf, knowledge_file_path: PathBuf) -> Self {
        Self {
            directory_path,
            files: Vec::new(),
            subdirectories: Vec::new(),
            processing_status: ProcessingStatus::Pending,
            knowledge_file_path,
            directory_summary: None,
            processing_started: None,
            processing_completed: None,
        }
    }

    /// Total files in this directory and every descendant
    pub fn total_files(&self) -> usize {
        self.files.len()
            + self
                .subdirectories
                .iter()
                .map(|d| d.total_files())
                .sum::<usize>()
    }

    /// Total directories including this one
    pub fn total_directories(&self) -> usize {
        1 + self
            .subdirectories
            .iter()
            .map(|d| d.total_directories())
            .sum::<usize>()
    }

    /// Sum of in-scope file sizes across the subtree
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.file_size).sum::<u64>()
            + self
                .subdirectories
                .iter()
                .map(|d| d.total_bytes())
                .sum::<u64>()
    }

    /// Files still eligible for analysis (discovery marks oversized files
    /// `Skipped` but keeps them in the context for reporting)
    pub fn processable_files(&self) -> impl Iterator<Item = &FileContext> {
        self.files
            .iter()
            .filter(|f| f.processing_status != ProcessingStatus::Skipped)
    }

    /// A directory with no processable files and no in-scope subdirectories
    /// is terminal: it gets no KB file and never re-enters the plan. A
    /// subdirectory counts as in scope only if it is itself non-empty.
    pub fn is_empty(&self) -> bool {
        self.processable_files().next().is_none()
            && self.subdirectories.iter().all(|d| d.is_empty())
    }

    /// Subdirectories that are in scope for synthesis and KB references
    pub fn in_scope_subdirectories(&self) -> impl Iterator<Item = &DirectoryContext> {
        self.subdirectories.iter().filter(|d| !d.is_empty())
    }

    /// Depth-first, children-before-parent traversal
    pub fn visit_bottom_up<'a>(&'a self, visit: &mut impl FnMut(&'a DirectoryContext)) {
        for sub in &self.subdirectories {
            sub.visit_bottom_up(visit);
        }
        visit(self);
    }

    /// Find a directory context by path anywhere in the subtree
    pub fn find_directory(&self, path: &std::path::Path) -> Option<&DirectoryContext> {
        if self.directory_path == path {
            return Some(self);
        }
        self.subdirectories
            .iter()
            .find_map(|d| d.find_directory(path))
    }
}

// ============================================================================
// Run Statistics
// ============================================================================

/// Aggregate counters for one indexing run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub files_discovered: usize,
    pub files_processed: usize,
    pub files_completed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub directories_processed: usize,
    pub llm_requests: usize,
    pub total_bytes: u64,
    pub orphans_deleted: usize,

    /// First [`MAX_RECORDED_ERRORS`] error messages; the count keeps going
    pub errors: Vec<String>,
    pub error_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingStats {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(message.into());
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

// ============================================================================
// Indexing Status
// ============================================================================

/// Final result of one indexing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingStatus {
    /// Unique identifier for this run
    pub run_id: uuid::Uuid,

    pub overall_status: ProcessingStatus,

    /// Root directory context with per-node statuses and outputs
    pub root_context: DirectoryContext,

    pub stats: ProcessingStats,
}

impl IndexingStatus {
    /// Whether every non-isolated operation succeeded
    pub fn is_success(&self) -> bool {
        self.overall_status == ProcessingStatus::Completed
    }
}
