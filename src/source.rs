//! Indexable Sources
//!
//! Top-level units of indexing work. A source pairs a filesystem root with
//! the handler responsible for it, plus discovery-time health metadata used
//! for reporting and remediation decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Kind of source tree being indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    ProjectBase,
    GitClone,
    Pdf,
    WipTask,
    GenericDir,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProjectBase => "project-base",
            Self::GitClone => "git-clone",
            Self::Pdf => "pdf",
            Self::WipTask => "wip-task",
            Self::GenericDir => "generic-dir",
        };
        f.write_str(s)
    }
}

/// Discovery-time health and sizing metadata for a source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// False when the source path is missing or unreadable
    pub is_healthy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_discovered: Option<DateTime<Utc>>,

    /// Source paths with no corresponding KB or cache output
    pub missing_files: BTreeSet<PathBuf>,

    /// KB or cache outputs whose source path no longer exists
    pub orphaned_files: BTreeSet<PathBuf>,

    /// Source paths whose outputs are older than the source
    pub stale_files: BTreeSet<PathBuf>,

    pub estimated_file_count: usize,
    pub estimated_size_mb: f64,
    pub requires_llm_processing: bool,

    /// Handler-specific extras, opaque to the core
    #[serde(default)]
    pub handler_metadata: serde_json::Map<String, serde_json::Value>,
}

impl SourceMetadata {
    /// Whether any corrective work is pending for this source
    pub fn needs_remediation(&self) -> bool {
        !self.missing_files.is_empty()
            || !self.orphaned_files.is_empty()
            || !self.stale_files.is_empty()
    }
}

/// One top-level unit of indexing work. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexableSource {
    /// Unique, stable identifier
    pub source_id: String,

    pub source_type: SourceType,

    /// Root of the tree to index
    pub source_path: PathBuf,

    /// Handler type string routing this source (`project-base`, ...)
    pub handler_type: String,

    pub tags: BTreeSet<String>,

    /// Ordering weight among sources; lower runs first
    pub priority: i32,

    pub enabled: bool,

    pub metadata: SourceMetadata,
}

impl IndexableSource {
    /// Create a source with its id derived from type and path.
    pub fn new(source_type: SourceType, source_path: PathBuf, handler_type: &str) -> Self {
        let source_id = format!(
            "{}:{}",
            source_type,
            source_path.to_string_lossy().trim_end_matches('/')
        );
        Self {
            source_id,
            source_type,
            source_path,
            handler_type: handler_type.to_string(),
            tags: BTreeSet::new(),
            priority: 0,
            enabled: true,
            metadata: SourceMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}
