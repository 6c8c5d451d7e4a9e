//! Indexing Configuration
//!
//! Typed, validated per-handler settings controlling file processing, content
//! filtering, LLM behavior, change detection, error handling, output
//! locations, debug features, and cleanup modes.
//!
//! # Features
//!
//! - **Hierarchical groups**: each concern lives in its own focused struct
//! - **Fail-fast validation**: out-of-range values are rejected at load time
//! - **JSON persistence**: round-trips through the per-handler config files
//!
//! # Example
//!
//! ```rust
//! use kbindexer::config::IndexingConfig;
//!
//! let config = IndexingConfig::default();
//! config.validate().expect("defaults are valid");
//! assert_eq!(config.change_detection.timestamp_tolerance_seconds, 2);
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ============================================================================
// Indexing Mode
// ============================================================================

/// Scope of a single indexing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingMode {
    /// Complete regeneration of everything from scratch, ignoring caches
    Full,

    /// Rebuild every KB file but reuse the per-file analysis cache
    FullKbRebuild,

    /// Update only changed files and their dependents
    Incremental,
}

impl IndexingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::FullKbRebuild => "full_kb_rebuild",
            Self::Incremental => "incremental",
        }
    }
}

impl std::str::FromStr for IndexingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "full_kb_rebuild" => Ok(Self::FullKbRebuild),
            "incremental" => Ok(Self::Incremental),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for IndexingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Configuration Groups
// ============================================================================

/// File size, batching, and concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProcessingConfig {
    /// Maximum size in bytes of a file eligible for analysis
    pub max_file_size: u64,

    /// Files per LLM batch
    pub batch_size: usize,

    /// Width of the executor's concurrency semaphore
    pub max_concurrent_operations: usize,
}

impl Default for FileProcessingConfig {
    fn default() -> Self {
        Self {
            max_file_size: 2 * 1024 * 1024,
            batch_size: 7,
            max_concurrent_operations: 3,
        }
    }
}

/// Exclusion rules deciding which paths enter the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFilteringConfig {
    /// File extensions never analyzed (lowercase, with leading dot)
    pub excluded_extensions: BTreeSet<String>,

    /// Directory names never descended into
    pub excluded_directories: BTreeSet<String>,

    /// Additional directory names excluded only by the project-base handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_base_exclusions: Option<BTreeSet<String>>,
}

impl Default for ContentFilteringConfig {
    fn default() -> Self {
        Self {
            excluded_extensions: crate::defaults::base_excluded_extensions(),
            excluded_directories: crate::defaults::base_excluded_directories(),
            project_base_exclusions: None,
        }
    }
}

impl ContentFilteringConfig {
    /// Whether `path`'s extension is on the exclusion list
    pub fn is_extension_excluded(&self, path: &Path) -> bool {
        match path.extension() {
            Some(ext) => {
                let dotted = format!(".{}", ext.to_string_lossy().to_lowercase());
                self.excluded_extensions.contains(&dotted)
            }
            None => false,
        }
    }

    /// Whether a directory with this name is excluded by the base rules
    pub fn is_directory_excluded(&self, name: &str) -> bool {
        self.excluded_directories.contains(name)
    }

    /// Whether a directory with this name is excluded by project-base rules
    pub fn is_project_base_excluded(&self, name: &str) -> bool {
        self.project_base_exclusions
            .as_ref()
            .is_some_and(|set| set.contains(name))
    }
}

/// LLM model parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider model identifier
    pub model_id: String,

    /// Sampling temperature, 0.0 to 1.0
    pub temperature: f64,

    /// Response length limit in tokens
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model_id: crate::defaults::DEFAULT_MODEL_ID.to_string(),
            temperature: 0.3,
            max_tokens: 20_000,
        }
    }
}

/// Change detection strategy and timestamp comparison behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeDetectionConfig {
    /// Indexing strategy for this run
    pub indexing_mode: IndexingMode,

    /// Tolerance applied to every filesystem mtime comparison
    pub timestamp_tolerance_seconds: u64,
}

impl Default for ChangeDetectionConfig {
    fn default() -> Self {
        Self {
            indexing_mode: IndexingMode::Incremental,
            timestamp_tolerance_seconds: 2,
        }
    }
}

/// Retry and error isolation behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Retries per task before it is marked permanently failed
    pub max_retries: usize,

    /// Initial backoff delay; doubles on each retry
    pub retry_delay_seconds: f64,

    /// When true, a permanently failed file analysis is isolated and the
    /// parent directory still synthesizes without it
    pub continue_on_file_errors: bool,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_seconds: 1.0,
            continue_on_file_errors: true,
        }
    }
}

/// Output location for generated knowledge files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Knowledge directory; `None` resolves to `{project_root}/.knowledge`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_output_directory: Option<PathBuf>,
}

/// Debug capture, replay, and dry-run switches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Persist every LLM prompt/response pair under the debug layout
    pub debug_mode: bool,

    /// Root for debug artifacts; required when capture or replay is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_output_directory: Option<PathBuf>,

    /// Serve LLM responses from captured debug files instead of calling out
    pub enable_llm_replay: bool,

    /// Plan and report only; no LLM calls, cache writes, KB writes, deletions
    pub dry_run: bool,
}

/// Kinds of on-disk artifacts a cleanup pass may remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupType {
    /// Generated knowledge files
    KbFiles,

    /// Cached LLM analyses
    AnalysisFiles,
}

/// Cleanup pre-pass configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Run the cleanup pre-pass before discovery
    pub cleanup_mode_enabled: bool,

    /// Artifact kinds to remove, strictly within the handler's namespace
    #[serde(default)]
    pub cleanup_types: Vec<CleanupType>,
}

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Complete validated configuration for one handler type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Handler this configuration belongs to (`project-base`, `git-clones`, ...)
    pub handler_type: String,

    /// Human-readable description written into autogenerated config files
    pub description: String,

    pub file_processing: FileProcessingConfig,
    pub content_filtering: ContentFilteringConfig,
    pub llm_config: LlmConfig,
    pub change_detection: ChangeDetectionConfig,
    pub error_handling: ErrorHandlingConfig,
    #[serde(default)]
    pub output_config: OutputConfig,
    #[serde(default)]
    pub debug_config: DebugConfig,
    #[serde(default)]
    pub cleanup_config: CleanupConfig,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        crate::defaults::default_config_for("project-base")
            .expect("project-base defaults are always registered")
    }
}

impl IndexingConfig {
    /// Validate every group, failing fast on the first violation.
    ///
    /// Project-base configurations must carry `project_base_exclusions`; all
    /// numeric limits must be positive and the temperature must lie in
    /// `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_processing.max_file_size == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_file_size",
                requirement: "positive",
                value: self.file_processing.max_file_size.to_string(),
            });
        }
        if self.file_processing.batch_size == 0 {
            return Err(ConfigError::OutOfRange {
                field: "batch_size",
                requirement: "positive",
                value: self.file_processing.batch_size.to_string(),
            });
        }
        if self.file_processing.max_concurrent_operations == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_concurrent_operations",
                requirement: "positive",
                value: self.file_processing.max_concurrent_operations.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.llm_config.temperature) {
            return Err(ConfigError::OutOfRange {
                field: "temperature",
                requirement: "between 0.0 and 1.0",
                value: self.llm_config.temperature.to_string(),
            });
        }
        if self.llm_config.max_tokens == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_tokens",
                requirement: "positive",
                value: self.llm_config.max_tokens.to_string(),
            });
        }
        if self.error_handling.retry_delay_seconds < 0.0
            || !self.error_handling.retry_delay_seconds.is_finite()
        {
            return Err(ConfigError::OutOfRange {
                field: "retry_delay_seconds",
                requirement: "non-negative",
                value: self.error_handling.retry_delay_seconds.to_string(),
            });
        }
        if self.handler_type == "project-base"
            && self.content_filtering.project_base_exclusions.is_none()
        {
            return Err(ConfigError::MissingProjectBaseExclusions);
        }
        Ok(())
    }

    /// Resolve the knowledge directory against a project root.
    pub fn knowledge_dir(&self, project_root: &Path) -> PathBuf {
        self.output_config
            .knowledge_output_directory
            .clone()
            .unwrap_or_else(|| project_root.join(".knowledge"))
    }

    /// Whether a file qualifies for processing by size and extension.
    ///
    /// Existence and regular-file checks happen during discovery; this is the
    /// pure filtering predicate shared by discovery and the decision engine.
    pub fn should_process_file(&self, path: &Path, size: u64) -> bool {
        !self.content_filtering.is_extension_excluded(path) && size <= self.file_processing.max_file_size
    }
}
