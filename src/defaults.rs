//! Default Configurations
//!
//! Hardcoded configuration templates for each registered handler type. These
//! are the source for autogenerated `{handler_type}.indexing-config.json`
//! files and the fallback when no config file exists yet.

use crate::config::{
    ChangeDetectionConfig, CleanupConfig, ContentFilteringConfig, DebugConfig, ErrorHandlingConfig,
    FileProcessingConfig, IndexingConfig, IndexingMode, LlmConfig, OutputConfig,
};
use crate::error::ConfigError;
use std::collections::BTreeSet;

/// Model used for all summarization stages unless overridden per handler
pub const DEFAULT_MODEL_ID: &str = "claude-sonnet-4-20250514";

/// Handler type strings with registered default templates
pub const KNOWN_HANDLER_TYPES: [&str; 3] = ["project-base", "git-clones", "pdf-knowledge"];

/// Extensions excluded from analysis by every handler
pub fn base_excluded_extensions() -> BTreeSet<String> {
    [
        ".pyc", ".pyo", ".class", ".o", ".so", ".dll", ".exe", ".ds_store", ".env", ".log",
        ".tmp", ".cache", ".swp", ".swo", ".bak", ".orig", ".rej", ".lock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Directory names excluded from traversal by every handler
pub fn base_excluded_directories() -> BTreeSet<String> {
    [
        ".git",
        "__pycache__",
        ".pytest_cache",
        ".mypy_cache",
        "node_modules",
        ".venv",
        "venv",
        ".tox",
        "dist",
        "build",
        ".cache",
        "coverage",
        ".nyc_output",
        "target",
        "bin",
        "obj",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Directory names additionally excluded by the project-base handler
pub fn project_base_exclusions() -> BTreeSet<String> {
    [".knowledge", ".coding_assistant", ".clinerules"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Default template for the given handler type.
///
/// Git clones are read-only mirrors of third-party code, so their template is
/// more conservative: smaller file cap, fewer concurrent operations, and
/// `full_kb_rebuild` mode with a looser timestamp tolerance to absorb
/// checkout-time mtimes.
pub fn default_config_for(handler_type: &str) -> Result<IndexingConfig, ConfigError> {
    match handler_type {
        "project-base" => Ok(IndexingConfig {
            handler_type: "project-base".to_string(),
            description: "Whole project codebase indexing with system directory exclusions"
                .to_string(),
            file_processing: FileProcessingConfig {
                max_file_size: 2 * 1024 * 1024,
                batch_size: 7,
                max_concurrent_operations: 3,
            },
            content_filtering: ContentFilteringConfig {
                excluded_extensions: base_excluded_extensions(),
                excluded_directories: base_excluded_directories(),
                project_base_exclusions: Some(project_base_exclusions()),
            },
            llm_config: LlmConfig {
                model_id: DEFAULT_MODEL_ID.to_string(),
                temperature: 0.3,
                max_tokens: 20_000,
            },
            change_detection: ChangeDetectionConfig {
                indexing_mode: IndexingMode::Incremental,
                timestamp_tolerance_seconds: 2,
            },
            error_handling: ErrorHandlingConfig {
                max_retries: 3,
                retry_delay_seconds: 1.0,
                continue_on_file_errors: true,
            },
            output_config: OutputConfig::default(),
            debug_config: DebugConfig::default(),
            cleanup_config: CleanupConfig::default(),
        }),
        "git-clones" => Ok(IndexingConfig {
            handler_type: "git-clones".to_string(),
            description: "Read-only git clone processing with mirrored knowledge structure"
                .to_string(),
            file_processing: FileProcessingConfig {
                max_file_size: 1024 * 1024,
                batch_size: 5,
                max_concurrent_operations: 2,
            },
            content_filtering: ContentFilteringConfig {
                excluded_extensions: base_excluded_extensions(),
                excluded_directories: base_excluded_directories(),
                project_base_exclusions: None,
            },
            llm_config: LlmConfig {
                model_id: DEFAULT_MODEL_ID.to_string(),
                temperature: 0.4,
                max_tokens: 15_000,
            },
            change_detection: ChangeDetectionConfig {
                indexing_mode: IndexingMode::FullKbRebuild,
                timestamp_tolerance_seconds: 5,
            },
            error_handling: ErrorHandlingConfig {
                max_retries: 2,
                retry_delay_seconds: 0.5,
                continue_on_file_errors: true,
            },
            output_config: OutputConfig::default(),
            debug_config: DebugConfig::default(),
            cleanup_config: CleanupConfig::default(),
        }),
        "pdf-knowledge" => Ok(IndexingConfig {
            handler_type: "pdf-knowledge".to_string(),
            description: "PDF document collections converted to directory knowledge".to_string(),
            file_processing: FileProcessingConfig {
                max_file_size: 10 * 1024 * 1024,
                batch_size: 3,
                max_concurrent_operations: 2,
            },
            content_filtering: ContentFilteringConfig {
                excluded_extensions: base_excluded_extensions(),
                excluded_directories: base_excluded_directories(),
                project_base_exclusions: None,
            },
            llm_config: LlmConfig {
                model_id: DEFAULT_MODEL_ID.to_string(),
                temperature: 0.2,
                max_tokens: 25_000,
            },
            change_detection: ChangeDetectionConfig {
                indexing_mode: IndexingMode::Incremental,
                timestamp_tolerance_seconds: 10,
            },
            error_handling: ErrorHandlingConfig {
                max_retries: 5,
                retry_delay_seconds: 2.0,
                continue_on_file_errors: true,
            },
            output_config: OutputConfig::default(),
            debug_config: DebugConfig::default(),
            cleanup_config: CleanupConfig::default(),
        }),
        other => Err(ConfigError::UnknownHandlerType(other.to_string())),
    }
}
