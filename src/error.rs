//! Error Types
//!
//! Typed errors for the failure kinds that callers dispatch on. Everything
//! else flows through `anyhow::Result` with context attached at the call site.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration validation errors
///
/// Raised at construction time, before any indexing work begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be {requirement}, got {value}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
        value: String,
    },

    #[error("unrecognized indexing mode: {0:?} (expected full, full_kb_rebuild, or incremental)")]
    UnknownMode(String),

    #[error("project-base configuration requires project_base_exclusions")]
    MissingProjectBaseExclusions,

    #[error("unknown handler type: {0:?}")]
    UnknownHandlerType(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// LLM call failures surfaced by the adapter
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network or service failure after exhausting retries
    #[error("LLM request failed after {attempts} attempt(s): {message}")]
    Transport { message: String, attempts: usize },

    /// The provider answered but the content is unusable; retried like a
    /// transport error
    #[error("LLM returned empty or malformed content after {attempts} attempt(s)")]
    EmptyResponse { attempts: usize },
}

/// Analysis cache failures
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry {path} is unreadable: {source}")]
    Integrity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write cache entry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Bugs in the decision engine; always fatal
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("conflicting decisions for {path}: {first} and {second}")]
    Conflict {
        path: PathBuf,
        first: String,
        second: String,
    },
}
