//! # kbindexer - Hierarchical Knowledge-Base Indexer
//!
//! A plan-then-execute indexing pipeline that turns a source tree (a project
//! root, a mirrored git clone, or a PDF collection) into per-directory
//! markdown knowledge files using LLM summarization. Summaries are assembled
//! bottom-up: per-file analyses feed per-directory syntheses, which feed the
//! project-root summary. Reruns are incremental and touch only stale outputs.
//!
//! ## Architecture
//!
//! - **Handlers** route each source to exactly one owner and confine writes
//!   to that owner's namespace
//! - **Discovery** walks the tree through handler exclusions
//! - **Decision engine** marks every node REBUILD / SKIP / DELETE using
//!   three-trigger staleness
//! - **Planner** emits a dependency-ordered task DAG
//! - **Executor** runs the DAG with bounded concurrency, retries, and
//!   optional dry-run
//! - **Cache** stores LLM outputs on disk, content-addressed by
//!   (path, stage), with single-flight builds
//! - **Debug handler** captures and deterministically replays LLM calls
//!
//! ## Example
//!
//! ```rust,no_run
//! use kbindexer::defaults;
//! use kbindexer::handlers::{Handler, ProjectBaseHandler};
//! use kbindexer::indexer::HierarchicalIndexer;
//! use kbindexer::llm::AnthropicProvider;
//! use kbindexer::source::{IndexableSource, SourceType};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let project_root = PathBuf::from("/path/to/project");
//! let config = defaults::default_config_for("project-base")?;
//! let handler: Arc<dyn Handler> =
//!     Arc::new(ProjectBaseHandler::new(project_root.join(".knowledge"), config));
//! let provider = Arc::new(AnthropicProvider::from_env()?);
//!
//! let source = IndexableSource::new(SourceType::ProjectBase, project_root, "project-base");
//! let status = HierarchicalIndexer::new(handler, provider).index(&source).await?;
//! println!("{} LLM requests", status.stats.llm_requests);
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod cache;
pub mod config;
pub mod config_manager;
pub mod context;
pub mod debug_capture;
pub mod decision;
pub mod defaults;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod indexer;
pub mod llm;
pub mod paths;
pub mod plan;
pub mod source;
pub mod stage;

pub use assembler::KnowledgeFileAssembler;
pub use cache::{AnalysisCache, CacheKey, CachedEntry};
pub use config::{
    ChangeDetectionConfig, CleanupConfig, CleanupType, ContentFilteringConfig, DebugConfig,
    ErrorHandlingConfig, FileProcessingConfig, IndexingConfig, IndexingMode, LlmConfig,
    OutputConfig,
};
pub use config_manager::ConfigManager;
pub use context::{
    DirectoryContext, FileContext, IndexingStatus, ProcessingStats, ProcessingStatus,
};
pub use debug_capture::DebugHandler;
pub use decision::{
    Decision, DecisionKind, DecisionOutcome, DecisionReason, DecisionReport,
    RebuildDecisionEngine,
};
pub use error::{CacheError, ConfigError, DecisionError, LlmError};
pub use executor::Executor;
pub use handlers::{
    GitCloneHandler, Handler, HandlerRegistry, PdfKnowledgeHandler, ProjectBaseHandler,
};
pub use indexer::HierarchicalIndexer;
pub use llm::{AnthropicProvider, LlmClient, LlmProvider, LlmRequest, LlmResponse};
pub use plan::{Plan, Planner, Task, TaskId, TaskKind};
pub use source::{IndexableSource, SourceMetadata, SourceType};
pub use stage::PipelineStage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{IndexingConfig, IndexingMode};
    pub use crate::config_manager::ConfigManager;
    pub use crate::context::{DirectoryContext, FileContext, IndexingStatus, ProcessingStatus};
    pub use crate::decision::{DecisionOutcome, DecisionReason, DecisionReport};
    pub use crate::handlers::{
        GitCloneHandler, Handler, HandlerRegistry, PdfKnowledgeHandler, ProjectBaseHandler,
    };
    pub use crate::indexer::HierarchicalIndexer;
    pub use crate::llm::{AnthropicProvider, LlmProvider};
    pub use crate::plan::{Plan, TaskKind};
    pub use crate::source::{IndexableSource, SourceType};
    pub use crate::stage::PipelineStage;
}
