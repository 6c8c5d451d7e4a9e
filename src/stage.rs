//! Pipeline Stages
//!
//! The five LLM invocation kinds of the indexing pipeline. Each stage has a
//! fixed cache-file suffix and a fixed debug directory, both load-bearing:
//! the cache layer keys entries on (path, stage) and the debug handler's
//! replay lookup reconstructs filenames from the stage directory name.

use serde::{Deserialize, Serialize};

/// One LLM invocation kind within the indexing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    /// Per-file analysis of a single source file
    FileAnalysis,

    /// Analysis of one chunk of an oversized directory synthesis input
    ChunkAnalysis,

    /// Aggregation across chunk analyses of one directory
    ChunkAggregate,

    /// Synthesis of a directory from its file analyses and child summaries
    DirectoryAnalysis,

    /// Project-root global summary over the whole tree
    GlobalSummary,
}

impl PipelineStage {
    /// Cache filename suffix for this stage (`<relative-path>.<suffix>.md`)
    pub fn cache_suffix(&self) -> &'static str {
        match self {
            Self::FileAnalysis => "file-analysis",
            Self::ChunkAnalysis => "chunk-analysis",
            Self::ChunkAggregate => "chunk-aggregate",
            Self::DirectoryAnalysis => "directory-analysis",
            Self::GlobalSummary => "global-summary",
        }
    }

    /// Fixed debug subdirectory for captured prompts and responses
    pub fn debug_dir(&self) -> &'static str {
        match self {
            Self::FileAnalysis => "stage_1_file_analysis",
            Self::ChunkAnalysis => "stage_2_chunk_analysis",
            Self::ChunkAggregate => "stage_3_chunk_aggregation",
            Self::DirectoryAnalysis => "stage_4_directory_analysis",
            Self::GlobalSummary => "stage_5_global_summary",
        }
    }

    /// All stages in pipeline order
    pub fn all() -> [PipelineStage; 5] {
        [
            Self::FileAnalysis,
            Self::ChunkAnalysis,
            Self::ChunkAggregate,
            Self::DirectoryAnalysis,
            Self::GlobalSummary,
        ]
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cache_suffix())
    }
}
