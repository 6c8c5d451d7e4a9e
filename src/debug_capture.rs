//! LLM Debug Capture and Replay
//!
//! Persists every LLM interaction under a pipeline-stage-organized layout
//! with predictable filenames, and serves captured responses back in replay
//! mode. Predictability is the load-bearing property: identical inputs must
//! produce identical file locations across runs, so a captured response can
//! be hand-edited between runs and the edit picked up deterministically.
//!
//! # Layout
//!
//! ```text
//! {debug_output_directory}/llm_debug/
//!   PIPELINE_STAGES.md
//!   stage_1_file_analysis/
//!     {normalized_target}_prompt.txt
//!     {normalized_target}_response.txt
//!   stage_2_chunk_analysis/ ... stage_5_global_summary/
//! ```

use crate::cache::write_atomic;
use crate::stage::PipelineStage;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Capture/replay handler for one run
pub struct DebugHandler {
    capture_enabled: bool,
    replay_enabled: bool,
    debug_root: Option<PathBuf>,
    /// Responses already read this run, keyed by stage directory + filename
    memory: Mutex<HashMap<String, String>>,
}

impl DebugHandler {
    /// Create a handler. `debug_root` is required when capture or replay is
    /// on; the `llm_debug` layout and its documentation are created eagerly
    /// so stage directories exist before the first interaction.
    pub fn new(
        capture_enabled: bool,
        replay_enabled: bool,
        debug_output_directory: Option<&Path>,
    ) -> Result<Self> {
        let debug_root = if capture_enabled || replay_enabled {
            let base = debug_output_directory
                .context("debug_output_directory is required when debug or replay is enabled")?;
            let root = base.join("llm_debug");
            for stage in PipelineStage::all() {
                fs::create_dir_all(root.join(stage.debug_dir())).with_context(|| {
                    format!("failed to create debug stage directory under {}", root.display())
                })?;
            }
            write_stage_documentation(&root)?;
            Some(root)
        } else {
            None
        };

        Ok(Self {
            capture_enabled,
            replay_enabled,
            debug_root,
            memory: Mutex::new(HashMap::new()),
        })
    }

    /// Handler with everything off; all operations are no-ops.
    pub fn disabled() -> Self {
        Self {
            capture_enabled: false,
            replay_enabled: false,
            debug_root: None,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn replay_enabled(&self) -> bool {
        self.replay_enabled
    }

    /// Persist one prompt/response pair under the stage layout.
    ///
    /// Capture failures are logged, never fatal: losing a debug artifact must
    /// not fail the indexing run.
    pub fn capture(
        &self,
        stage: PipelineStage,
        target: &Path,
        chunk_info: Option<&str>,
        prompt: &str,
        response: &str,
    ) {
        if !self.capture_enabled {
            return;
        }
        let Some(root) = &self.debug_root else {
            return;
        };

        let name = file_stem(target, chunk_info);
        let stage_dir = root.join(stage.debug_dir());
        let prompt_path = stage_dir.join(format!("{name}_prompt.txt"));
        let response_path = stage_dir.join(format!("{name}_response.txt"));

        if let Err(e) = write_atomic(&prompt_path, prompt) {
            warn!("Failed to capture prompt {}: {e}", prompt_path.display());
        }
        if let Err(e) = write_atomic(&response_path, response) {
            warn!("Failed to capture response {}: {e}", response_path.display());
        }
        debug!("Captured {} interaction: {name}", stage.debug_dir());
    }

    /// Fetch the captured response for (stage, target), if replay is on and
    /// the file exists. The file is read once per run and then served from
    /// memory; hand edits between runs are picked up on the next run.
    pub fn replay_response(
        &self,
        stage: PipelineStage,
        target: &Path,
        chunk_info: Option<&str>,
    ) -> Option<String> {
        if !self.replay_enabled {
            return None;
        }
        let root = self.debug_root.as_ref()?;
        let name = file_stem(target, chunk_info);
        let cache_key = format!("{}/{name}", stage.debug_dir());

        if let Some(hit) = self.memory.lock().unwrap().get(&cache_key) {
            return Some(hit.clone());
        }

        let path = root.join(stage.debug_dir()).join(format!("{name}_response.txt"));
        match fs::read_to_string(&path) {
            Ok(response) => {
                debug!("Replaying {} from {}", stage.debug_dir(), path.display());
                self.memory
                    .lock()
                    .unwrap()
                    .insert(cache_key, response.clone());
                Some(response)
            }
            Err(_) => None,
        }
    }
}

/// Filename stem for a target path, optionally with chunk info.
fn file_stem(target: &Path, chunk_info: Option<&str>) -> String {
    let mut name = normalize_path_for_filename(target);
    if let Some(info) = chunk_info {
        name.push_str("_chunk_");
        name.push_str(&normalize_component(info));
    }
    name
}

/// Normalize a path into a predictable, filesystem-safe filename component:
/// lowercase, with separators, dots, dashes, and spaces collapsed to single
/// underscores.
pub fn normalize_path_for_filename(path: &Path) -> String {
    normalize_component(&path.to_string_lossy())
}

fn normalize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = true; // trims leading underscores
    for ch in raw.to_lowercase().chars() {
        let mapped = match ch {
            '/' | '\\' | '.' | '-' | ' ' => '_',
            other => other,
        };
        if mapped == '_' {
            if !last_was_underscore {
                out.push('_');
                last_was_underscore = true;
            }
        } else {
            out.push(mapped);
            last_was_underscore = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        "unknown_path".to_string()
    } else {
        out
    }
}

fn write_stage_documentation(root: &Path) -> Result<()> {
    let mut doc = String::from(
        "# LLM Debug Pipeline Stages\n\n\
         Captured LLM interactions, organized by pipeline stage. Filenames are\n\
         predictable: the target path lowercased with separators, dots, dashes,\n\
         and spaces replaced by underscores. Each interaction produces a\n\
         `*_prompt.txt` / `*_response.txt` pair; chunked stages append\n\
         `_chunk_<n>` to the stem.\n\n## Layout\n\n```\n",
    );
    for stage in PipelineStage::all() {
        doc.push_str(stage.debug_dir());
        doc.push_str("/\n");
    }
    doc.push_str(
        "```\n\n## Workflow\n\n\
         1. Capture mode saves every interaction to its predictable location.\n\
         2. Replay mode reads existing `*_response.txt` files instead of calling the LLM.\n\
         3. Response files may be hand-edited between runs; replay picks up the edit.\n",
    );
    write_atomic(&root.join("PIPELINE_STAGES.md"), &doc)
        .with_context(|| format!("failed to write stage documentation in {}", root.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_matches_expected_shape() {
        assert_eq!(
            normalize_path_for_filename(Path::new("/p/src/main.py")),
            "p_src_main_py"
        );
        assert_eq!(
            normalize_path_for_filename(Path::new("My Docs/some-file.V2.txt")),
            "my_docs_some_file_v2_txt"
        );
        assert_eq!(normalize_path_for_filename(Path::new("///")), "unknown_path");
    }

    #[test]
    fn test_normalize_collapses_consecutive_underscores() {
        assert_eq!(
            normalize_path_for_filename(Path::new("a--b..c  d")),
            "a_b_c_d"
        );
    }

    #[test]
    fn test_capture_writes_predictable_files() {
        let tmp = TempDir::new().unwrap();
        let handler = DebugHandler::new(true, false, Some(tmp.path())).unwrap();

        handler.capture(
            PipelineStage::FileAnalysis,
            Path::new("/p/src/main.py"),
            None,
            "the prompt",
            "the response",
        );

        let stage_dir = tmp.path().join("llm_debug/stage_1_file_analysis");
        assert_eq!(
            fs::read_to_string(stage_dir.join("p_src_main_py_prompt.txt")).unwrap(),
            "the prompt"
        );
        assert_eq!(
            fs::read_to_string(stage_dir.join("p_src_main_py_response.txt")).unwrap(),
            "the response"
        );
    }

    #[test]
    fn test_replay_round_trip() {
        let tmp = TempDir::new().unwrap();
        let capture = DebugHandler::new(true, false, Some(tmp.path())).unwrap();
        capture.capture(
            PipelineStage::DirectoryAnalysis,
            Path::new("/p/src"),
            None,
            "p",
            "directory summary",
        );

        let replay = DebugHandler::new(false, true, Some(tmp.path())).unwrap();
        assert_eq!(
            replay
                .replay_response(PipelineStage::DirectoryAnalysis, Path::new("/p/src"), None)
                .as_deref(),
            Some("directory summary")
        );
        assert!(replay
            .replay_response(PipelineStage::DirectoryAnalysis, Path::new("/p/other"), None)
            .is_none());
    }

    #[test]
    fn test_replay_picks_up_hand_edits_between_runs() {
        let tmp = TempDir::new().unwrap();
        let capture = DebugHandler::new(true, false, Some(tmp.path())).unwrap();
        capture.capture(
            PipelineStage::FileAnalysis,
            Path::new("/p/src/main.py"),
            None,
            "p",
            "original",
        );

        let response_file = tmp
            .path()
            .join("llm_debug/stage_1_file_analysis/p_src_main_py_response.txt");
        fs::write(&response_file, "hand edited").unwrap();

        let replay = DebugHandler::new(false, true, Some(tmp.path())).unwrap();
        assert_eq!(
            replay
                .replay_response(PipelineStage::FileAnalysis, Path::new("/p/src/main.py"), None)
                .as_deref(),
            Some("hand edited")
        );
    }

    #[test]
    fn test_chunk_info_distinguishes_files() {
        let tmp = TempDir::new().unwrap();
        let handler = DebugHandler::new(true, true, Some(tmp.path())).unwrap();
        handler.capture(
            PipelineStage::ChunkAnalysis,
            Path::new("/p/src"),
            Some("0"),
            "p",
            "chunk zero",
        );
        handler.capture(
            PipelineStage::ChunkAnalysis,
            Path::new("/p/src"),
            Some("1"),
            "p",
            "chunk one",
        );

        assert_eq!(
            handler
                .replay_response(PipelineStage::ChunkAnalysis, Path::new("/p/src"), Some("1"))
                .as_deref(),
            Some("chunk one")
        );
    }

    #[test]
    fn test_stage_documentation_written() {
        let tmp = TempDir::new().unwrap();
        DebugHandler::new(true, false, Some(tmp.path())).unwrap();
        let doc = fs::read_to_string(tmp.path().join("llm_debug/PIPELINE_STAGES.md")).unwrap();
        assert!(doc.contains("stage_5_global_summary/"));
    }

    #[test]
    fn test_disabled_handler_is_a_no_op() {
        let handler = DebugHandler::disabled();
        handler.capture(
            PipelineStage::FileAnalysis,
            Path::new("/p/a.rs"),
            None,
            "p",
            "r",
        );
        assert!(handler
            .replay_response(PipelineStage::FileAnalysis, Path::new("/p/a.rs"), None)
            .is_none());
    }

    #[test]
    fn test_missing_debug_dir_is_an_error_when_enabled() {
        assert!(DebugHandler::new(true, false, None).is_err());
        assert!(DebugHandler::new(false, true, None).is_err());
        assert!(DebugHandler::new(false, false, None).is_ok());
    }
}
