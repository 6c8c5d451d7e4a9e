//! Integration Tests for the Indexing Pipeline
//!
//! End-to-end runs over real temporary trees with a mock LLM provider:
//! - Fresh run shape and deterministic LLM call counts
//! - Incremental reruns (zero LLM calls, stable KB bodies)
//! - Single-file edits propagating bottom-up
//! - Empty directories, oversized files, empty files
//! - Orphan cleanup after source deletions
//! - Capture/replay determinism with hand-edited responses
//! - Per-file error isolation
//! - Cross-handler namespace isolation

use anyhow::Result;
use async_trait::async_trait;
use kbindexer::assembler::body_without_timestamps;
use kbindexer::config::{IndexingConfig, IndexingMode};
use kbindexer::debug_capture::normalize_path_for_filename;
use kbindexer::defaults;
use kbindexer::handlers::{GitCloneHandler, Handler, ProjectBaseHandler};
use kbindexer::indexer::HierarchicalIndexer;
use kbindexer::llm::{LlmProvider, LlmRequest, LlmResponse};
use kbindexer::source::{IndexableSource, SourceType};
use kbindexer::ProcessingStatus;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Setup
// ============================================================================

/// Deterministic mock provider with call counting and failure injection
struct MockProvider {
    calls: AtomicUsize,
    fail_on: Option<String>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    fn failing_on(pattern: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(pattern.to_string()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(pattern) = &self.fail_on {
            if request.prompt.contains(pattern) {
                anyhow::bail!("injected provider failure");
            }
        }
        // Deterministic content so replay and idempotence are observable.
        Ok(LlmResponse {
            content: format!("mock summary over {} prompt bytes", request.prompt.len()),
            total_tokens: Some(42),
        })
    }
}

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
    provider: Arc<MockProvider>,
    indexer: HierarchicalIndexer,
}

impl TestEnv {
    fn knowledge_path(&self, rel: &str) -> PathBuf {
        self.root.join(".knowledge/project-base").join(rel)
    }

    async fn run(&self) -> kbindexer::IndexingStatus {
        let source = IndexableSource::new(
            SourceType::ProjectBase,
            self.root.clone(),
            "project-base",
        );
        self.indexer.index(&source).await.expect("indexing run failed")
    }
}

/// Project-base environment over the given (path, content) files, with fast
/// retries and zero timestamp tolerance so tests settle quickly.
fn setup(files: &[(&str, &str)]) -> TestEnv {
    setup_with(files, MockProvider::new(), |_| {})
}

fn setup_with(
    files: &[(&str, &str)],
    provider: MockProvider,
    customize: impl FnOnce(&mut IndexingConfig),
) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    let mut config = defaults::default_config_for("project-base").unwrap();
    config.change_detection.timestamp_tolerance_seconds = 0;
    config.error_handling.retry_delay_seconds = 0.0;
    customize(&mut config);
    config.validate().unwrap();

    let handler: Arc<dyn Handler> =
        Arc::new(ProjectBaseHandler::new(root.join(".knowledge"), config));
    let provider = Arc::new(provider);
    let indexer = HierarchicalIndexer::new(handler, Arc::clone(&provider) as Arc<dyn LlmProvider>);

    TestEnv {
        _tmp: tmp,
        root,
        provider,
        indexer,
    }
}

/// Let filesystem mtimes advance past same-second granularity.
async fn let_mtime_advance() {
    tokio::time::sleep(Duration::from_millis(1100)).await;
}

// ============================================================================
// Fresh Run
// ============================================================================

#[tokio::test]
async fn test_fresh_run_tiny_project() {
    let env = setup(&[("README.md", "# X"), ("src/main.py", "print('hello')")]);
    let status = env.run().await;

    assert_eq!(status.overall_status, ProcessingStatus::Completed);
    // 2 file analyses + 2 directory analyses + 1 global summary.
    assert_eq!(env.provider.calls(), 5);
    assert_eq!(status.stats.llm_requests, 5);
    assert_eq!(status.stats.files_discovered, 2);
    assert_eq!(status.stats.files_completed, 2);
    assert_eq!(status.stats.directories_processed, 2);

    let root_kb = env.knowledge_path("root_kb.md");
    let src_kb = env.knowledge_path("src/src_kb.md");
    assert!(root_kb.exists());
    assert!(src_kb.exists());

    let root_content = fs::read_to_string(&root_kb).unwrap();
    assert!(root_content.contains("## Global Summary"));
    assert!(root_content.contains("### {PROJECT_ROOT}/src/"));
    assert!(root_content.contains("### {PROJECT_ROOT}/README.md"));
    assert!(root_content.contains("mock summary"));

    let src_content = fs::read_to_string(&src_kb).unwrap();
    assert!(src_content.contains("### {PROJECT_ROOT}/src/main.py"));
    assert!(src_content.ends_with("# End of src_kb.md"));
}

#[tokio::test]
async fn test_cache_entries_written_for_every_stage() {
    let env = setup(&[("README.md", "# X"), ("src/main.py", "print('hello')")]);
    env.run().await;

    for rel in [
        "cache/README.md.file-analysis.md",
        "cache/src/main.py.file-analysis.md",
        "cache/src.directory-analysis.md",
    ] {
        assert!(
            env.knowledge_path(rel).exists(),
            "expected cache entry {rel}"
        );
    }
}

// ============================================================================
// Idempotent Rerun
// ============================================================================

#[tokio::test]
async fn test_second_run_makes_zero_llm_calls() {
    let env = setup(&[("README.md", "# X"), ("src/main.py", "print('hello')")]);

    let first = env.run().await;
    assert_eq!(env.provider.calls(), 5);
    let root_body_1 =
        body_without_timestamps(&fs::read_to_string(env.knowledge_path("root_kb.md")).unwrap());
    let src_body_1 =
        body_without_timestamps(&fs::read_to_string(env.knowledge_path("src/src_kb.md")).unwrap());

    let second = env.run().await;
    assert_eq!(env.provider.calls(), 5, "rerun must make no LLM calls");
    assert_eq!(second.overall_status, ProcessingStatus::Completed);
    assert_eq!(second.stats.llm_requests, 0);

    let root_body_2 =
        body_without_timestamps(&fs::read_to_string(env.knowledge_path("root_kb.md")).unwrap());
    let src_body_2 =
        body_without_timestamps(&fs::read_to_string(env.knowledge_path("src/src_kb.md")).unwrap());
    assert_eq!(root_body_1, root_body_2);
    assert_eq!(src_body_1, src_body_2);
    assert_eq!(first.stats.files_discovered, second.stats.files_discovered);
}

// ============================================================================
// Single-File Edit
// ============================================================================

#[tokio::test]
async fn test_single_file_edit_propagates_bottom_up() {
    let env = setup(&[
        ("README.md", "# X"),
        ("src/main.py", "print('hello')"),
        ("docs/guide.md", "guide"),
    ]);
    env.run().await;
    let calls_before = env.provider.calls();

    let_mtime_advance().await;
    fs::write(env.root.join("src/main.py"), "print('edited, longer now')").unwrap();

    let status = env.run().await;
    assert_eq!(status.overall_status, ProcessingStatus::Completed);

    // One file re-analysis, src and root re-synthesis, plus the refreshed
    // global summary; the untouched docs subtree stays cached.
    assert_eq!(env.provider.calls() - calls_before, 4);

    let src_content = fs::read_to_string(env.knowledge_path("src/src_kb.md")).unwrap();
    assert!(src_content.contains("### {PROJECT_ROOT}/src/main.py"));
}

// ============================================================================
// Empty Directories
// ============================================================================

#[tokio::test]
async fn test_empty_directory_gets_no_kb_and_does_not_loop() {
    let env = setup(&[("README.md", "# X")]);
    fs::create_dir_all(env.root.join("images")).unwrap();

    env.run().await;
    let calls_after_first = env.provider.calls();
    assert!(!env.knowledge_path("images/images_kb.md").exists());

    let root_content = fs::read_to_string(env.knowledge_path("root_kb.md")).unwrap();
    assert!(!root_content.contains("images/"));
    assert!(root_content.contains("*No subdirectories processed*"));

    // A second run must not re-plan the empty directory into existence.
    let status = env.run().await;
    assert_eq!(env.provider.calls(), calls_after_first);
    assert_eq!(status.overall_status, ProcessingStatus::Completed);
    assert!(!env.knowledge_path("images/images_kb.md").exists());
}

// ============================================================================
// Boundary Behaviors
// ============================================================================

#[tokio::test]
async fn test_empty_file_bypasses_llm_but_is_cached() {
    let env = setup(&[("README.md", "# X"), ("src/__init__.py", "")]);
    env.run().await;

    // README + src dir + root dir + global; the empty file costs nothing.
    assert_eq!(env.provider.calls(), 4);

    let cached = fs::read_to_string(env.knowledge_path("cache/src/__init__.py.file-analysis.md"))
        .unwrap();
    assert!(cached.contains("Empty file"));
    assert!(cached.contains("0 bytes"));

    let src_content = fs::read_to_string(env.knowledge_path("src/src_kb.md")).unwrap();
    assert!(src_content.contains("Empty file"));

    // Still no LLM call for it on the next run.
    let calls = env.provider.calls();
    env.run().await;
    assert_eq!(env.provider.calls(), calls);
}

#[tokio::test]
async fn test_oversized_file_is_skipped_not_fatal() {
    let env = setup_with(
        &[
            ("README.md", "# X"),
            ("src/big.py", "0123456789012345678901234567890123456789"),
            ("src/small.py", "ok"),
        ],
        MockProvider::new(),
        |config| config.file_processing.max_file_size = 16,
    );

    let status = env.run().await;
    assert_eq!(status.overall_status, ProcessingStatus::Completed);

    let src_content = fs::read_to_string(env.knowledge_path("src/src_kb.md")).unwrap();
    assert!(src_content.contains("small.py"));
    assert!(!src_content.contains("### {PROJECT_ROOT}/src/big.py"));
    assert!(!env.knowledge_path("cache/src/big.py.file-analysis.md").exists());
}

// ============================================================================
// Orphan Cleanup
// ============================================================================

#[tokio::test]
async fn test_deleted_source_file_orphans_its_outputs() {
    let env = setup(&[
        ("README.md", "# X"),
        ("src/main.py", "print('hello')"),
        ("src/util.py", "def util(): pass"),
    ]);
    env.run().await;
    assert!(env.knowledge_path("cache/src/main.py.file-analysis.md").exists());

    let_mtime_advance().await;
    fs::remove_file(env.root.join("src/main.py")).unwrap();

    let status = env.run().await;
    assert_eq!(status.overall_status, ProcessingStatus::Completed);
    assert!(status.stats.orphans_deleted >= 1);
    assert!(!env.knowledge_path("cache/src/main.py.file-analysis.md").exists());

    let src_content = fs::read_to_string(env.knowledge_path("src/src_kb.md")).unwrap();
    assert!(!src_content.contains("main.py"));
    assert!(src_content.contains("util.py"));
}

#[tokio::test]
async fn test_directory_emptied_by_deletion_loses_its_kb() {
    let env = setup(&[("README.md", "# X"), ("src/main.py", "print('hello')")]);
    env.run().await;
    assert!(env.knowledge_path("src/src_kb.md").exists());

    let_mtime_advance().await;
    fs::remove_file(env.root.join("src/main.py")).unwrap();

    env.run().await;
    assert!(
        !env.knowledge_path("src/src_kb.md").exists(),
        "KB of a now-empty directory must be removed"
    );
    let root_content = fs::read_to_string(env.knowledge_path("root_kb.md")).unwrap();
    assert!(!root_content.contains("{PROJECT_ROOT}/src/"));
}

// ============================================================================
// Capture / Replay
// ============================================================================

#[tokio::test]
async fn test_replay_serves_hand_edited_response_with_zero_llm_calls() {
    let tmp_debug = TempDir::new().unwrap();
    let debug_dir = tmp_debug.path().to_path_buf();

    let debug_dir_for_config = debug_dir.clone();
    let env = setup_with(
        &[("README.md", "# X"), ("src/main.py", "print('hello')")],
        MockProvider::new(),
        move |config| {
            config.debug_config.debug_mode = true;
            config.debug_config.debug_output_directory = Some(debug_dir_for_config);
        },
    );
    env.run().await;
    let calls_after_capture = env.provider.calls();

    // Hand-edit the captured response for main.py between runs.
    let normalized = normalize_path_for_filename(&env.root.join("src/main.py"));
    let response_file = debug_dir
        .join("llm_debug/stage_1_file_analysis")
        .join(format!("{normalized}_response.txt"));
    assert!(response_file.exists(), "capture must use predictable names");
    fs::write(&response_file, "HAND EDITED ANALYSIS").unwrap();

    // Full-mode replay run: everything rebuilds, all of it from the debug
    // layout, so the provider is never called.
    let debug_dir_for_config = debug_dir.clone();
    let replay_env = TestEnv {
        root: env.root.clone(),
        provider: Arc::new(MockProvider::new()),
        indexer: {
            let mut config = defaults::default_config_for("project-base").unwrap();
            config.change_detection.timestamp_tolerance_seconds = 0;
            config.error_handling.retry_delay_seconds = 0.0;
            config.change_detection.indexing_mode = IndexingMode::Full;
            config.debug_config.enable_llm_replay = true;
            config.debug_config.debug_output_directory = Some(debug_dir_for_config);
            let handler: Arc<dyn Handler> = Arc::new(ProjectBaseHandler::new(
                env.root.join(".knowledge"),
                config,
            ));
            HierarchicalIndexer::new(handler, Arc::new(MockProvider::new()))
        },
        _tmp: TempDir::new().unwrap(),
    };

    let status = replay_env.run().await;
    assert_eq!(status.overall_status, ProcessingStatus::Completed);
    assert_eq!(status.stats.llm_requests, 0, "replay must not call the LLM");
    assert_eq!(env.provider.calls(), calls_after_capture);

    let src_content = fs::read_to_string(env.knowledge_path("src/src_kb.md")).unwrap();
    assert!(src_content.contains("HAND EDITED ANALYSIS"));
}

// ============================================================================
// Error Isolation
// ============================================================================

#[tokio::test]
async fn test_failed_file_is_isolated_when_configured() {
    let env = setup_with(
        &[
            ("README.md", "# X"),
            ("src/broken.py", "this file fails"),
            ("src/fine.py", "ok"),
        ],
        MockProvider::failing_on("broken.py"),
        |_| {},
    );

    let status = env.run().await;
    assert_eq!(status.overall_status, ProcessingStatus::Completed);
    assert_eq!(status.stats.files_failed, 1);
    assert!(status.stats.error_count >= 1);

    let src_content = fs::read_to_string(env.knowledge_path("src/src_kb.md")).unwrap();
    assert!(src_content.contains("### {PROJECT_ROOT}/src/broken.py"));
    assert!(src_content.contains("*No analysis available*"));
    assert!(src_content.contains("fine.py"));
    assert!(!env.knowledge_path("cache/src/broken.py.file-analysis.md").exists());
}

#[tokio::test]
async fn test_failed_file_fails_run_when_not_isolated() {
    let env = setup_with(
        &[("README.md", "# X"), ("src/broken.py", "this file fails")],
        MockProvider::failing_on("broken.py"),
        |config| config.error_handling.continue_on_file_errors = false,
    );

    let status = env.run().await;
    assert_eq!(status.overall_status, ProcessingStatus::Failed);
}

// ============================================================================
// Dry Run
// ============================================================================

#[tokio::test]
async fn test_dry_run_writes_nothing_and_calls_no_llm() {
    let env = setup_with(
        &[("README.md", "# X"), ("src/main.py", "print('hello')")],
        MockProvider::new(),
        |config| config.debug_config.dry_run = true,
    );

    let status = env.run().await;
    assert_eq!(status.overall_status, ProcessingStatus::Skipped);
    assert_eq!(env.provider.calls(), 0);
    assert!(!env.root.join(".knowledge").exists());
}

// ============================================================================
// Cross-Handler Isolation
// ============================================================================

#[tokio::test]
async fn test_git_clone_run_never_touches_project_base_namespace() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let knowledge_dir = root.join(".knowledge");

    // Pre-existing project-base output that must survive untouched.
    let sentinel = knowledge_dir.join("project-base/root_kb.md");
    fs::create_dir_all(sentinel.parent().unwrap()).unwrap();
    fs::write(&sentinel, "project base knowledge").unwrap();

    // A mirrored repository with content.
    let repo = knowledge_dir.join("git-clones/demo");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::write(repo.join("README.md"), "# demo").unwrap();
    fs::write(repo.join("src/lib.rs"), "pub fn demo() {}").unwrap();

    let mut config = defaults::default_config_for("git-clones").unwrap();
    config.error_handling.retry_delay_seconds = 0.0;
    let handler: Arc<dyn Handler> = Arc::new(GitCloneHandler::new(knowledge_dir.clone(), config));
    assert!(handler.can_handle(&repo));

    let provider = Arc::new(MockProvider::new());
    let indexer =
        HierarchicalIndexer::new(handler, Arc::clone(&provider) as Arc<dyn LlmProvider>);
    let source = IndexableSource::new(SourceType::GitClone, repo.clone(), "git-clones");
    let status = indexer.index(&source).await.unwrap();

    assert_eq!(status.overall_status, ProcessingStatus::Completed);
    assert_eq!(provider.calls(), 5);

    // KB files land inside the mirror; the cache under git-clones/cache.
    assert!(repo.join("root_kb.md").exists());
    assert!(repo.join("src/src_kb.md").exists());
    assert!(knowledge_dir
        .join("git-clones/cache/demo/src/lib.rs.file-analysis.md")
        .exists());

    // The project-base namespace is byte-identical.
    assert_eq!(
        fs::read_to_string(&sentinel).unwrap(),
        "project base knowledge"
    );
}

// ============================================================================
// Rerun After Clone Update
// ============================================================================

#[tokio::test]
async fn test_full_kb_rebuild_mode_reuses_file_analyses() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let knowledge_dir = root.join(".knowledge");
    let repo = knowledge_dir.join("git-clones/demo");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::write(repo.join("README.md"), "# demo").unwrap();

    let mut config = defaults::default_config_for("git-clones").unwrap();
    config.error_handling.retry_delay_seconds = 0.0;
    let handler: Arc<dyn Handler> = Arc::new(GitCloneHandler::new(knowledge_dir, config));
    let provider = Arc::new(MockProvider::new());
    let indexer =
        HierarchicalIndexer::new(handler, Arc::clone(&provider) as Arc<dyn LlmProvider>);
    let source = IndexableSource::new(SourceType::GitClone, repo.clone(), "git-clones");

    indexer.index(&source).await.unwrap();
    let calls_first = provider.calls();
    assert_eq!(calls_first, 3); // 1 file + 1 directory + 1 global

    // full_kb_rebuild regenerates the KB and directory synthesis but reuses
    // the cached file analysis.
    indexer.index(&source).await.unwrap();
    assert_eq!(provider.calls() - calls_first, 2);
    assert!(repo.join("root_kb.md").exists());
}
