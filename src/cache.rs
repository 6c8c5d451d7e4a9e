//! Analysis Cache
//!
//! Content-addressed on-disk store of LLM outputs, keyed by
//! (source path, pipeline stage). Entries live under the handler's
//! `cache/` namespace as plain markdown files whose mtimes drive the
//! staleness decisions.
//!
//! # Features
//!
//! - **Atomic writes**: temp file + rename, never a half-written entry
//! - **Single-flight**: concurrent builds of one key collapse into a single
//!   in-flight computation
//! - **Integrity as miss**: unreadable entries are logged and regenerated,
//!   never served corrupt
//!
//! Entries age out only through explicit delete tasks; there is no TTL.

use crate::error::CacheError;
use crate::handlers::Handler;
use crate::stage::PipelineStage;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

// ============================================================================
// Cache Key
// ============================================================================

/// Identity of one cached LLM output
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Absolute source path (file or directory) the output belongs to
    pub target: PathBuf,

    pub stage: PipelineStage,

    /// Chunk index for the chunked stages
    pub chunk: Option<usize>,
}

impl CacheKey {
    pub fn new(target: impl Into<PathBuf>, stage: PipelineStage) -> Self {
        Self {
            target: target.into(),
            stage,
            chunk: None,
        }
    }

    pub fn chunked(target: impl Into<PathBuf>, stage: PipelineStage, chunk: usize) -> Self {
        Self {
            target: target.into(),
            stage,
            chunk: Some(chunk),
        }
    }
}

/// One retrieved cache entry
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub content: String,
    pub modified: DateTime<Utc>,
}

// ============================================================================
// Analysis Cache
// ============================================================================

/// Per-run cache handle bound to one handler and source root
pub struct AnalysisCache {
    handler: Arc<dyn Handler>,
    source_root: PathBuf,
    in_flight: Mutex<HashMap<CacheKey, Arc<OnceCell<String>>>>,
}

impl AnalysisCache {
    pub fn new(handler: Arc<dyn Handler>, source_root: PathBuf) -> Self {
        Self {
            handler,
            source_root,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// On-disk location of the entry for `key`
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.handler
            .cache_path(&key.target, &self.source_root, key.stage, key.chunk)
    }

    /// Read an entry. Unreadable-but-present entries are logged and reported
    /// as a miss so the caller regenerates them.
    pub fn get(&self, key: &CacheKey) -> Option<CachedEntry> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }
        let modified = file_mtime(&path)?;
        match fs::read_to_string(&path) {
            Ok(content) => Some(CachedEntry { content, modified }),
            Err(e) => {
                warn!(
                    "Cache entry {} is unreadable ({e}); treating as miss",
                    path.display()
                );
                None
            }
        }
    }

    /// Modification time of the entry for `key`, if it exists
    pub fn mtime(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        file_mtime(&self.entry_path(key))
    }

    /// Atomically persist an entry (write to a sibling temp path, rename).
    pub fn put(&self, key: &CacheKey, content: &str) -> Result<()> {
        let path = self.entry_path(key);
        write_atomic(&path, content).map_err(|source| CacheError::Write {
            path: path.clone(),
            source,
        })?;
        debug!("Cached {} for {}", key.stage, key.target.display());
        Ok(())
    }

    /// Whether the entry exists and is at least as new as every dependency,
    /// within `tolerance_seconds`.
    pub fn is_fresh(
        &self,
        key: &CacheKey,
        dependencies: &[DateTime<Utc>],
        tolerance_seconds: u64,
    ) -> bool {
        let Some(entry_mtime) = self.mtime(key) else {
            return false;
        };
        let tolerance = chrono::Duration::seconds(tolerance_seconds as i64);
        dependencies
            .iter()
            .all(|dep| entry_mtime + tolerance >= *dep)
    }

    /// Remove the entry for `key`; missing entries are fine.
    pub fn delete(&self, key: &CacheKey) -> Result<()> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
        }
    }

    /// Serve `key` from disk, or build it with at-most-one concurrent
    /// producer per key. Additional concurrent callers for the same key await
    /// the same in-flight computation; the produced value is persisted before
    /// anyone observes it.
    pub async fn get_or_build<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let cell = {
            let mut map = self.in_flight.lock().unwrap();
            Arc::clone(map.entry(key.clone()).or_default())
        };

        let content = cell
            .get_or_try_init(|| async {
                if let Some(entry) = self.get(key) {
                    debug!("Cache hit for {} ({})", key.target.display(), key.stage);
                    return Ok(entry.content);
                }
                let produced = producer().await?;
                self.put(key, &produced)?;
                Ok::<String, anyhow::Error>(produced)
            })
            .await?;

        Ok(content.clone())
    }

    /// Like [`get_or_build`](Self::get_or_build) but the on-disk entry is
    /// ignored: the producer runs (once per key per process) and its result
    /// replaces whatever was cached. Used when the decision engine has
    /// already ruled the entry stale.
    pub async fn rebuild<F, Fut>(&self, key: &CacheKey, producer: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let cell = {
            let mut map = self.in_flight.lock().unwrap();
            Arc::clone(map.entry(key.clone()).or_default())
        };

        let content = cell
            .get_or_try_init(|| async {
                let produced = producer().await?;
                self.put(key, &produced)?;
                Ok::<String, anyhow::Error>(produced)
            })
            .await?;

        Ok(content.clone())
    }
}

/// Best-effort mtime as UTC
pub fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Write `content` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}
