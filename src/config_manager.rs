//! Configuration Manager
//!
//! Loads per-handler configuration from
//! `{knowledge_dir}/{handler_type}.indexing-config.json`, autogenerating the
//! file from the hardcoded defaults on first run. Parsed configurations are
//! cached in memory for the life of the process.

use crate::config::IndexingConfig;
use crate::defaults;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Per-knowledge-directory configuration loader with autogeneration
pub struct ConfigManager {
    knowledge_dir: PathBuf,
    cache: Mutex<HashMap<String, IndexingConfig>>,
}

impl ConfigManager {
    pub fn new(knowledge_dir: impl Into<PathBuf>) -> Self {
        Self {
            knowledge_dir: knowledge_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Config file path for a handler type
    pub fn config_file_path(&self, handler_type: &str) -> PathBuf {
        self.knowledge_dir
            .join(format!("{handler_type}.indexing-config.json"))
    }

    /// Load the configuration for `handler_type`.
    ///
    /// Missing files are generated once from the defaults and then read back;
    /// existing files are parsed and validated, failing fast on any invalid
    /// value.
    pub fn load(&self, handler_type: &str) -> Result<IndexingConfig> {
        if let Some(cached) = self.cache.lock().unwrap().get(handler_type) {
            debug!("Using cached config for handler {handler_type}");
            return Ok(cached.clone());
        }

        let path = self.config_file_path(handler_type);
        if !path.exists() {
            self.generate_default(handler_type, &path)?;
        }

        let config = self.read_config_file(&path)?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;

        self.cache
            .lock()
            .unwrap()
            .insert(handler_type.to_string(), config.clone());
        Ok(config)
    }

    /// Write the default configuration for `handler_type`, creating parents.
    ///
    /// Used both by `load` on first run and by the CLI `init-config` command.
    pub fn generate_default(&self, handler_type: &str, path: &Path) -> Result<()> {
        let config = defaults::default_config_for(handler_type)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&config)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!("Generated default config for {handler_type}: {}", path.display());
        Ok(())
    }

    /// Drop every cached configuration, forcing re-reads from disk.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    fn read_config_file(&self, path: &Path) -> Result<IndexingConfig> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }
}
