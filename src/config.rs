#![allow(dead_code)]

//! A1: on-disk configuration, following the teacher crate's `cli::Config` pattern (serde_json
//! at a `dirs::config_dir()` path) generalized to this engine's settings.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub vault_root: PathBuf,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    pub remote_parent_id: Option<String>,
    pub state_db_path: Option<PathBuf>,
}

fn default_worker_count() -> usize {
    1
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_root: PathBuf::new(),
            ignore_patterns: vec![".obsidian/**".to_string(), ".trash/**".to_string()],
            worker_count: default_worker_count(),
            cache_ttl_secs: default_cache_ttl_secs(),
            remote_parent_id: None,
            state_db_path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path).with_context(|| format!("reading {path:?}"))?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content).with_context(|| format!("writing {path:?}"))?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("could not find a config directory")?.join("vaultsync");
        Ok(dir.join("config.json"))
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.state_db_path.clone().unwrap_or_else(|| self.vault_root.join(".vaultsync.sqlite3"))
    }
}
