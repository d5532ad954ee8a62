//! Runtime settings: environment-driven flags plus the optional YAML
//! pinned-repository file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use git_ledger_core::RepoUrl;
use serde::Deserialize;

/// Which repository provider serves ingestions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProviderKind {
    /// Disk-backed LRU cache shared across requests.
    Cache,
    /// Ephemeral in-memory style clones, one per request.
    Memory,
}

/// Service configuration, read from flags and the environment.
#[derive(Debug, Parser)]
#[command(name = "git-ledger", about = "Commit history ingestion service")]
pub struct Settings {
    #[arg(long, env = "DATABASE_HOST")]
    pub database_host: String,
    #[arg(long, env = "DATABASE_PORT", default_value_t = 5432)]
    pub database_port: u16,
    #[arg(long, env = "DATABASE_USER")]
    pub database_user: String,
    #[arg(long, env = "DATABASE_PASSWORD")]
    pub database_password: String,
    #[arg(long, env = "DATABASE_DBNAME")]
    pub database_dbname: String,

    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    pub server_port: u16,

    /// Provider backing `fetch`: `cache` or `memory`.
    #[arg(long, env = "GIT_PROVIDER", value_enum)]
    pub git_provider: ProviderKind,

    /// Directory holding cached clones (cache provider only).
    #[arg(long, env = "CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
    /// Free gigabytes the cache volume must keep (cache provider only).
    #[arg(long, env = "MIN_FREE_DISK_GB")]
    pub min_free_disk_gb: Option<u64>,

    /// Path to a YAML config file (`never-evict-repos`).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level by default.
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Cross-field validation that clap cannot express.
    ///
    /// # Errors
    /// Fails when the cache provider is selected without its tuning
    /// parameters.
    pub fn validate(&self) -> Result<()> {
        if self.git_provider == ProviderKind::Cache {
            if self.cache_dir.is_none() {
                bail!("CACHE_DIR must be set when GIT_PROVIDER is cache");
            }
            if self.min_free_disk_gb.is_none() {
                bail!("MIN_FREE_DISK_GB must be set when GIT_PROVIDER is cache");
            }
        }
        Ok(())
    }

    /// Load the pinned set from the `--config` YAML file, if given.
    ///
    /// # Errors
    /// Fails when the file cannot be read or parsed.
    pub fn pinned_repos(&self) -> Result<HashSet<RepoUrl>> {
        match &self.config {
            Some(path) => Ok(PinnedConfig::load(path)?.into_set()),
            None => Ok(HashSet::new()),
        }
    }
}

/// YAML configuration file: repositories exempt from cache eviction.
#[derive(Debug, Default, Deserialize)]
pub struct PinnedConfig {
    #[serde(rename = "never-evict-repos", default)]
    pub never_evict_repos: Vec<RepoUrl>,
}

impl PinnedConfig {
    /// Read and parse the file at `path`.
    ///
    /// # Errors
    /// Fails on unreadable files and invalid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    /// The pinned set keyed the way the cache keys entries.
    #[must_use]
    pub fn into_set(self) -> HashSet<RepoUrl> {
        self.never_evict_repos.into_iter().collect()
    }
}
