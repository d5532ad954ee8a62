//! Repository providers: how an ingestion obtains a readable repo.
//!
//! Two variants, selected by configuration. The cache-backed provider
//! shares clones across requests through [`RepoCache`]; the ephemeral
//! provider clones into a temp directory that vanishes on release. Both
//! hand out a [`RepoHandle`] whose drop releases whatever was held.

use std::path::{Path, PathBuf};

use git2::Repository;
use git_ledger_core::{CommitRecord, RepoUrl};
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::task;
use tracing::debug;

use crate::cache::{clone_into, RepoCache};
use crate::entry::LeasedEntry;
use crate::error::Result;
use crate::log::commit_log;

/// Source of repositories for the ingestion pipeline.
pub enum GitProvider {
    /// Disk-backed LRU cache shared across requests.
    Cache(RepoCache),
    /// Fresh clone per fetch into volatile storage; nothing shared.
    Ephemeral,
}

impl GitProvider {
    /// Obtain a readable repository for `url`, incorporating upstream
    /// changes.
    ///
    /// The cache variant resolves the URL through `get`/`put` and then
    /// opens and pulls the clone under its lease. The ephemeral variant
    /// clones into a fresh temp directory.
    ///
    /// # Errors
    /// Propagates cache, clone and fetch failures.
    pub async fn fetch(&self, url: &RepoUrl) -> Result<RepoHandle> {
        match self {
            Self::Cache(cache) => {
                debug!(%url, "resolving through repo cache");
                let leased = match cache.get(url).await {
                    Some(leased) => leased,
                    None => {
                        debug!(%url, "cache miss, putting");
                        cache.put(url).await?
                    }
                };

                let leased = task::spawn_blocking(move || -> Result<LeasedEntry> {
                    // The opened repository is dropped here; reads reopen
                    // by path under the same lease.
                    leased.open_and_fetch()?;
                    Ok(leased)
                })
                .await??;

                Ok(RepoHandle {
                    path: leased.path().to_path_buf(),
                    _guard: HandleGuard::Leased(leased),
                })
            }
            Self::Ephemeral => {
                debug!(%url, "cloning into ephemeral storage");
                let clone_url = url.clone();
                let dir = task::spawn_blocking(move || -> Result<TempDir> {
                    let dir = tempfile::tempdir()?;
                    clone_into(&clone_url, dir.path())?;
                    Ok(dir)
                })
                .await??;

                Ok(RepoHandle {
                    path: dir.path().to_path_buf(),
                    _guard: HandleGuard::Ephemeral(dir),
                })
            }
        }
    }
}

enum HandleGuard {
    Leased(LeasedEntry),
    Ephemeral(TempDir),
}

/// A readable repository plus whatever keeps it alive: a cache lease or
/// a temp directory. Dropping the handle is the release: the lease
/// frees up, or the ephemeral clone is deleted.
pub struct RepoHandle {
    path: PathBuf,
    _guard: HandleGuard,
}

impl RepoHandle {
    /// Directory of the underlying clone.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the commit log, filtered to committer timestamps strictly
    /// greater than `since`. Each call walks history afresh.
    ///
    /// # Errors
    /// Propagates open and traversal failures.
    pub async fn log(&self, since: Option<OffsetDateTime>) -> Result<Vec<CommitRecord>> {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let repo = Repository::open(&path)?;
            commit_log(&repo, since)
        })
        .await?
    }
}
