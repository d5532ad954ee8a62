//! A single cached clone on disk and the lease that guards it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::build::CheckoutBuilder;
use git2::{AutotagOption, FetchOptions, Repository};
use git_ledger_core::RepoUrl;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{Error, Result};

/// One cache slot: a repository URL and the directory its clone lives in.
///
/// The lease is an exclusive mutex over the on-disk state. Whoever holds
/// it may read or rewrite the directory; the cache acquires it before
/// eviction, so a leased entry can never disappear underneath a reader.
pub struct CacheEntry {
    key: RepoUrl,
    path: PathBuf,
    lease: Arc<Mutex<()>>,
}

impl CacheEntry {
    pub(crate) fn new(key: RepoUrl, path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            key,
            path,
            lease: Arc::new(Mutex::new(())),
        })
    }

    /// The URL this entry was created for.
    pub fn key(&self) -> &RepoUrl {
        &self.key
    }

    /// Directory holding the clone.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the exclusive lease, waiting until the current holder is done.
    pub(crate) async fn acquire(self: &Arc<Self>) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lease).lock_owned().await
    }

    /// Open the on-disk clone and pull from `origin` into the default
    /// working branch. "Already up to date" is not an error; diverged
    /// histories are.
    ///
    /// Blocking: callers on the runtime go through `spawn_blocking`.
    ///
    /// # Errors
    /// Fails when the directory is missing, is not a repository, the
    /// fetch fails, or the fetched tip is not a fast-forward.
    pub fn open_and_fetch(&self) -> Result<Repository> {
        let repo = Repository::open(&self.path)?;

        {
            let mut remote = repo.find_remote("origin")?;
            let mut opts = FetchOptions::new();
            opts.download_tags(AutotagOption::None);
            // Empty refspec list: use the refspecs the clone configured.
            remote.fetch(&[] as &[&str], Some(&mut opts), None)?;
        }

        self.fast_forward(&repo)?;
        Ok(repo)
    }

    fn fast_forward(&self, repo: &Repository) -> Result<()> {
        // No FETCH_HEAD means the remote had nothing for us (fresh empty
        // upstream); there is nothing to merge.
        let Ok(fetch_head) = repo.find_reference("FETCH_HEAD") else {
            return Ok(());
        };
        let fetched = repo.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repo.merge_analysis(&[&fetched])?;

        if analysis.is_up_to_date() {
            debug!(url = %self.key, "already up to date");
            return Ok(());
        }
        if !analysis.is_fast_forward() {
            return Err(Error::NonFastForward {
                path: self.path.clone(),
            });
        }

        let mut head = repo.head()?;
        debug!(url = %self.key, target = %fetched.id(), "fast-forwarding default branch");
        head.set_target(fetched.id(), "git-ledger: fast-forward from origin")?;
        repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
        Ok(())
    }
}

/// A cache entry together with its held lease.
///
/// Dropping the value releases the lease exactly once, on every exit
/// path.
pub struct LeasedEntry {
    entry: Arc<CacheEntry>,
    _guard: OwnedMutexGuard<()>,
}

impl LeasedEntry {
    pub(crate) fn new(entry: Arc<CacheEntry>, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            entry,
            _guard: guard,
        }
    }

    /// The URL this lease covers.
    pub fn key(&self) -> &RepoUrl {
        self.entry.key()
    }

    /// Directory holding the clone.
    pub fn path(&self) -> &Path {
        self.entry.path()
    }

    /// See [`CacheEntry::open_and_fetch`].
    ///
    /// # Errors
    /// Propagates the entry's open/fetch failure.
    pub fn open_and_fetch(&self) -> Result<Repository> {
        self.entry.open_and_fetch()
    }
}
