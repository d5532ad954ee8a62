//! Disk-backed LRU cache of cloned repositories.
//!
//! The cache is bounded by free disk space rather than entry count: once
//! the volume holding the cache root drops to the configured minimum of
//! free bytes, least-recently-used clones are deleted from disk until the
//! budget is met again. Two locks cooperate:
//!
//! - the cache lock guards the recency order and the URL index, and is
//!   held only across in-memory bookkeeping (never across a clone);
//! - each entry's lease guards that entry's on-disk state, and is held by
//!   a caller for the whole of its read or by the cache for an eviction.
//!
//! `get` and `put` both return the entry with its lease already held;
//! dropping the returned [`LeasedEntry`] releases it.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::build::RepoBuilder;
use git2::{AutotagOption, FetchOptions, Repository};
use git_ledger_core::RepoUrl;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info, warn};

use crate::entry::{CacheEntry, LeasedEntry};
use crate::error::{Error, Result};

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

type FreeSpace = Box<dyn Fn(&Path) -> io::Result<u64> + Send + Sync>;

/// LRU cache of on-disk clones, bounded by free disk space.
pub struct RepoCache {
    root: PathBuf,
    min_free_bytes: u64,
    pinned: HashSet<RepoUrl>,
    free_space: FreeSpace,
    state: Mutex<LruCache<RepoUrl, Arc<CacheEntry>>>,
}

impl RepoCache {
    /// Build a cache rooted at an existing directory.
    ///
    /// # Errors
    /// Fails when `root` is missing or unreadable, or when the volume
    /// already has no more than `min_free_gb` gigabytes available; such
    /// a cache could never admit an entry.
    pub fn new(root: impl AsRef<Path>, min_free_gb: u64, pinned: HashSet<RepoUrl>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::metadata(&root).map_err(|source| Error::Root {
            path: root.clone(),
            source,
        })?;

        let min_free_bytes = min_free_gb.saturating_mul(BYTES_PER_GB);
        let available = fs2::available_space(&root)?;
        if available <= min_free_bytes {
            return Err(Error::BudgetExceedsDisk {
                min_free_bytes,
                available,
            });
        }

        Ok(Self {
            root,
            min_free_bytes,
            pinned,
            free_space: Box::new(|path: &Path| fs2::available_space(path)),
            state: Mutex::new(LruCache::unbounded()),
        })
    }

    /// Look up a URL. On a hit the entry is promoted to most recently
    /// used and returned with its lease held; a miss changes nothing.
    ///
    /// `get` never clones and never evicts.
    pub async fn get(&self, url: &RepoUrl) -> Option<LeasedEntry> {
        let mut state = self.state.lock().await;
        let entry = Arc::clone(state.get(url)?);
        // The lease is taken before the cache lock is released so the
        // promoted entry cannot be evicted out from under us.
        let guard = entry.acquire().await;
        drop(state);
        debug!(%url, "cache hit");
        Some(LeasedEntry::new(entry, guard))
    }

    /// Look up a URL, cloning it into the cache on a miss.
    ///
    /// A hit behaves exactly like [`RepoCache::get`]. On a miss the cache
    /// first evicts until the disk budget is met, inserts the new entry at
    /// the front with its lease held, and only then performs the clone,
    /// with the cache lock released so unrelated URLs keep flowing. If
    /// the target directory already holds a valid repository it is adopted
    /// without cloning.
    ///
    /// # Errors
    /// Fails when eviction cannot meet the budget ([`Error::AllPinned`])
    /// or when the clone itself fails; a failed clone removes both the
    /// target directory and the just-inserted entry.
    pub async fn put(&self, url: &RepoUrl) -> Result<LeasedEntry> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.get(url) {
            let entry = Arc::clone(entry);
            let guard = entry.acquire().await;
            drop(state);
            debug!(%url, "cache hit");
            return Ok(LeasedEntry::new(entry, guard));
        }

        self.try_evict(&mut state).await?;

        let path = self.root.join(url.cache_subpath());
        let entry = CacheEntry::new(url.clone(), path);
        state.put(url.clone(), Arc::clone(&entry));
        // Lease the new entry before releasing the cache lock: the entry
        // is visible in the index but ineligible for eviction or reuse
        // until the clone below completes.
        let guard = entry.acquire().await;
        drop(state);

        let clone_url = url.clone();
        let target = entry.path().to_path_buf();
        let cloned = task::spawn_blocking(move || adopt_or_clone(&clone_url, &target)).await?;

        match cloned {
            Ok(()) => Ok(LeasedEntry::new(entry, guard)),
            Err(err) => {
                warn!(%url, error = %err, "clone failed, dropping cache entry");
                // Release the lease first: a waiter blocked on it may be
                // holding the cache lock we are about to take.
                drop(guard);
                let mut state = self.state.lock().await;
                state.pop(url);
                Err(err)
            }
        }
    }

    /// Evict least-recently-used unpinned entries until the free-disk
    /// budget is met. Runs with the cache lock held.
    async fn try_evict(&self, state: &mut LruCache<RepoUrl, Arc<CacheEntry>>) -> Result<()> {
        let mut available = (self.free_space)(&self.root)?;

        while available <= self.min_free_bytes {
            if state.is_empty() {
                break;
            }

            // Walk from the LRU tail toward the MRU head, skipping pinned
            // keys.
            let victim = state
                .iter()
                .rev()
                .find(|(key, _)| !self.pinned.contains(*key))
                .map(|(key, entry)| (key.clone(), Arc::clone(entry)));
            let Some((key, entry)) = victim else {
                return Err(Error::AllPinned);
            };

            // Blocks while an ingestion is mid-pass on the victim.
            let guard = entry.acquire().await;
            let path = entry.path().to_path_buf();
            task::spawn_blocking(move || remove_dir_if_present(&path)).await??;
            state.pop(&key);
            drop(guard);
            info!(url = %key, "evicted repository from cache");

            available = (self.free_space)(&self.root)?;
        }

        Ok(())
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }

    /// Cached URLs, most recently used first. Diagnostic view; does not
    /// promote anything.
    pub async fn keys(&self) -> Vec<RepoUrl> {
        self.state
            .lock()
            .await
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Directory the cache stores clones under.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Clone `url` into `target`, or adopt an existing valid clone left
/// behind by an earlier process. A failed clone leaves no partial
/// directory behind.
fn adopt_or_clone(url: &RepoUrl, target: &Path) -> Result<()> {
    if target.exists() {
        // A previous run (container restart, re-attached volume) may have
        // left a usable clone here.
        if Repository::open(target).is_ok() {
            debug!(%url, path = %target.display(), "adopting existing clone");
            return Ok(());
        }
        std::fs::remove_dir_all(target)?;
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    debug!(%url, path = %target.display(), "cloning into cache");
    if let Err(err) = clone_into(url, target) {
        let _ = std::fs::remove_dir_all(target);
        return Err(err);
    }
    Ok(())
}

/// Clone a repository without tags. Blocking.
pub(crate) fn clone_into(url: &RepoUrl, target: &Path) -> Result<()> {
    let mut opts = FetchOptions::new();
    opts.download_tags(AutotagOption::None);
    RepoBuilder::new()
        .fetch_options(opts)
        .clone(url.as_str(), target)?;
    Ok(())
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
