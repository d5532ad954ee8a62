//! Error types for repository acquisition and caching.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the cache, the providers and the log reader.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured cache root is missing or unreadable.
    #[error("cache root {path} is not usable: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The volume already has less free space than the configured budget,
    /// so the cache could never admit an entry.
    #[error("minimum free disk of {min_free_bytes} bytes is not below the {available} bytes available")]
    BudgetExceedsDisk { min_free_bytes: u64, available: u64 },

    /// Eviction walked the whole cache without finding an unpinned victim.
    #[error("disk budget cannot be met: every remaining cache entry is pinned")]
    AllPinned,

    /// Fetched history has diverged from the local default branch.
    #[error("fetched history for {path} cannot be fast-forwarded")]
    NonFastForward { path: PathBuf },

    /// Git operation failed.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    /// Commit carried a timestamp outside the representable range.
    #[error("commit timestamp out of range: {0}")]
    Timestamp(#[from] time::error::ComponentRange),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A blocking worker task was cancelled or panicked.
    #[error("background git task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
