//! Persistence operations required by the ingestion pipeline.
//!
//! The trait keeps the pipeline independent of PostgreSQL: production
//! wires in [`crate::postgres::PgLedgerStore`], tests an in-memory
//! double. Author rows travel through a staged stream ([`AuthorStage`])
//! that is pivoted into the canonical table once complete; commit rows
//! travel through a bulk transactional stream ([`CommitStage`]).

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

/// Primary key of a `repos` row.
pub type RepoId = i32;
/// Primary key of a `commit_authors` row.
pub type AuthorId = i32;

/// Errors surfaced by a ledger store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database round-trip failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A synthesized temporary table name was not a safe identifier.
    #[error("invalid temporary table name: {0}")]
    InvalidTempTable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Typed operations over the commit ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Id of the repository stored under `clone_url`, if any.
    ///
    /// # Errors
    /// Returns a store-specific error when the lookup fails.
    async fn repo_id(&self, clone_url: &str) -> StoreResult<Option<RepoId>>;

    /// Insert a repository row and return its id. A unique conflict is a
    /// race with a concurrent ingestion; callers may retry the lookup.
    ///
    /// # Errors
    /// Returns a store-specific error when the insert fails.
    async fn insert_repo(&self, clone_url: &str) -> StoreResult<RepoId>;

    /// Most recent stored commit date for the repository, or `None` when
    /// it has no commits yet.
    ///
    /// # Errors
    /// Returns a store-specific error when the query fails.
    async fn last_commit(&self, repo: RepoId) -> StoreResult<Option<OffsetDateTime>>;

    /// Open an author staging stream over a temporary relation named
    /// `tmp_name`. The name must be unique per concurrent call.
    ///
    /// # Errors
    /// Returns a store-specific error when the stage cannot be opened.
    async fn begin_author_stage(&self, tmp_name: &str) -> StoreResult<Box<dyn AuthorStage>>;

    /// Bulk id lookup over the canonical author table.
    ///
    /// # Errors
    /// Returns a store-specific error when the query fails.
    async fn author_ids(&self, emails: &[String]) -> StoreResult<HashMap<String, AuthorId>>;

    /// Open a bulk commit stream.
    ///
    /// # Errors
    /// Returns a store-specific error when the stream cannot be opened.
    async fn begin_commit_stage(&self) -> StoreResult<Box<dyn CommitStage>>;
}

/// Staged author insertion: queue emails, commit the staging
/// transaction, pivot into `commit_authors` with conflict suppression.
/// Dropping an uncommitted stage abandons the staged rows.
#[async_trait]
pub trait AuthorStage: Send {
    /// Queue one email row on the open stream.
    ///
    /// # Errors
    /// Returns a store-specific error when the row cannot be queued.
    async fn append(&mut self, email: &str) -> StoreResult<()>;

    /// Flush the stream and commit the staging transaction.
    ///
    /// # Errors
    /// Returns a store-specific error when the flush or commit fails; the
    /// staging transaction is rolled back.
    async fn commit(&mut self) -> StoreResult<()>;

    /// Atomically move staged rows into the canonical table, suppressing
    /// email conflicts, then drop the temporary relation.
    ///
    /// # Errors
    /// Returns a store-specific error when the pivot fails.
    async fn pivot(self: Box<Self>) -> StoreResult<()>;
}

/// Bulk commit insertion inside one transaction. Dropping an
/// uncommitted stage rolls the transaction back.
#[async_trait]
pub trait CommitStage: Send {
    /// Queue one commit row on the open stream.
    ///
    /// # Errors
    /// Returns a store-specific error when the row cannot be queued.
    async fn append(
        &mut self,
        hash: &str,
        author: AuthorId,
        repo: RepoId,
        date: OffsetDateTime,
    ) -> StoreResult<()>;

    /// Flush queued rows and commit the transaction.
    ///
    /// # Errors
    /// Returns a store-specific error when the flush or commit fails; the
    /// transaction is rolled back.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
