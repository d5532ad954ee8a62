//! PostgreSQL implementation of the ledger store.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Acquire, PgPool, Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;
use tracing::debug;

use crate::store::{
    AuthorId, AuthorStage, CommitStage, LedgerStore, RepoId, StoreError, StoreResult,
};

/// Rows flushed per bulk `INSERT` statement. Commit rows carry four
/// binds each, which keeps every statement far below the wire limit on
/// bind parameters.
const INSERT_CHUNK: usize = 1_000;

/// PostgreSQL-backed ledger store. Owns the connection pool.
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Connect a pool with the given options and verify the database is
    /// actually reachable.
    ///
    /// # Errors
    /// Returns an error when the pool cannot establish a connection.
    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an already-built pool (tests, embedded setups).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    /// Returns an error when a migration statement fails.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool, shared freely across workers.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Connection options from discrete parameters. TLS is required, as the
/// ledger databases are hosted.
#[must_use]
pub fn connect_options(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    dbname: &str,
) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(host)
        .port(port)
        .username(user)
        .password(password)
        .database(dbname)
        .ssl_mode(PgSslMode::Require)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn repo_id(&self, clone_url: &str) -> StoreResult<Option<RepoId>> {
        let id = sqlx::query_scalar::<_, RepoId>("SELECT id FROM repos WHERE clone_url = $1")
            .bind(clone_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_repo(&self, clone_url: &str) -> StoreResult<RepoId> {
        let id = sqlx::query_scalar::<_, RepoId>(
            "INSERT INTO repos (clone_url) VALUES ($1) RETURNING id",
        )
        .bind(clone_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn last_commit(&self, repo: RepoId) -> StoreResult<Option<OffsetDateTime>> {
        let latest = sqlx::query_scalar::<_, OffsetDateTime>(
            "SELECT commit_date FROM commits \
             WHERE repo_id = $1 AND commit_date IS NOT NULL \
             ORDER BY commit_date DESC LIMIT 1",
        )
        .bind(repo)
        .fetch_optional(&self.pool)
        .await?;
        Ok(latest)
    }

    async fn begin_author_stage(&self, tmp_name: &str) -> StoreResult<Box<dyn AuthorStage>> {
        if !is_safe_identifier(tmp_name) {
            return Err(StoreError::InvalidTempTable(tmp_name.to_owned()));
        }

        // Temporary tables are session-scoped: everything touching this
        // one, the pivot included, must run on this connection.
        let mut conn = self.pool.acquire().await?;
        sqlx::query(&format!(
            "CREATE TEMPORARY TABLE {tmp_name} AS SELECT * FROM commit_authors WHERE 1 = 0"
        ))
        .execute(&mut *conn)
        .await?;
        debug!(table = tmp_name, "opened author staging table");

        Ok(Box::new(PgAuthorStage {
            conn,
            tmp_name: tmp_name.to_owned(),
            emails: Vec::new(),
        }))
    }

    async fn author_ids(&self, emails: &[String]) -> StoreResult<HashMap<String, AuthorId>> {
        let rows = sqlx::query_as::<_, (AuthorId, String)>(
            "SELECT id, commit_author_email FROM commit_authors \
             WHERE commit_author_email = ANY($1)",
        )
        .bind(emails)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, email)| (email, id)).collect())
    }

    async fn begin_commit_stage(&self) -> StoreResult<Box<dyn CommitStage>> {
        let txn = self.pool.begin().await?;
        Ok(Box::new(PgCommitStage {
            txn,
            rows: Vec::new(),
        }))
    }
}

struct PgAuthorStage {
    conn: PoolConnection<Postgres>,
    tmp_name: String,
    emails: Vec<String>,
}

#[async_trait]
impl AuthorStage for PgAuthorStage {
    async fn append(&mut self, email: &str) -> StoreResult<()> {
        self.emails.push(email.to_owned());
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut txn = self.conn.begin().await?;
        for chunk in self.emails.chunks(INSERT_CHUNK) {
            let mut query = QueryBuilder::<Postgres>::new(format!(
                "INSERT INTO {} (commit_author_email) ",
                self.tmp_name
            ));
            query.push_values(chunk, |mut row, email| {
                row.push_bind(email);
            });
            query.build().execute(&mut *txn).await?;
        }
        txn.commit().await?;
        debug!(table = %self.tmp_name, rows = self.emails.len(), "staged author rows");
        Ok(())
    }

    async fn pivot(mut self: Box<Self>) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO commit_authors (commit_author_email) \
             SELECT commit_author_email FROM {} \
             ON CONFLICT (commit_author_email) DO NOTHING",
            self.tmp_name
        ))
        .execute(&mut *self.conn)
        .await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.tmp_name))
            .execute(&mut *self.conn)
            .await?;
        debug!(table = %self.tmp_name, "pivoted staged authors into commit_authors");
        Ok(())
    }
}

struct PgCommitStage {
    txn: Transaction<'static, Postgres>,
    rows: Vec<(String, AuthorId, RepoId, OffsetDateTime)>,
}

#[async_trait]
impl CommitStage for PgCommitStage {
    async fn append(
        &mut self,
        hash: &str,
        author: AuthorId,
        repo: RepoId,
        date: OffsetDateTime,
    ) -> StoreResult<()> {
        self.rows.push((hash.to_owned(), author, repo, date));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let staged = self.rows.len();
        for chunk in self.rows.chunks(INSERT_CHUNK) {
            let mut query = QueryBuilder::<Postgres>::new(
                "INSERT INTO commits (commit_hash, commit_author_id, repo_id, commit_date) ",
            );
            query.push_values(chunk, |mut row, (hash, author, repo, date)| {
                row.push_bind(hash).push_bind(author).push_bind(repo).push_bind(date);
            });
            query.build().execute(&mut *self.txn).await?;
        }
        self.txn.commit().await?;
        debug!(rows = staged, "committed bulk commit insert");
        Ok(())
    }
}

/// Temporary table names are interpolated into SQL, so they are limited
/// to identifier characters.
pub(crate) fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
