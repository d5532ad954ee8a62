//! Test harness for end-to-end ingestion scenarios: local repository
//! fixtures with fixed committer timestamps, and an in-memory ledger
//! store that enforces the same uniqueness rules as the real schema.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{Commit, Repository, Signature, Time};
use git_ledger_core::RepoUrl;
use git_ledger_db::{
    AuthorId, AuthorStage, CommitStage, LedgerStore, RepoId, StoreResult,
};
use time::OffsetDateTime;

/// Create a repository at `dir` with one commit per `(email, epoch
/// seconds)` pair and return its `file://` URL.
///
/// # Errors
/// Returns an error when the repository cannot be created or committed to.
pub fn init_origin(dir: &Path, commits: &[(&str, i64)]) -> Result<RepoUrl> {
    let repo = Repository::init(dir).context("init fixture repo")?;
    for (email, seconds) in commits {
        commit_file(&repo, email, *seconds)?;
    }
    RepoUrl::parse(&format!("file://{}", dir.display())).context("fixture url")
}

/// Append one commit to an existing fixture.
///
/// # Errors
/// Returns an error when the commit cannot be created.
pub fn append_commit(dir: &Path, email: &str, seconds: i64) -> Result<()> {
    let repo = Repository::open(dir).context("open fixture repo")?;
    commit_file(&repo, email, seconds)
}

fn commit_file(repo: &Repository, email: &str, seconds: i64) -> Result<()> {
    let workdir = repo.workdir().context("fixture repos have a worktree")?;
    let name = format!("note-{seconds}.txt");
    std::fs::write(workdir.join(&name), format!("{email} at {seconds}\n"))
        .context("write fixture file")?;

    let mut index = repo.index()?;
    index.add_path(Path::new(&name))?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let sig = Signature::new("Fixture", email, &Time::new(seconds, 0))?;
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &sig,
        &sig,
        &format!("note at {seconds}"),
        &tree,
        &parents,
    )?;
    Ok(())
}

/// One row of the in-memory `commits` table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitRow {
    pub hash: String,
    pub author: AuthorId,
    pub repo: RepoId,
    pub date: OffsetDateTime,
}

#[derive(Default)]
struct MemState {
    repos: Vec<String>,
    authors: Vec<String>,
    staged: HashMap<String, Vec<String>>,
    commits: Vec<CommitRow>,
}

/// In-memory [`LedgerStore`]. Uniqueness violations that PostgreSQL
/// would reject are panics here, so a pipeline bug fails the test
/// loudly instead of corrupting assertions.
#[derive(Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().expect("mem store poisoned")
    }

    #[must_use]
    pub fn repo_urls(&self) -> Vec<String> {
        self.lock().repos.clone()
    }

    #[must_use]
    pub fn author_emails(&self) -> Vec<String> {
        self.lock().authors.clone()
    }

    #[must_use]
    pub fn commit_rows(&self) -> Vec<CommitRow> {
        self.lock().commits.clone()
    }

    /// Id an author email resolved to, if it was ever pivoted in.
    #[must_use]
    pub fn author_id(&self, email: &str) -> Option<AuthorId> {
        let state = self.lock();
        state
            .authors
            .iter()
            .position(|known| known == email)
            .map(|idx| idx as AuthorId + 1)
    }
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn repo_id(&self, clone_url: &str) -> StoreResult<Option<RepoId>> {
        let state = self.lock();
        Ok(state
            .repos
            .iter()
            .position(|known| known == clone_url)
            .map(|idx| idx as RepoId + 1))
    }

    async fn insert_repo(&self, clone_url: &str) -> StoreResult<RepoId> {
        let mut state = self.lock();
        assert!(
            !state.repos.iter().any(|known| known == clone_url),
            "unique violation on repos.clone_url: {clone_url}"
        );
        state.repos.push(clone_url.to_owned());
        Ok(state.repos.len() as RepoId)
    }

    async fn last_commit(&self, repo: RepoId) -> StoreResult<Option<OffsetDateTime>> {
        let state = self.lock();
        Ok(state
            .commits
            .iter()
            .filter(|row| row.repo == repo)
            .map(|row| row.date)
            .max())
    }

    async fn begin_author_stage(&self, tmp_name: &str) -> StoreResult<Box<dyn AuthorStage>> {
        let mut state = self.lock();
        assert!(
            !state.staged.contains_key(tmp_name),
            "temporary table name collision: {tmp_name}"
        );
        state.staged.insert(tmp_name.to_owned(), Vec::new());
        Ok(Box::new(MemAuthorStage {
            state: Arc::clone(&self.state),
            tmp_name: tmp_name.to_owned(),
            pending: Vec::new(),
        }))
    }

    async fn author_ids(&self, emails: &[String]) -> StoreResult<HashMap<String, AuthorId>> {
        let state = self.lock();
        Ok(emails
            .iter()
            .filter_map(|email| {
                state
                    .authors
                    .iter()
                    .position(|known| known == email)
                    .map(|idx| (email.clone(), idx as AuthorId + 1))
            })
            .collect())
    }

    async fn begin_commit_stage(&self) -> StoreResult<Box<dyn CommitStage>> {
        Ok(Box::new(MemCommitStage {
            state: Arc::clone(&self.state),
            rows: Vec::new(),
        }))
    }
}

struct MemAuthorStage {
    state: Arc<Mutex<MemState>>,
    tmp_name: String,
    pending: Vec<String>,
}

#[async_trait]
impl AuthorStage for MemAuthorStage {
    async fn append(&mut self, email: &str) -> StoreResult<()> {
        self.pending.push(email.to_owned());
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let mut state = self.state.lock().expect("mem store poisoned");
        let staged = state
            .staged
            .get_mut(&self.tmp_name)
            .expect("stage committed before begin");
        staged.append(&mut self.pending);
        Ok(())
    }

    async fn pivot(self: Box<Self>) -> StoreResult<()> {
        let mut state = self.state.lock().expect("mem store poisoned");
        let staged = state
            .staged
            .remove(&self.tmp_name)
            .expect("stage pivoted before begin");
        for email in staged {
            // ON CONFLICT (commit_author_email) DO NOTHING
            if !state.authors.iter().any(|known| known == &email) {
                state.authors.push(email);
            }
        }
        Ok(())
    }
}

struct MemCommitStage {
    state: Arc<Mutex<MemState>>,
    rows: Vec<CommitRow>,
}

#[async_trait]
impl CommitStage for MemCommitStage {
    async fn append(
        &mut self,
        hash: &str,
        author: AuthorId,
        repo: RepoId,
        date: OffsetDateTime,
    ) -> StoreResult<()> {
        self.rows.push(CommitRow {
            hash: hash.to_owned(),
            author,
            repo,
            date,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut state = self.state.lock().expect("mem store poisoned");
        for row in self.rows {
            assert!(
                !state
                    .commits
                    .iter()
                    .any(|known| known.repo == row.repo && known.hash == row.hash),
                "unique violation on commits (repo_id, commit_hash): {}",
                row.hash
            );
            state.commits.push(row);
        }
        Ok(())
    }
}
