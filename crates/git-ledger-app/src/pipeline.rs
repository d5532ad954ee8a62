//! The two-pass ingestion pipeline: repository log in, ledger rows out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use git_ledger_core::RepoUrl;
use git_ledger_db::LedgerStore;
use git_ledger_git::GitProvider;
use time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Process-wide monotonic suffix for temporary table names. Combined
/// with a random id so two workers can never collide on a name, even
/// across restarts that race an old connection.
static TMP_TABLE_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_stage_table_name() -> String {
    let seq = TMP_TABLE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "commit_authors_stage_{}_{}",
        Uuid::new_v4().simple(),
        seq
    )
}

/// Ingest one repository: ensure its row, fetch it through the provider,
/// then run the author pass and the commit pass over everything newer
/// than the stored cursor.
///
/// The provider handle is released on every exit path; an error drops
/// the in-flight stage, rolling its transaction back. A partial run is
/// harmless: the cursor only ever advances to the newest committed
/// `commit_date`, so a retry re-reads just the unwritten tail.
///
/// # Errors
/// Propagates provider, log and store failures.
pub async fn ingest_repository(
    store: &dyn LedgerStore,
    provider: &GitProvider,
    url: &RepoUrl,
) -> Result<()> {
    debug!(%url, "checking whether repository is already recorded");
    let repo_id = match store.repo_id(url.as_str()).await? {
        Some(id) => id,
        None => {
            debug!(%url, "repository unknown, inserting");
            store.insert_repo(url.as_str()).await?
        }
    };

    debug!(%url, "obtaining repository through the configured provider");
    let handle = provider.fetch(url).await?;

    // Committer clocks are nanosecond-resolution and the log filter is
    // exclusive, so one nanosecond past the stored cursor skips exactly
    // the commits already ingested.
    let since = store
        .last_commit(repo_id)
        .await?
        .map(|latest| latest + Duration::nanoseconds(1));
    debug!(%url, ?since, "reading commits past the stored cursor");

    // Author pass: stage every first-seen email, pivot into the
    // canonical table, then resolve the assigned ids in one query.
    let tmp_name = next_stage_table_name();
    let mut stage = store.begin_author_stage(&tmp_name).await?;
    let mut seen = HashSet::new();
    let mut unique_emails: Vec<String> = Vec::new();
    for record in handle.log(since).await? {
        if seen.insert(record.author_email.clone()) {
            stage.append(&record.author_email).await?;
            unique_emails.push(record.author_email);
        }
    }
    stage.commit().await?;
    stage.pivot().await?;
    let author_ids = store.author_ids(&unique_emails).await?;
    debug!(%url, authors = unique_emails.len(), "author pass complete");

    // Commit pass: walk the log again with the same cursor and stream
    // every commit into one bulk transaction.
    let records = handle.log(since).await?;
    let ingested = records.len();
    let mut commits = store.begin_commit_stage().await?;
    for record in records {
        let author = author_ids
            .get(&record.author_email)
            .copied()
            .with_context(|| {
                format!(
                    "author id missing after pivot for {}",
                    record.author_email
                )
            })?;
        commits
            .append(&record.hash, author, repo_id, record.committed_at)
            .await?;
    }
    commits.commit().await?;

    info!(%url, commits = ingested, "ingestion complete");
    Ok(())
}
