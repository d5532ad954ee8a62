//! Commit history traversal.

use git2::Repository;
use git_ledger_core::CommitRecord;
use time::OffsetDateTime;

use crate::error::Result;

/// Walk ancestors of the default branch head and collect one record per
/// commit. When `since` is given, only commits whose **committer**
/// timestamp is strictly greater than it are kept; the walk itself is
/// not pruned, because ancestor order is not globally sorted by time.
///
/// Blocking: callers on the runtime go through `spawn_blocking`.
///
/// # Errors
/// Fails when the repository has no head or a commit cannot be read.
pub fn commit_log(repo: &Repository, since: Option<OffsetDateTime>) -> Result<Vec<CommitRecord>> {
    let mut walk = repo.revwalk()?;
    walk.push_head()?;

    let mut records = Vec::new();
    for oid in walk {
        let oid = oid?;
        let commit = repo.find_commit(oid)?;

        let committed_at = OffsetDateTime::from_unix_timestamp(commit.time().seconds())?;
        if let Some(since) = since {
            if committed_at <= since {
                continue;
            }
        }

        records.push(CommitRecord {
            hash: oid.to_string(),
            author_email: String::from_utf8_lossy(commit.author().email_bytes()).into_owned(),
            committed_at,
        });
    }

    Ok(records)
}
