//! End-to-end ingestion scenarios over local fixture repositories.

use std::collections::HashSet;

use anyhow::Result;
use git_ledger_app::ingest_repository;
use git_ledger_e2e::{append_commit, init_origin, MemStore};
use git_ledger_git::{GitProvider, RepoCache};

#[tokio::test]
async fn fresh_repo_with_three_commits() -> Result<()> {
    let origin = tempfile::tempdir()?;
    let url = init_origin(
        origin.path(),
        &[
            ("a@example.com", 1_000),
            ("b@example.com", 2_000),
            ("a@example.com", 3_000),
        ],
    )?;

    let store = MemStore::new();
    let provider = GitProvider::Ephemeral;
    ingest_repository(&store, &provider, &url).await?;

    assert_eq!(store.repo_urls(), vec![url.as_str().to_owned()]);

    let authors: HashSet<_> = store.author_emails().into_iter().collect();
    assert_eq!(
        authors,
        HashSet::from(["a@example.com".to_owned(), "b@example.com".to_owned()])
    );

    let rows = store.commit_rows();
    assert_eq!(rows.len(), 3);
    let a = store.author_id("a@example.com").expect("a@ assigned");
    let b = store.author_id("b@example.com").expect("b@ assigned");
    assert_eq!(rows.iter().filter(|row| row.author == a).count(), 2);
    assert_eq!(rows.iter().filter(|row| row.author == b).count(), 1);
    assert!(rows.iter().all(|row| row.repo == 1));
    Ok(())
}

#[tokio::test]
async fn incremental_ingestion_adds_only_the_new_tail() -> Result<()> {
    let origin = tempfile::tempdir()?;
    let url = init_origin(
        origin.path(),
        &[
            ("a@example.com", 1_000),
            ("b@example.com", 2_000),
            ("a@example.com", 3_000),
        ],
    )?;

    let store = MemStore::new();
    let provider = GitProvider::Ephemeral;
    ingest_repository(&store, &provider, &url).await?;
    let first_rows = store.commit_rows();

    append_commit(origin.path(), "c@example.com", 4_000)?;
    ingest_repository(&store, &provider, &url).await?;

    let rows = store.commit_rows();
    assert_eq!(rows.len(), 4);
    assert_eq!(store.author_emails().len(), 3);

    // The first three rows are untouched by the second run.
    assert_eq!(&rows[..3], &first_rows[..]);
    let c = store.author_id("c@example.com").expect("c@ assigned");
    assert_eq!(rows[3].author, c);
    assert_eq!(rows[3].date.unix_timestamp(), 4_000);
    Ok(())
}

#[tokio::test]
async fn one_author_over_many_commits_yields_one_author_row() -> Result<()> {
    let origin = tempfile::tempdir()?;
    let commits: Vec<(&str, i64)> = (0..100)
        .map(|i| ("solo@example.com", 1_000 + i))
        .collect();
    let url = init_origin(origin.path(), &commits)?;

    let store = MemStore::new();
    let provider = GitProvider::Ephemeral;
    ingest_repository(&store, &provider, &url).await?;

    assert_eq!(store.author_emails(), vec!["solo@example.com".to_owned()]);
    assert_eq!(store.commit_rows().len(), 100);
    Ok(())
}

#[tokio::test]
async fn reingestion_without_upstream_changes_is_idempotent() -> Result<()> {
    let origin = tempfile::tempdir()?;
    let url = init_origin(
        origin.path(),
        &[("a@example.com", 1_000), ("b@example.com", 2_000)],
    )?;

    let cache_root = tempfile::tempdir()?;
    let store = MemStore::new();
    let provider = GitProvider::Cache(RepoCache::new(cache_root.path(), 0, HashSet::new())?);

    ingest_repository(&store, &provider, &url).await?;
    let rows = store.commit_rows();
    let authors = store.author_emails();

    // Second run sees nothing past the cursor; the MemStore would panic
    // on any duplicate insert.
    ingest_repository(&store, &provider, &url).await?;
    assert_eq!(store.commit_rows(), rows);
    assert_eq!(store.author_emails(), authors);
    Ok(())
}
