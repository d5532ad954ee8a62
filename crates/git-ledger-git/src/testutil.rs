//! Local repository fixtures for tests. Commits carry fixed committer
//! timestamps so cursor arithmetic is deterministic.

use std::path::Path;

use git2::{Commit, Repository, Signature, Time};
use git_ledger_core::RepoUrl;

use crate::error::Result;

/// Initialize a repository at `dir` with one commit per `(email, epoch
/// seconds)` pair and return its `file://` URL.
pub(crate) fn init_origin(dir: &Path, commits: &[(&str, i64)]) -> RepoUrl {
    let repo = Repository::init(dir).expect("init origin");
    for (email, seconds) in commits {
        commit_file(&repo, email, *seconds);
    }
    RepoUrl::parse(&format!("file://{}", dir.display())).expect("fixture url")
}

/// Add one more commit to an existing fixture.
pub(crate) fn append_commit(dir: &Path, email: &str, seconds: i64) {
    let repo = Repository::open(dir).expect("open origin");
    commit_file(&repo, email, seconds);
}

pub(crate) fn clone(url: &RepoUrl, target: &Path) -> Result<()> {
    crate::cache::clone_into(url, target)
}

fn commit_file(repo: &Repository, email: &str, seconds: i64) {
    let workdir = repo.workdir().expect("fixture repos have a worktree");
    let name = format!("note-{seconds}.txt");
    std::fs::write(workdir.join(&name), format!("{email} at {seconds}\n")).expect("write file");

    let mut index = repo.index().expect("repo index");
    index.add_path(Path::new(&name)).expect("stage file");
    index.write().expect("write index");
    let tree_oid = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_oid).expect("find tree");

    let sig = Signature::new("Fixture", email, &Time::new(seconds, 0)).expect("signature");
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &sig,
        &sig,
        &format!("note at {seconds}"),
        &tree,
        &parents,
    )
    .expect("commit fixture");
}
