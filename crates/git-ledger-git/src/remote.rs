//! Remote reachability probe.

use git_ledger_core::RepoUrl;
use tokio::task;

use crate::error::Result;

/// Confirm the URL points at a repository we can list refs from, the
/// `git ls-remote` equivalent used by intake validation. Authentication
/// and not-found failures surface as git errors, as they would from the
/// command line.
///
/// # Errors
/// Fails when the remote cannot be connected to.
pub async fn check_reachable(url: &RepoUrl) -> Result<()> {
    let url = url.clone();
    task::spawn_blocking(move || -> Result<()> {
        let mut remote = git2::Remote::create_detached(url.as_str())?;
        remote.connect(git2::Direction::Fetch)?;
        remote.disconnect()?;
        Ok(())
    })
    .await?
}
