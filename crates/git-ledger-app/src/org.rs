//! Organization expansion against the hosted forge listing API.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;
use url::Url;

const PAGE_SIZE: usize = 100;

/// One repository as listed by the forge API.
#[derive(Clone, Debug, Deserialize)]
pub struct OrgRepo {
    #[serde(rename = "html_url")]
    pub url: String,
    #[serde(default)]
    pub archived: bool,
}

/// List an organization's repositories, following pagination. Archived
/// repositories are filtered out unless `include_archived` is set. Only
/// github.com organizations can be expanded.
///
/// # Errors
/// Fails when the URL is not a github.com organization or the listing
/// request fails.
pub async fn list_org_repos(
    client: &reqwest::Client,
    org_url: &str,
    include_archived: bool,
) -> Result<Vec<OrgRepo>> {
    let parsed = Url::parse(org_url).with_context(|| format!("invalid org URL: {org_url}"))?;
    if parsed.host_str() != Some("github.com") {
        bail!(
            "cannot expand organizations on {}",
            parsed.host_str().unwrap_or("<no host>")
        );
    }

    let api_url = format!("https://api.github.com/orgs{}/repos", parsed.path());
    let mut repos: Vec<OrgRepo> = Vec::new();
    let mut page = 1usize;
    loop {
        debug!(%api_url, page, "listing organization repositories");
        let batch: Vec<OrgRepo> = client
            .get(&api_url)
            .query(&[("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())])
            .send()
            .await
            .with_context(|| format!("requesting repo list from {api_url}"))?
            .error_for_status()
            .with_context(|| format!("repo list from {api_url}"))?
            .json()
            .await
            .context("decoding repo list")?;

        let full_page = batch.len() == PAGE_SIZE;
        repos.extend(batch);
        if !full_page {
            break;
        }
        page += 1;
    }

    Ok(filter_archived(repos, include_archived))
}

fn filter_archived(repos: Vec<OrgRepo>, include_archived: bool) -> Vec<OrgRepo> {
    if include_archived {
        return repos;
    }
    repos.into_iter().filter(|repo| !repo.archived).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"[
        {"html_url": "https://github.com/acme/widgets", "archived": false},
        {"html_url": "https://github.com/acme/legacy", "archived": true},
        {"html_url": "https://github.com/acme/tools"}
    ]"#;

    #[test]
    fn decodes_forge_listing() {
        let repos: Vec<OrgRepo> = serde_json::from_str(LISTING).expect("decode listing");
        assert_eq!(repos.len(), 3);
        assert_eq!(repos[0].url, "https://github.com/acme/widgets");
        assert!(repos[1].archived);
        assert!(!repos[2].archived, "missing archived flag defaults to false");
    }

    #[test]
    fn archived_repos_are_dropped_unless_requested() {
        let repos: Vec<OrgRepo> = serde_json::from_str(LISTING).expect("decode listing");

        let kept = filter_archived(repos.clone(), false);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|repo| !repo.archived));

        let all = filter_archived(repos, true);
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn rejects_non_github_hosts() {
        let client = reqwest::Client::new();
        let err = list_org_repos(&client, "https://example.org/acme", false).await;
        assert!(err.is_err());
    }
}
