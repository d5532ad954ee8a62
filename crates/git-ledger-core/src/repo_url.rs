use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Schemes a repository URL may carry. Everything else (ssh included) is
/// rejected before it can reach the clone path or the database.
const ALLOWED_SCHEMES: [&str; 3] = ["https", "git", "file"];

/// Reasons a raw URL cannot become a [`RepoUrl`].
#[derive(Debug, Error)]
pub enum RepoUrlError {
    #[error("repo URL does not parse: {0}")]
    Parse(#[from] url::ParseError),

    #[error("repo URL scheme '{scheme}' is not one of https, git, file: {url}")]
    Scheme { scheme: String, url: String },
}

/// A normalized repository clone URL.
///
/// Normalization strips a trailing `/` and a trailing `.git` from the
/// path, so `https://example.com/a/b.git/` and `https://example.com/a/b`
/// are the same cache key and the same `repos.clone_url` row.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RepoUrl(String);

impl RepoUrl {
    /// Parse and normalize a raw URL.
    ///
    /// # Errors
    /// Returns an error when the URL does not parse or carries a scheme
    /// other than `https`, `git` or `file`.
    pub fn parse(raw: &str) -> Result<Self, RepoUrlError> {
        let mut parsed = Url::parse(raw)?;

        if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
            return Err(RepoUrlError::Scheme {
                scheme: parsed.scheme().to_owned(),
                url: raw.to_owned(),
            });
        }

        let path = parsed.path();
        let path = path.strip_suffix('/').unwrap_or(path);
        let path = path.strip_suffix(".git").unwrap_or(path).to_owned();
        parsed.set_path(&path);

        Ok(Self(parsed.to_string()))
    }

    /// The normalized URL string, as stored in `repos.clone_url`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative directory for this URL inside the cache root: scheme,
    /// host, then the path segments, so distinct URLs never share a
    /// directory. `https://example.com/a/b` maps to
    /// `https/example.com/a/b`.
    #[must_use]
    pub fn cache_subpath(&self) -> PathBuf {
        let parsed = Url::parse(&self.0).expect("RepoUrl holds a parsed URL");
        let mut path = PathBuf::from(parsed.scheme());
        if let Some(host) = parsed.host_str() {
            path.push(host);
        }
        for segment in parsed.path().split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RepoUrl {
    type Err = RepoUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RepoUrl {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RepoUrl {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
