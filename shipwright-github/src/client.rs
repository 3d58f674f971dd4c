//! GitHub API client using octocrab

use crate::{Error, Result};
use octocrab::Octocrab;
use tracing::info;

/// Authenticated client scoped to one repository
pub struct GitHubClient {
    client: Octocrab,
    owner: String,
    repo: String,
}

impl GitHubClient {
    /// Create a client for `owner/repo` authenticated with `token`
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::Auth("GitHub token is empty".to_string()));
        }

        let client = Octocrab::builder()
            .personal_token(token.trim().to_string())
            .build()
            .map_err(|e| Error::Auth(format!("Failed to create GitHub client: {}", e)))?;

        let (owner, repo) = (owner.into(), repo.into());
        info!(owner = %owner, repo = %repo, "Created GitHub client");
        Ok(Self {
            client,
            owner,
            repo,
        })
    }

    /// Create a client from `owner/repo`, an HTTPS URL or an SSH remote
    pub fn from_url(url: &str, token: &str) -> Result<Self> {
        let (owner, repo) = parse_repository(url)?;
        Self::new(owner, repo, token)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub(crate) fn client(&self) -> &Octocrab {
        &self.client
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

/// Split a repository reference into owner and name
///
/// Accepts `owner/repo`, `https://github.com/owner/repo[.git]` and
/// `git@github.com:owner/repo.git`.
fn parse_repository(input: &str) -> Result<(String, String)> {
    let input = input.trim();
    let path = if input.starts_with("https://") || input.starts_with("http://") {
        let url = url::Url::parse(input).map_err(|e| Error::Parse(e.to_string()))?;
        url.path().trim_matches('/').to_string()
    } else if let Some(rest) = input.strip_prefix("git@") {
        rest.split_once(':')
            .map(|(_, path)| path.to_string())
            .ok_or_else(|| Error::Parse(format!("Invalid SSH remote: {}", input)))?
    } else {
        input.to_string()
    };

    let path = path.trim_end_matches(".git");
    match path.split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(Error::Parse(format!(
            "Invalid repository '{}', expected owner/repo",
            input
        ))),
    }
}
