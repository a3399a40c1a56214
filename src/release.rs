//! Upstream release polling.
//!
//! Queries a code-hosting "latest release" endpoint (GitHub-shaped) and
//! compares tags by literal string equality — no semver parsing. Grounded in
//! the corpus's release-manifest fetch pattern: a `reqwest` client with a
//! descriptive `User-Agent`, tolerant of a missing release (404) or garbage
//! body rather than treating either as fatal.

use serde::Deserialize;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("podlb/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Clone)]
pub struct ReleasePoller {
    client: reqwest::Client,
}

impl Default for ReleasePoller {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleasePoller {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("failed to build release poller client"),
        }
    }

    /// Strip scheme, host, `.git` suffix and trailing slash from a remote
    /// URL; the first two remaining path segments are `(owner, repo)`.
    /// Fewer than two segments yields `None`.
    pub fn parse_remote(url: &str) -> Option<(String, String)> {
        let without_scheme = url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let without_host = without_scheme.splitn(2, '/').nth(1)?;
        let trimmed = without_host
            .trim_end_matches('/')
            .trim_end_matches(".git");
        let mut segments = trimmed.split('/').filter(|s| !s.is_empty());
        let owner = segments.next()?;
        let repo = segments.next()?;
        Some((owner.to_string(), repo.to_string()))
    }

    /// Query the upstream "latest release" endpoint for `remote_url`.
    /// Returns `None` (logged) on 404, other non-2xx status, or a malformed
    /// body — release polling is never allowed to be fatal.
    pub async fn get_latest(&self, remote_url: &str) -> Option<Release> {
        let (owner, repo) = Self::parse_remote(remote_url)?;
        let url = format!("https://api.github.com/repos/{owner}/{repo}/releases/latest");

        let response = match self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "release poll unreachable");
                return None;
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(url, "no releases");
            return None;
        }
        if !response.status().is_success() {
            warn!(url, status = %response.status(), "release poll returned non-2xx");
            return None;
        }

        match response.json::<Release>().await {
            Ok(release) => Some(release),
            Err(e) => {
                warn!(url, error = %e, "release poll returned an invalid body");
                None
            }
        }
    }

    /// Returns the latest release iff its tag differs from `current_version`
    /// (or there is no current version yet). Comparison is literal string
    /// equality; a change to semver-aware comparison is a behavior change.
    pub async fn check_for_update(
        &self,
        remote_url: &str,
        current_version: Option<&str>,
    ) -> Option<Release> {
        let latest = self.get_latest(remote_url).await?;
        match current_version {
            Some(current) if current == latest.tag_name => None,
            _ => Some(latest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_repo_from_https_url() {
        let parsed = ReleasePoller::parse_remote("https://github.com/acme/widgets");
        assert_eq!(parsed, Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn strips_git_suffix_and_trailing_slash() {
        let parsed = ReleasePoller::parse_remote("https://github.com/acme/widgets.git/");
        assert_eq!(parsed, Some(("acme".to_string(), "widgets".to_string())));
    }

    #[test]
    fn fewer_than_two_segments_is_none() {
        assert_eq!(ReleasePoller::parse_remote("https://github.com/acme"), None);
        assert_eq!(ReleasePoller::parse_remote("https://github.com/"), None);
    }

    #[tokio::test]
    async fn unreachable_remote_is_none() {
        let poller = ReleasePoller::new();
        let result = poller.get_latest("https://127.0.0.1:1/owner/repo").await;
        assert!(result.is_none());
    }
}
