//! Latest release lookup on GitHub

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use apptest_common::Error;

use super::ReleaseResolver;

/// Public GitHub API
pub const GITHUB_API: &str = "https://api.github.com";

/// Token used to raise the GitHub rate limit
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";

const ORGANIZATION: &str = "giantswarm";
const USER_AGENT: &str = concat!("apptest/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Release {
    tag_name: String,
}

/// Resolves the latest GitHub release of `giantswarm/<artifact>`
pub struct GithubReleaseResolver {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GithubReleaseResolver {
    /// Resolver against the public GitHub API, authenticated when `GITHUB_TOKEN` is set
    pub fn new() -> Result<Self, Error> {
        let token = std::env::var(ENV_GITHUB_TOKEN).ok().filter(|t| !t.is_empty());
        Self::with_base_url(GITHUB_API, token)
    }

    /// Resolver against another GitHub API endpoint
    pub fn with_base_url(
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::resolution("latest-version", format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn latest_release_url(&self, artifact: &str) -> String {
        format!("{}/repos/{ORGANIZATION}/{artifact}/releases/latest", self.base_url)
    }
}

/// Strip the leading `v` of a release tag
pub fn version_from_tag(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

#[async_trait]
impl ReleaseResolver for GithubReleaseResolver {
    async fn latest_version(&self, artifact: &str) -> Result<String, Error> {
        let url = self.latest_release_url(artifact);
        let mut request = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::resolution("latest-version", format!("{artifact}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::resolution(
                "latest-version",
                format!("{artifact}: {status} - {body}"),
            ));
        }

        let release: Release = response
            .json()
            .await
            .map_err(|e| Error::resolution("latest-version", format!("{artifact}: {e}")))?;

        let version = version_from_tag(&release.tag_name).to_string();
        debug!(
            artifact = %artifact,
            tag = %release.tag_name,
            version = %version,
            "resolved latest release"
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_tag() {
        assert_eq!(version_from_tag("v1.2.3"), "1.2.3");
        assert_eq!(version_from_tag("1.2.3"), "1.2.3");
        assert_eq!(version_from_tag("vv1"), "v1");
    }

    #[test]
    fn test_latest_release_url() {
        let resolver =
            GithubReleaseResolver::with_base_url("https://github.example/api/", None).unwrap();
        assert_eq!(
            resolver.latest_release_url("security-bundle"),
            "https://github.example/api/repos/giantswarm/security-bundle/releases/latest"
        );
    }

    #[test]
    fn test_release_payload() {
        let payload = r#"{"tag_name": "v0.24.1", "name": "v0.24.1", "draft": false}"#;
        let release: Release = serde_json::from_str(payload).unwrap();
        assert_eq!(version_from_tag(&release.tag_name), "0.24.1");
    }
}
