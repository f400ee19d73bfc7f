//! GitHub API client for commit statuses and branch listings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tinderbox_config::GitHubConfig;
use tinderbox_core::{CommitState, RemoteRepository, StatusReporter};
use tracing::debug;

const GITHUB_API_URL: &str = "https://api.github.com";
const STATUS_CONTEXT: &str = "tinderbox";
const USER_AGENT: &str = "Tinderbox-CI";

/// GitHub API client bound to one repository.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    owner: String,
    name: String,
    description: String,
    /// Base URL of this server, for status links.
    hostname: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig, hostname: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: GITHUB_API_URL.to_string(),
            token: config.token.clone(),
            owner: config.owner.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            hostname: hostname.trim_end_matches('/').to_string(),
        }
    }

    /// Talk to a different API endpoint, such as GitHub Enterprise.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, self.owner, self.name, path)
    }

    /// Page listing the builds of a commit.
    fn target_url(&self, sha: &str) -> String {
        format!("{}/api/v1/commits/{}/builds", self.hostname, sha)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    /// Create a commit status.
    pub async fn create_commit_status(
        &self,
        sha: &str,
        state: CommitState,
    ) -> Result<(), GitHubError> {
        let payload = StatusRequest {
            state,
            target_url: self.target_url(sha),
            description: &self.description,
            context: STATUS_CONTEXT,
        };

        let response = self
            .request(reqwest::Method::POST, &self.repo_url(&format!("statuses/{}", sha)))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to create status ({}): {}",
                status, text
            )));
        }

        debug!(sha = %sha, state = %state, "Created commit status");
        Ok(())
    }

    /// List the repository's branches.
    pub async fn list_branches(&self) -> Result<Vec<String>, GitHubError> {
        let response = self
            .request(reqwest::Method::GET, &self.repo_url("branches?per_page=100"))
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to list branches ({}): {}",
                status, text
            )));
        }

        let branches: Vec<Branch> = response
            .json()
            .await
            .map_err(|e| GitHubError::Parse(e.to_string()))?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }
}

#[async_trait]
impl StatusReporter for GitHubClient {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn create_status(&self, sha: &str, state: CommitState) -> tinderbox_core::Result<()> {
        Ok(self.create_commit_status(sha, state).await?)
    }
}

#[async_trait]
impl RemoteRepository for GitHubClient {
    async fn list_remote_branches(&self) -> tinderbox_core::Result<Vec<String>> {
        Ok(self.list_branches().await?)
    }
}

/// Commit status creation request.
#[derive(Debug, Serialize)]
struct StatusRequest<'a> {
    state: CommitState,
    target_url: String,
    description: &'a str,
    context: &'a str,
}

#[derive(Debug, Deserialize)]
struct Branch {
    name: String,
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<GitHubError> for tinderbox_core::Error {
    fn from(err: GitHubError) -> Self {
        tinderbox_core::Error::ExternalService(err.to_string())
    }
}
