//! Pull-request publication contract and the GitHub REST implementation.

use async_trait::async_trait;
use codemend_common::retry::{with_retries, RetryPolicy};
use codemend_common::{CoreError, Result};
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[async_trait]
pub trait PullRequestClient: Send + Sync {
    /// Open a pull request against `repo_url`, returning its web URL.
    async fn open_pull_request(&self, repo_url: &str, request: &PullRequest) -> Result<String>;
}

pub struct GithubPrClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl GithubPrClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    /// `https://github.com/acme/shop(.git)` -> `acme/shop`
    fn owner_and_repo(repo_url: &str) -> Result<String> {
        let trimmed = repo_url
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let mut segments = trimmed.split('/');
        let _host = segments.next();
        let owner = segments.next();
        let repo = segments.next();
        match (owner, repo) {
            (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
                Ok(format!("{owner}/{repo}"))
            }
            _ => Err(CoreError::Publish(format!(
                "cannot derive owner/repo from {repo_url}"
            ))),
        }
    }
}

#[async_trait]
impl PullRequestClient for GithubPrClient {
    async fn open_pull_request(&self, repo_url: &str, request: &PullRequest) -> Result<String> {
        let slug = Self::owner_and_repo(repo_url)?;
        let url = format!("{}/repos/{slug}/pulls", self.api_base.trim_end_matches('/'));
        let body = json!({
            "title": request.title,
            "body": request.body,
            "head": request.head_branch,
            "base": request.base_branch,
        });

        let html_url = with_retries("github", "open_pull_request", RetryPolicy::default(), || {
            let builder = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .header("User-Agent", "codemend")
                .header("Accept", "application/vnd.github+json")
                .json(&body);
            async move {
                let response = builder
                    .send()
                    .await
                    .map_err(|e| CoreError::Publish(format!("send: {e}")))?;
                let status = response.status();
                let text = response
                    .text()
                    .await
                    .map_err(|e| CoreError::Publish(format!("body: {e}")))?;
                match status.as_u16() {
                    200 | 201 => {
                        let value: serde_json::Value = serde_json::from_str(&text)?;
                        value["html_url"]
                            .as_str()
                            .map(str::to_string)
                            .ok_or_else(|| CoreError::Publish("response without html_url".into()))
                    }
                    401 | 403 => Err(CoreError::Auth(format!("github: {status}"))),
                    429 => Err(CoreError::RateLimited("github".into())),
                    code if code >= 500 => Err(CoreError::Upstream {
                        status: code,
                        message: text.chars().take(300).collect(),
                    }),
                    code => Err(CoreError::Publish(format!("github {code}: {text}"))),
                }
            }
        })
        .await?;

        info!(pr = %html_url, "pull request opened");
        Ok(html_url)
    }
}
