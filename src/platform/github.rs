use async_trait::async_trait;
use octocrab::Octocrab;

use crate::error::{AppError, Result};
use crate::platform::{CreatePullRequest, PullRequestCreator, PullRequestResult};

/// Opens pull requests on GitHub with a personal access token.
pub struct GitHubPlatform {
    client: Octocrab,
}

impl GitHubPlatform {
    pub fn new(token: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))?;
        Ok(Self { client })
    }

    fn parse_repo(repo_full_name: &str) -> Result<(&str, &str)> {
        match repo_full_name.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok((owner, repo))
            }
            _ => Err(AppError::GitHubApi(format!(
                "Invalid repo name: {repo_full_name}"
            ))),
        }
    }
}

#[async_trait]
impl PullRequestCreator for GitHubPlatform {
    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequestResult> {
        let (owner, repo) = Self::parse_repo(&pr.repo_full_name)?;

        let created = self
            .client
            .pulls(owner, repo)
            .create(&pr.title, &pr.head_branch, &pr.base_branch)
            .body(&pr.body)
            .draft(pr.draft)
            .send()
            .await?;

        tracing::info!(
            repo = %pr.repo_full_name,
            pr_number = created.number,
            head = %pr.head_branch,
            "Opened pull request"
        );

        Ok(PullRequestResult {
            success: true,
            pr_number: Some(created.number),
            pr_url: created.html_url.map(|u| u.to_string()),
            message: format!("Opened pull request #{}", created.number),
        })
    }
}
