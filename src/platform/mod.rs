pub mod github;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use github::GitHubPlatform;

/// A pull request to open for a finished ticket branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePullRequest {
    /// `owner/name`
    pub repo_full_name: String,
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    pub message: String,
}

impl PullRequestResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            pr_number: None,
            pr_url: None,
            message: message.into(),
        }
    }
}

/// Code-hosting side of the hand-off after a successful run.
#[async_trait]
pub trait PullRequestCreator: Send + Sync {
    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequestResult>;
}
