//! Deterministic branch naming and idempotent branch lifecycle for ticket work.
//!
//! Every ticket maps to exactly one branch, `ticket/<first 8 chars of id>-<slug>`,
//! so a re-run after a crash finds the same line of work it left behind.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::store::types::Ticket;
use crate::workspace::git::{self, CommitInfo};
use crate::workspace::manager::WorkspaceManager;

/// Namespace every ticket branch lives under.
pub const BRANCH_PREFIX: &str = "ticket";

const SHORT_ID_LEN: usize = 8;
const MAX_SLUG_LEN: usize = 50;

/// Existence and tip of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub exists: bool,
    pub last_commit: Option<CommitInfo>,
}

/// Branch operations against the working copy of a repository.
#[derive(Debug, Clone)]
pub struct BranchManager {
    workspace: WorkspaceManager,
}

impl BranchManager {
    pub fn new(workspace: WorkspaceManager) -> Self {
        Self { workspace }
    }

    /// Branch name for a ticket. Pure: same inputs, same name.
    pub fn name_for(ticket_id: &str, title: &str) -> String {
        let short_id: String = ticket_id.chars().take(SHORT_ID_LEN).collect();
        let slug = slugify(title);
        if slug.is_empty() {
            format!("{BRANCH_PREFIX}/{short_id}")
        } else {
            format!("{BRANCH_PREFIX}/{short_id}-{slug}")
        }
    }

    /// Check out the ticket's branch, creating it from `base_branch` if it does not exist.
    ///
    /// Returns the branch name and whether it was created by this call.
    pub async fn ensure(
        &self,
        ticket: &Ticket,
        repo_url: &str,
        base_branch: &str,
    ) -> Result<(String, bool)> {
        let path = self.working_copy(repo_url)?;
        let name = Self::name_for(&ticket.id, &ticket.title);

        if git::branch_exists(&path, &name).await? {
            git::checkout(&path, &name).await?;
            tracing::info!(branch = %name, "Checked out existing ticket branch");
            return Ok((name, false));
        }

        match git::create_branch(&path, &name, base_branch, false).await {
            Ok(()) => {
                tracing::info!(branch = %name, base = %base_branch, "Created ticket branch");
                Ok((name, true))
            }
            // Lost a race with another creator; the branch is there now.
            Err(AppError::BranchConflict(_)) => {
                git::checkout(&path, &name).await?;
                Ok((name, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Create the ticket's branch from `base_branch`.
    ///
    /// Fails with [`AppError::BranchConflict`] if it already exists, unless `force`
    /// is set. **`force` discards every commit on the existing branch.**
    pub async fn create(
        &self,
        ticket: &Ticket,
        repo_url: &str,
        base_branch: &str,
        force: bool,
    ) -> Result<String> {
        let path = self.working_copy(repo_url)?;
        let name = Self::name_for(&ticket.id, &ticket.title);

        if force {
            tracing::warn!(branch = %name, "Force-recreating ticket branch");
        }
        git::create_branch(&path, &name, base_branch, force).await?;
        Ok(name)
    }

    /// Check out the ticket's existing branch.
    pub async fn checkout(&self, ticket: &Ticket, repo_url: &str) -> Result<String> {
        let path = self.working_copy(repo_url)?;
        let name = Self::name_for(&ticket.id, &ticket.title);

        if !git::branch_exists(&path, &name).await? {
            return Err(AppError::BranchNotFound(name));
        }
        git::checkout(&path, &name).await?;
        Ok(name)
    }

    pub async fn list(&self, repo_url: &str) -> Result<Vec<String>> {
        let path = self.working_copy(repo_url)?;
        git::list_branches(&path).await
    }

    pub async fn current_branch(&self, repo_url: &str) -> Result<String> {
        let path = self.working_copy(repo_url)?;
        git::current_branch(&path).await
    }

    pub async fn info(&self, repo_url: &str, branch_name: &str) -> Result<BranchInfo> {
        let path = self.working_copy(repo_url)?;
        let last_commit = git::last_commit(&path, branch_name).await?;
        Ok(BranchInfo {
            name: branch_name.to_string(),
            exists: last_commit.is_some(),
            last_commit,
        })
    }

    fn working_copy(&self, repo_url: &str) -> Result<PathBuf> {
        let path = self.workspace.path_for(repo_url)?;
        if !path.join(".git").exists() {
            return Err(AppError::Workspace(format!(
                "No working copy for {repo_url} at {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

/// Lower-case ASCII slug: non-alphanumerics dropped, whitespace and hyphen
/// runs collapsed to one hyphen, at most 50 characters.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_separator = false;

    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_separator = true;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}
