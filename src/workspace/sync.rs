use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::GitConfig;
use crate::error::{AppError, Result};
use crate::workspace::git::{self, Author, MergeOutcome};
use crate::workspace::manager::WorkspaceManager;

/// Message returned when there is nothing to commit.
pub const NOTHING_TO_COMMIT: &str = "Nothing to commit, working tree clean";

/// Result of [`RepositorySync::add_commit_and_push`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushOutcome {
    pub success: bool,
    pub commit_hash: Option<String>,
    pub message: String,
}

/// Keeps local working copies in step with their remotes.
#[derive(Debug, Clone)]
pub struct RepositorySync {
    workspace: WorkspaceManager,
    author: Author,
}

impl RepositorySync {
    pub fn new(workspace: WorkspaceManager, git_config: &GitConfig) -> Self {
        Self {
            workspace,
            author: Author {
                name: git_config.author_name.clone(),
                email: git_config.author_email.clone(),
            },
        }
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    /// Clone the repository if there is no local copy, otherwise fetch and fast-forward.
    ///
    /// An existing copy is first reset to its checked-out commit: uncommitted
    /// edits and untracked files left by an earlier run are removed. Returns
    /// the working-copy path and whether a clone happened.
    pub async fn clone_or_pull(
        &self,
        repo_url: &str,
        token: Option<&str>,
        dest_path: Option<&Path>,
    ) -> Result<(PathBuf, bool)> {
        let path = match dest_path {
            Some(p) => p.to_path_buf(),
            None => self.workspace.path_for(repo_url)?,
        };

        if path.join(".git").exists() {
            tracing::info!(repo = %repo_url, path = %path.display(), "Updating existing working copy");
            git::reset_clean(&path).await?;
            git::fetch(&path, token).await?;
            let moved = git::fast_forward(&path).await?;
            tracing::debug!(repo = %repo_url, moved, "Pull finished");
            return Ok((path, false));
        }

        // A directory without .git is a leftover from an interrupted clone.
        if path.exists() {
            tracing::warn!(path = %path.display(), "Removing stale working copy directory");
            self.workspace.cleanup(&path).await?;
        }
        WorkspaceManager::ensure_parent(&path).await?;

        tracing::info!(repo = %repo_url, path = %path.display(), "Cloning repository");
        git::clone(repo_url, &path, token).await?;
        Ok((path, true))
    }

    /// Stage everything and commit as the given author.
    pub async fn commit(
        &self,
        repo_url: &str,
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<String> {
        let path = self.working_copy(repo_url)?;
        git::add_all(&path).await?;
        if !git::has_staged_changes(&path).await? {
            return Err(AppError::Git(NOTHING_TO_COMMIT.to_string()));
        }
        let author = Author {
            name: author_name.to_string(),
            email: author_email.to_string(),
        };
        let hash = git::commit(&path, message, &author).await?;
        tracing::info!(repo = %repo_url, commit = %hash, "Committed changes");
        Ok(hash)
    }

    /// Stage, commit as the configured bot author, and push `branch_name`.
    ///
    /// "Nothing to commit" and push failures come back as `success = false`
    /// rather than errors. A commit whose push failed is kept.
    pub async fn add_commit_and_push(
        &self,
        repo_url: &str,
        message: &str,
        branch_name: &str,
        token: Option<&str>,
    ) -> Result<PushOutcome> {
        let path = self.working_copy(repo_url)?;

        if !git::has_changes(&path).await? {
            tracing::info!(repo = %repo_url, "No changes to commit");
            return Ok(PushOutcome {
                success: false,
                commit_hash: None,
                message: NOTHING_TO_COMMIT.to_string(),
            });
        }

        git::add_all(&path).await?;
        if !git::has_staged_changes(&path).await? {
            return Ok(PushOutcome {
                success: false,
                commit_hash: None,
                message: NOTHING_TO_COMMIT.to_string(),
            });
        }

        let hash = git::commit(&path, message, &self.author).await?;

        match git::push(&path, branch_name, token, false).await {
            Ok(()) => {
                tracing::info!(branch = %branch_name, commit = %hash, "Pushed changes");
                Ok(PushOutcome {
                    success: true,
                    commit_hash: Some(hash.clone()),
                    message: format!("Committed and pushed {hash} to {branch_name}"),
                })
            }
            Err(e) => {
                tracing::warn!(branch = %branch_name, commit = %hash, error = %e, "Push failed");
                Ok(PushOutcome {
                    success: false,
                    commit_hash: Some(hash.clone()),
                    message: format!("Committed {hash} but push failed: {e}"),
                })
            }
        }
    }

    /// Push a branch as-is. `force` is needed after a rebase rewrote it.
    pub async fn push(
        &self,
        repo_url: &str,
        branch_name: &str,
        token: Option<&str>,
        force: bool,
    ) -> Result<()> {
        let path = self.working_copy(repo_url)?;
        git::push(&path, branch_name, token, force).await
    }

    /// Check out `branch_name` and bring it level with origin.
    pub async fn sync_branch(
        &self,
        repo_url: &str,
        branch_name: &str,
        token: Option<&str>,
    ) -> Result<PathBuf> {
        let path = self.working_copy(repo_url)?;
        git::checkout(&path, branch_name).await?;
        git::fetch(&path, token).await?;
        git::fast_forward(&path).await?;
        Ok(path)
    }

    /// Rebase `branch_name` onto `onto_branch`, aborting on failure.
    pub async fn rebase(&self, repo_url: &str, branch_name: &str, onto_branch: &str) -> Result<String> {
        let path = self.working_copy(repo_url)?;
        let tip = git::rebase(&path, branch_name, onto_branch, &self.author).await?;
        tracing::info!(branch = %branch_name, onto = %onto_branch, tip = %tip, "Rebased branch");
        Ok(tip)
    }

    /// Check out and update `target`, then merge `source` into it.
    ///
    /// Conflicts are returned in the outcome with the merge left in progress.
    pub async fn merge(
        &self,
        repo_url: &str,
        source: &str,
        target: &str,
        fast_forward_only: bool,
        token: Option<&str>,
    ) -> Result<MergeOutcome> {
        let path = self.sync_branch(repo_url, target, token).await?;
        let outcome = git::merge(&path, source, fast_forward_only, &self.author).await?;
        if outcome.conflicts.is_empty() {
            tracing::info!(source = %source, target = %target, success = outcome.success, "Merge finished");
        } else {
            tracing::warn!(
                source = %source,
                target = %target,
                conflicts = outcome.conflicts.len(),
                "Merge produced conflicts"
            );
        }
        Ok(outcome)
    }

    /// Abandon a conflicted merge.
    pub async fn abort_merge(&self, repo_url: &str) -> Result<()> {
        let path = self.working_copy(repo_url)?;
        git::abort_merge(&path).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;
    use crate::workspace::testing::{commit_file, remote_tip, seeded_remote, TestRemote};
    use std::fs;

    fn sync_in(base: &Path) -> RepositorySync {
        RepositorySync::new(
            WorkspaceManager::new(&WorkspaceConfig {
                base_dir: base.to_path_buf(),
            }),
            &GitConfig::default(),
        )
    }

    async fn prepared(remote: &TestRemote) -> (tempfile::TempDir, RepositorySync, PathBuf) {
        let base = tempfile::tempdir().unwrap();
        let sync = sync_in(base.path());
        let (path, cloned) = sync.clone_or_pull(&remote.url, None, None).await.unwrap();
        assert!(cloned);
        (base, sync, path)
    }

    #[tokio::test]
    async fn test_clone_then_pull() {
        let remote = seeded_remote();
        let (base, sync, path) = prepared(&remote).await;
        assert_eq!(path, base.path().join("acme__widgets"));
        assert!(path.join("README.md").exists());

        let (again, cloned) = sync.clone_or_pull(&remote.url, None, None).await.unwrap();
        assert!(!cloned);
        assert_eq!(again, path);
    }

    #[tokio::test]
    async fn test_pull_picks_up_remote_commits() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;

        let other = tempfile::tempdir().unwrap();
        let other_path = other.path().join("other");
        git::clone(&remote.url, &other_path, None).await.unwrap();
        commit_file(&other_path, "upstream.txt", "new", "upstream change");
        git::push(&other_path, "main", None, false).await.unwrap();

        sync.clone_or_pull(&remote.url, None, None).await.unwrap();
        assert!(path.join("upstream.txt").exists());
    }

    #[tokio::test]
    async fn test_pull_discards_leftovers_from_earlier_run() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;
        git::create_branch(&path, "ticket/a", "main", false).await.unwrap();
        fs::write(path.join("leak.txt"), "half-finished").unwrap();
        fs::write(path.join("README.md"), "half-edited").unwrap();

        sync.clone_or_pull(&remote.url, None, None).await.unwrap();
        assert!(!path.join("leak.txt").exists());
        assert!(!git::has_changes(&path).await.unwrap());

        git::create_branch(&path, "ticket/b", "main", false).await.unwrap();
        fs::write(path.join("b.txt"), "b").unwrap();
        let outcome = sync
            .add_commit_and_push(&remote.url, "b work", "ticket/b", None)
            .await
            .unwrap();
        assert!(outcome.success);

        let repo = git2::Repository::open(&path).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(tree.get_name("b.txt").is_some());
        assert!(tree.get_name("leak.txt").is_none());
    }

    #[tokio::test]
    async fn test_dest_path_override() {
        let remote = seeded_remote();
        let base = tempfile::tempdir().unwrap();
        let sync = sync_in(base.path());
        let dest = base.path().join("custom").join("place");

        let (path, cloned) = sync
            .clone_or_pull(&remote.url, None, Some(&dest))
            .await
            .unwrap();
        assert!(cloned);
        assert_eq!(path, dest);
    }

    #[tokio::test]
    async fn test_add_commit_and_push_without_changes() {
        let remote = seeded_remote();
        let (_base, sync, _path) = prepared(&remote).await;
        let before = remote_tip(&remote, "main");

        let outcome = sync
            .add_commit_and_push(&remote.url, "noop", "main", None)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.commit_hash.is_none());
        assert_eq!(outcome.message, NOTHING_TO_COMMIT);
        assert_eq!(remote_tip(&remote, "main"), before);
    }

    #[tokio::test]
    async fn test_add_commit_and_push_publishes_commit() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;

        fs::write(path.join("feature.txt"), "done").unwrap();
        let outcome = sync
            .add_commit_and_push(&remote.url, "add feature", "main", None)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(remote_tip(&remote, "main"), outcome.commit_hash);
    }

    #[tokio::test]
    async fn test_push_failure_keeps_commit() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;
        fs::remove_dir_all(&remote.bare_path).unwrap();

        fs::write(path.join("feature.txt"), "done").unwrap();
        let outcome = sync
            .add_commit_and_push(&remote.url, "add feature", "main", None)
            .await
            .unwrap();
        assert!(!outcome.success);
        let hash = outcome.commit_hash.unwrap();
        let tip = git::last_commit(&path, "main").await.unwrap().unwrap();
        assert_eq!(tip.hash, hash);
        assert!(outcome.message.contains("push failed"));
    }

    #[tokio::test]
    async fn test_commit_requires_changes() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;

        assert!(sync
            .commit(&remote.url, "empty", "Someone", "someone@example.com")
            .await
            .is_err());

        fs::write(path.join("x.txt"), "x").unwrap();
        let hash = sync
            .commit(&remote.url, "x", "Someone", "someone@example.com")
            .await
            .unwrap();
        let tip = git::last_commit(&path, "main").await.unwrap().unwrap();
        assert_eq!(tip.hash, hash);
        assert_eq!(tip.author, "Someone");
    }

    #[tokio::test]
    async fn test_merge_into_default_branch() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;

        git::create_branch(&path, "ticket/abc", "main", false).await.unwrap();
        commit_file(&path, "fix.txt", "fixed", "fix");

        let outcome = sync
            .merge(&remote.url, "ticket/abc", "main", false, None)
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(git::current_branch(&path).await.unwrap(), "main");
        assert!(path.join("fix.txt").exists());
    }

    #[tokio::test]
    async fn test_sync_branch_catches_up_with_origin() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;
        git::create_branch(&path, "ticket/abc", "main", false).await.unwrap();

        let other = tempfile::tempdir().unwrap();
        let other_path = other.path().join("other");
        git::clone(&remote.url, &other_path, None).await.unwrap();
        commit_file(&other_path, "upstream.txt", "new", "upstream change");
        git::push(&other_path, "main", None, false).await.unwrap();

        sync.sync_branch(&remote.url, "main", None).await.unwrap();
        assert_eq!(git::current_branch(&path).await.unwrap(), "main");
        assert!(path.join("upstream.txt").exists());
    }

    #[tokio::test]
    async fn test_force_push_after_rebase() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;

        git::create_branch(&path, "ticket/abc", "main", false).await.unwrap();
        commit_file(&path, "fix.txt", "fixed", "fix");
        sync.push(&remote.url, "ticket/abc", None, false).await.unwrap();

        git::checkout(&path, "main").await.unwrap();
        commit_file(&path, "other.txt", "other", "other");
        sync.push(&remote.url, "main", None, false).await.unwrap();

        let tip = sync.rebase(&remote.url, "ticket/abc", "main").await.unwrap();
        assert!(sync.push(&remote.url, "ticket/abc", None, false).await.is_err());
        sync.push(&remote.url, "ticket/abc", None, true).await.unwrap();
        assert_eq!(remote_tip(&remote, "ticket/abc"), Some(tip));
    }

    #[tokio::test]
    async fn test_rebase_via_sync() {
        let remote = seeded_remote();
        let (_base, sync, path) = prepared(&remote).await;

        git::create_branch(&path, "ticket/abc", "main", false).await.unwrap();
        commit_file(&path, "fix.txt", "fixed", "fix");
        git::checkout(&path, "main").await.unwrap();
        commit_file(&path, "other.txt", "other", "other");

        let tip = sync.rebase(&remote.url, "ticket/abc", "main").await.unwrap();
        let info = git::last_commit(&path, "ticket/abc").await.unwrap().unwrap();
        assert_eq!(info.hash, tip);
        assert!(path.join("other.txt").exists());
    }
}
