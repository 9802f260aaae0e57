use std::path::Path;

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    BranchType, Commit, Cred, FetchOptions, IndexAddOption, PushOptions, Reference,
    RemoteCallbacks, Repository, ResetType, Signature, StatusOptions,
};
use serde::Serialize;

use crate::error::{AppError, Result};

/// Identity used for commits the engine writes.
#[derive(Debug, Clone)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    fn signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now(&self.name, &self.email)?)
    }
}

/// Summary of a single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub summary: String,
    pub author: String,
    pub timestamp: i64,
}

/// Result of merging one branch into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub success: bool,
    /// Paths left conflicted in the index; the merge is still in progress when non-empty.
    pub conflicts: Vec<String>,
    pub commit_hash: Option<String>,
    pub message: String,
}

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Git("Branch name is empty".to_string()));
    }
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    Ok(())
}

/// Tokens only ever travel over HTTPS; local `file://` remotes are accepted without one.
fn validate_remote_url(url: &str, token: Option<&str>) -> Result<()> {
    if url.starts_with("https://") {
        return Ok(());
    }
    if token.is_none() && (url.starts_with("file://") || Path::new(url).is_absolute()) {
        return Ok(());
    }
    Err(AppError::Git(format!("Expected HTTPS clone URL, got: {url}")))
}

/// Credentials are supplied per call through the callback and never written to `.git/config`.
fn make_callbacks(token: Option<&str>) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(token) = token {
        callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
            Cred::userpass_plaintext("x-access-token", token)
        });
    }
    callbacks
}

fn make_fetch_options(token: Option<&str>) -> FetchOptions<'_> {
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(make_callbacks(token));
    opts
}

fn make_push_options(token: Option<&str>) -> PushOptions<'_> {
    let mut opts = PushOptions::new();
    opts.remote_callbacks(make_callbacks(token));
    opts
}

async fn blocking<T, F>(label: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Git(format!("{label} task panicked: {e}")))?
}

/// Resolve a branch name to its reference: local branch first, then `origin/<name>`.
fn resolve_branch_ref<'r>(repo: &'r Repository, name: &str) -> Result<Reference<'r>> {
    if let Ok(branch) = repo.find_branch(name, BranchType::Local) {
        return Ok(branch.into_reference());
    }
    if let Ok(branch) = repo.find_branch(&format!("origin/{name}"), BranchType::Remote) {
        return Ok(branch.into_reference());
    }
    Err(AppError::BranchNotFound(name.to_string()))
}

fn resolve_branch_commit<'r>(repo: &'r Repository, name: &str) -> Result<Commit<'r>> {
    let commit = resolve_branch_ref(repo, name)?.peel_to_commit()?;
    Ok(commit)
}

fn checkout_branch_in(repo: &Repository, branch_name: &str) -> Result<()> {
    let refname = format!("refs/heads/{branch_name}");
    let obj = repo.revparse_single(&refname)?;
    repo.checkout_tree(&obj, Some(CheckoutBuilder::new().safe()))?;
    repo.set_head(&refname)?;
    Ok(())
}

fn to_commit_info(commit: &Commit<'_>) -> CommitInfo {
    CommitInfo {
        hash: commit.id().to_string(),
        summary: commit.summary().unwrap_or_default().to_string(),
        author: commit.author().name().unwrap_or_default().to_string(),
        timestamp: commit.time().seconds(),
    }
}

/// Clone a repository into the target directory.
///
/// The remote URL stored in `.git/config` will be the **plain** URL
/// (no credentials). Authentication is handled via credential callback only.
pub async fn clone(url: &str, target: &Path, token: Option<&str>) -> Result<()> {
    validate_remote_url(url, token)?;

    let url = url.to_string();
    let target = target.to_path_buf();
    let token = token.map(str::to_string);

    blocking("Clone", move || {
        let fetch_opts = make_fetch_options(token.as_deref());
        RepoBuilder::new()
            .fetch_options(fetch_opts)
            .clone(&url, &target)?;
        Ok(())
    })
    .await
}

/// Fetch every branch from origin into `refs/remotes/origin/*`.
pub async fn fetch(dir: &Path, token: Option<&str>) -> Result<()> {
    let dir = dir.to_path_buf();
    let token = token.map(str::to_string);

    blocking("Fetch", move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        let mut fetch_opts = make_fetch_options(token.as_deref());
        remote.fetch(
            &["+refs/heads/*:refs/remotes/origin/*"],
            Some(&mut fetch_opts),
            None,
        )?;
        Ok(())
    })
    .await
}

/// Fast-forward the checked-out branch to `origin/<branch>`.
///
/// Returns `true` if HEAD moved. Missing remote branches are not an error;
/// diverged histories are.
pub async fn fast_forward(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    blocking("Fast-forward", move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?;
        let branch = head
            .shorthand()
            .filter(|_| head.is_branch())
            .ok_or_else(|| AppError::Git("Cannot pull on a detached HEAD".to_string()))?
            .to_string();

        let remote_ref = match repo.find_reference(&format!("refs/remotes/origin/{branch}")) {
            Ok(r) => r,
            Err(_) => {
                tracing::debug!(branch = %branch, "No remote branch to pull from");
                return Ok(false);
            }
        };
        let incoming = repo.reference_to_annotated_commit(&remote_ref)?;
        let (analysis, _) = repo.merge_analysis(&[&incoming])?;

        if analysis.is_up_to_date() {
            return Ok(false);
        }
        if analysis.is_fast_forward() {
            let refname = format!("refs/heads/{branch}");
            let mut local = repo.find_reference(&refname)?;
            local.set_target(incoming.id(), "autodev: fast-forward")?;
            repo.set_head(&refname)?;
            repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
            return Ok(true);
        }
        Err(AppError::Git(format!(
            "Local branch {branch} has diverged from origin/{branch}"
        )))
    })
    .await
}

/// Check whether a branch exists locally or on origin.
pub async fn branch_exists(dir: &Path, branch_name: &str) -> Result<bool> {
    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    blocking("Branch-exists", move || {
        let repo = Repository::open(&dir)?;
        let local = repo.find_branch(&branch_name, BranchType::Local).is_ok();
        let remote = repo
            .find_branch(&format!("origin/{branch_name}"), BranchType::Remote)
            .is_ok();
        Ok(local || remote)
    })
    .await
}

/// Create `branch_name` from `base` and check it out.
///
/// With `force`, an existing branch is deleted first so the new one starts
/// from `base` with none of its previous commits.
pub async fn create_branch(dir: &Path, branch_name: &str, base: &str, force: bool) -> Result<()> {
    validate_branch_name(branch_name)?;
    validate_branch_name(base)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let base = base.to_string();

    blocking("Create-branch", move || {
        let repo = Repository::open(&dir)?;
        let base_commit = resolve_branch_commit(&repo, &base)?;

        if let Ok(mut existing) = repo.find_branch(&branch_name, BranchType::Local) {
            if !force {
                return Err(AppError::BranchConflict(branch_name));
            }
            if existing.is_head() {
                // Detach at the old tip so its files are the checkout baseline.
                let tip = existing.get().peel_to_commit()?;
                repo.set_head_detached(tip.id())?;
            }
            existing.delete()?;
        }

        repo.branch(&branch_name, &base_commit, false)?;
        let obj = repo.revparse_single(&format!("refs/heads/{branch_name}"))?;
        repo.checkout_tree(&obj, Some(CheckoutBuilder::default().force()))?;
        repo.set_head(&format!("refs/heads/{branch_name}"))?;
        Ok(())
    })
    .await
}

/// Checkout an existing branch, creating the local branch from `origin/<name>` if needed.
pub async fn checkout(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    blocking("Checkout", move || {
        let repo = Repository::open(&dir)?;
        if repo.find_branch(&branch_name, BranchType::Local).is_err() {
            let remote = repo
                .find_branch(&format!("origin/{branch_name}"), BranchType::Remote)
                .map_err(|_| AppError::BranchNotFound(branch_name.clone()))?;
            let commit = remote.get().peel_to_commit()?;
            let mut local = repo.branch(&branch_name, &commit, false)?;
            local.set_upstream(Some(&format!("origin/{branch_name}")))?;
        }
        checkout_branch_in(&repo, &branch_name)
    })
    .await
}

/// Local branch names, sorted.
pub async fn list_branches(dir: &Path) -> Result<Vec<String>> {
    let dir = dir.to_path_buf();

    blocking("List-branches", move || {
        let repo = Repository::open(&dir)?;
        let mut names = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    })
    .await
}

/// Name of the checked-out branch (errors on detached HEAD).
pub async fn current_branch(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    blocking("Current-branch", move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?;
        if !head.is_branch() {
            return Err(AppError::Git("HEAD is detached".to_string()));
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| AppError::Git("HEAD name is not valid UTF-8".to_string()))
    })
    .await
}

/// Tip commit of a branch, or `None` if the branch does not exist.
pub async fn last_commit(dir: &Path, branch_name: &str) -> Result<Option<CommitInfo>> {
    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    blocking("Last-commit", move || {
        let repo = Repository::open(&dir)?;
        let info = match resolve_branch_commit(&repo, &branch_name) {
            Ok(commit) => Some(to_commit_info(&commit)),
            Err(AppError::BranchNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(info)
    })
    .await
}

/// Stage all changes, including deletions.
pub async fn add_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    blocking("Add-all", move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    })
    .await
}

/// Check if there are any staged or unstaged changes (ignored files excluded).
pub async fn has_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    blocking("Has-changes", move || {
        let repo = Repository::open(&dir)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    })
    .await
}

/// Check whether the index differs from HEAD.
pub async fn has_staged_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    blocking("Has-staged-changes", move || {
        let repo = Repository::open(&dir)?;
        let index = repo.index()?;
        let head_tree = match repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(_) => None,
        };
        let diff = repo.diff_tree_to_index(head_tree.as_ref(), Some(&index), None)?;
        Ok(diff.deltas().len() > 0)
    })
    .await
}

/// Commit the index and return the new commit hash.
pub async fn commit(dir: &Path, message: &str, author: &Author) -> Result<String> {
    let dir = dir.to_path_buf();
    let message = message.to_string();
    let author = author.clone();

    blocking("Commit", move || {
        let repo = Repository::open(&dir)?;
        let sig = author.signature()?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;
        Ok(oid.to_string())
    })
    .await
}

/// Push a branch to origin. `force` overwrites a diverged remote branch.
pub async fn push(dir: &Path, branch_name: &str, token: Option<&str>, force: bool) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let token = token.map(str::to_string);

    blocking("Push", move || {
        let repo = Repository::open(&dir)?;
        let mut remote = repo.find_remote("origin")?;
        if let Some(url) = remote.url() {
            validate_remote_url(url, token.as_deref())?;
        }
        let prefix = if force { "+" } else { "" };
        let refspec = format!("{prefix}refs/heads/{branch_name}:refs/heads/{branch_name}");
        let mut push_opts = make_push_options(token.as_deref());
        remote.push(&[&refspec], Some(&mut push_opts))?;
        Ok(())
    })
    .await
}

/// Rebase `branch_name` onto `onto` and return the new tip.
///
/// On success the branch points at the rebased tip and is checked out. Any
/// failure aborts the rebase before the error is returned, so the working
/// copy is never left mid-rebase.
pub async fn rebase(dir: &Path, branch_name: &str, onto: &str, author: &Author) -> Result<String> {
    validate_branch_name(branch_name)?;
    validate_branch_name(onto)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();
    let onto = onto.to_string();
    let author = author.clone();

    blocking("Rebase", move || {
        let repo = Repository::open(&dir)?;
        checkout_branch_in(&repo, &branch_name)?;

        let refname = format!("refs/heads/{branch_name}");
        let branch_ref = repo.find_reference(&refname)?;
        let onto_ref = resolve_branch_ref(&repo, &onto)?;

        // Annotated from references so finishing moves the branch, not a detached HEAD.
        let branch_annotated = repo.reference_to_annotated_commit(&branch_ref)?;
        let onto_annotated = repo.reference_to_annotated_commit(&onto_ref)?;

        let mut rebase = repo.rebase(Some(&branch_annotated), Some(&onto_annotated), None, None)?;
        let sig = author.signature()?;

        let applied: Result<()> = (|| {
            while let Some(op) = rebase.next() {
                op?;
                if repo.index()?.has_conflicts() {
                    return Err(AppError::Git(format!(
                        "Rebase of {branch_name} onto {onto} hit conflicts"
                    )));
                }
                match rebase.commit(None, &sig, None) {
                    Ok(_) => {}
                    // Patch already upstream.
                    Err(e) if e.code() == git2::ErrorCode::Applied => {}
                    Err(e) => return Err(e.into()),
                }
            }
            rebase.finish(Some(&sig))?;
            Ok(())
        })();

        if let Err(e) = applied {
            tracing::warn!(branch = %branch_name, onto = %onto, error = %e, "Aborting rebase");
            rebase.abort()?;
            return Err(e);
        }

        let tip = repo.head()?.peel_to_commit()?.id();
        repo.reference(&refname, tip, true, "autodev: rebase finished")?;
        repo.set_head(&refname)?;
        Ok(tip.to_string())
    })
    .await
}

/// Merge `source` into the checked-out branch.
///
/// Conflicts are reported, not raised: the merge is left in progress so the
/// caller can resolve it or call [`abort_merge`].
pub async fn merge(
    dir: &Path,
    source: &str,
    fast_forward_only: bool,
    author: &Author,
) -> Result<MergeOutcome> {
    validate_branch_name(source)?;

    let dir = dir.to_path_buf();
    let source = source.to_string();
    let author = author.clone();

    blocking("Merge", move || {
        let repo = Repository::open(&dir)?;
        let source_commit = resolve_branch_commit(&repo, &source)?;
        let annotated = repo.find_annotated_commit(source_commit.id())?;
        let (analysis, _) = repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome {
                success: true,
                conflicts: Vec::new(),
                commit_hash: None,
                message: "Already up to date".to_string(),
            });
        }

        let mut head_ref = repo.head()?;
        if analysis.is_fast_forward() {
            head_ref.set_target(source_commit.id(), &format!("autodev: fast-forward {source}"))?;
            repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
            return Ok(MergeOutcome {
                success: true,
                conflicts: Vec::new(),
                commit_hash: Some(source_commit.id().to_string()),
                message: "Fast-forwarded".to_string(),
            });
        }

        if fast_forward_only {
            return Ok(MergeOutcome {
                success: false,
                conflicts: Vec::new(),
                commit_hash: None,
                message: format!("Cannot fast-forward to {source}"),
            });
        }

        repo.merge(&[&annotated], None, None)?;
        let mut index = repo.index()?;

        if index.has_conflicts() {
            let mut conflicts = Vec::new();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
                if let Some(entry) = entry {
                    let path = String::from_utf8_lossy(&entry.path).to_string();
                    if !conflicts.contains(&path) {
                        conflicts.push(path);
                    }
                }
            }
            conflicts.sort();
            return Ok(MergeOutcome {
                success: false,
                message: format!("Merge of {source} has {} conflicting path(s)", conflicts.len()),
                conflicts,
                commit_hash: None,
            });
        }

        let tree = repo.find_tree(index.write_tree()?)?;
        let head_commit = head_ref.peel_to_commit()?;
        let target_name = head_ref.shorthand().unwrap_or("HEAD").to_string();
        let sig = author.signature()?;
        let oid = repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("Merge branch '{source}' into {target_name}"),
            &tree,
            &[&head_commit, &source_commit],
        )?;
        repo.cleanup_state()?;

        Ok(MergeOutcome {
            success: true,
            conflicts: Vec::new(),
            commit_hash: Some(oid.to_string()),
            message: "Merged".to_string(),
        })
    })
    .await
}

/// Throw away everything not committed on the checked-out branch: staged and
/// unstaged edits, untracked files, and any interrupted merge or rebase.
/// Ignored files are kept.
pub async fn reset_clean(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    blocking("Reset-clean", move || {
        let repo = Repository::open(&dir)?;
        repo.cleanup_state()?;
        let head = repo.head()?.peel_to_commit()?;
        repo.reset(head.as_object(), ResetType::Hard, None)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        let untracked: Vec<String> = statuses
            .iter()
            .filter(|entry| entry.status().is_wt_new())
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect();
        drop(statuses);

        for relative in untracked {
            let path = dir.join(&relative);
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            removed.map_err(|e| {
                AppError::Workspace(format!("Failed to remove untracked {relative}: {e}"))
            })?;
        }
        Ok(())
    })
    .await
}

/// Abandon an in-progress merge and restore HEAD.
pub async fn abort_merge(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    blocking("Abort-merge", move || {
        let repo = Repository::open(&dir)?;
        repo.cleanup_state()?;
        let head = repo.head()?.peel_to_commit()?;
        repo.reset(head.as_object(), ResetType::Hard, None)?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::testing::{commit_file, seeded_remote, test_author};
    use std::fs;

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
        assert!(validate_branch_name("").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_normal() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feature/my-branch").is_ok());
        assert!(validate_branch_name("ticket/abc12345-fix-login-bug").is_ok());
    }

    #[test]
    fn test_remote_url_rules() {
        assert!(validate_remote_url("https://github.com/a/b.git", Some("t")).is_ok());
        assert!(validate_remote_url("file:///tmp/remote.git", None).is_ok());
        assert!(validate_remote_url("file:///tmp/remote.git", Some("t")).is_err());
        assert!(validate_remote_url("git@github.com:owner/repo.git", None).is_err());
    }

    #[tokio::test]
    async fn test_clone_rejects_ssh_url() {
        let err = clone("git@github.com:owner/repo.git", Path::new("/tmp/test"), Some("token"))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("Expected HTTPS clone URL"));
    }

    #[tokio::test]
    async fn test_has_changes_tracks_new_files() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        assert!(!has_changes(&path).await.unwrap());
        fs::write(path.join("hello.txt"), "world").unwrap();
        assert!(has_changes(&path).await.unwrap());
        assert!(!has_staged_changes(&path).await.unwrap());

        add_all(&path).await.unwrap();
        assert!(has_staged_changes(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_all_stages_deletions() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        fs::remove_file(path.join("README.md")).unwrap();
        add_all(&path).await.unwrap();
        assert!(has_staged_changes(&path).await.unwrap());
        commit(&path, "remove readme", &test_author()).await.unwrap();
        assert!(!has_changes(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_push_and_fast_forward() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let a = work.path().join("a");
        let b = work.path().join("b");
        clone(&remote.url, &a, None).await.unwrap();
        clone(&remote.url, &b, None).await.unwrap();

        fs::write(a.join("new.txt"), "from a").unwrap();
        add_all(&a).await.unwrap();
        let hash = commit(&a, "add new", &test_author()).await.unwrap();
        push(&a, "main", None, false).await.unwrap();

        fetch(&b, None).await.unwrap();
        assert!(fast_forward(&b).await.unwrap());
        assert_eq!(fs::read_to_string(b.join("new.txt")).unwrap(), "from a");
        let tip = last_commit(&b, "main").await.unwrap().unwrap();
        assert_eq!(tip.hash, hash);
        assert!(!fast_forward(&b).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_branch_conflict_and_force() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        create_branch(&path, "feature", "main", false).await.unwrap();
        commit_file(&path, "feature.txt", "work", "feature work");
        assert_eq!(current_branch(&path).await.unwrap(), "feature");

        let err = create_branch(&path, "feature", "main", false).await.unwrap_err();
        assert!(matches!(err, AppError::BranchConflict(_)));

        create_branch(&path, "feature", "main", true).await.unwrap();
        let main_tip = last_commit(&path, "main").await.unwrap().unwrap();
        let feature_tip = last_commit(&path, "feature").await.unwrap().unwrap();
        assert_eq!(main_tip.hash, feature_tip.hash);
        assert!(!path.join("feature.txt").exists());
    }

    #[tokio::test]
    async fn test_checkout_missing_branch_is_not_found() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        let err = checkout(&path, "nope").await.unwrap_err();
        assert!(matches!(err, AppError::BranchNotFound(_)));
    }

    #[tokio::test]
    async fn test_reset_clean_discards_leftovers() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        fs::write(path.join("README.md"), "edited").unwrap();
        fs::write(path.join("stray.txt"), "left behind").unwrap();
        fs::create_dir_all(path.join("scratch/deep")).unwrap();
        fs::write(path.join("scratch/deep/out.log"), "log").unwrap();
        add_all(&path).await.unwrap();
        fs::write(path.join("unstaged.txt"), "never added").unwrap();

        reset_clean(&path).await.unwrap();
        assert!(!has_changes(&path).await.unwrap());
        assert!(!path.join("stray.txt").exists());
        assert!(!path.join("unstaged.txt").exists());
        assert!(!path.join("scratch").exists());
        assert_ne!(fs::read_to_string(path.join("README.md")).unwrap(), "edited");
        assert_eq!(current_branch(&path).await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_rebase_replays_branch_onto_main() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        create_branch(&path, "feature", "main", false).await.unwrap();
        commit_file(&path, "feature.txt", "feature", "feature commit");
        checkout(&path, "main").await.unwrap();
        commit_file(&path, "main.txt", "main", "main commit");

        let tip = rebase(&path, "feature", "main", &test_author()).await.unwrap();
        assert_eq!(current_branch(&path).await.unwrap(), "feature");
        assert!(path.join("main.txt").exists());
        assert!(path.join("feature.txt").exists());

        let repo = Repository::open(&path).unwrap();
        let branch_tip = repo
            .find_branch("feature", BranchType::Local)
            .unwrap()
            .get()
            .target()
            .unwrap();
        assert_eq!(branch_tip.to_string(), tip);
        let main_tip = repo.revparse_single("main").unwrap().id();
        let rebased = repo.find_commit(branch_tip).unwrap();
        assert_eq!(rebased.parent_id(0).unwrap(), main_tip);
    }

    #[tokio::test]
    async fn test_commit_after_rebase_lands_on_branch() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        create_branch(&path, "feature", "main", false).await.unwrap();
        commit_file(&path, "feature.txt", "feature", "feature commit");
        checkout(&path, "main").await.unwrap();
        commit_file(&path, "main.txt", "main", "main commit");
        rebase(&path, "feature", "main", &test_author()).await.unwrap();

        std::fs::write(path.join("next.txt"), "next").unwrap();
        add_all(&path).await.unwrap();
        let hash = commit(&path, "next", &test_author()).await.unwrap();
        let info = last_commit(&path, "feature").await.unwrap().unwrap();
        assert_eq!(info.hash, hash);
    }

    #[tokio::test]
    async fn test_rebase_conflict_is_aborted() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        create_branch(&path, "feature", "main", false).await.unwrap();
        commit_file(&path, "README.md", "feature side", "feature edit");
        checkout(&path, "main").await.unwrap();
        commit_file(&path, "README.md", "main side", "main edit");

        assert!(rebase(&path, "feature", "main", &test_author()).await.is_err());
        let repo = Repository::open(&path).unwrap();
        assert_eq!(repo.state(), git2::RepositoryState::Clean);
    }

    #[tokio::test]
    async fn test_merge_reports_conflicts_as_data() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        create_branch(&path, "feature", "main", false).await.unwrap();
        commit_file(&path, "README.md", "feature side", "feature edit");
        checkout(&path, "main").await.unwrap();
        commit_file(&path, "README.md", "main side", "main edit");

        let outcome = merge(&path, "feature", false, &test_author()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.conflicts, vec!["README.md".to_string()]);

        abort_merge(&path).await.unwrap();
        let repo = Repository::open(&path).unwrap();
        assert_eq!(repo.state(), git2::RepositoryState::Clean);
        assert_eq!(fs::read_to_string(path.join("README.md")).unwrap(), "main side");
    }

    #[tokio::test]
    async fn test_merge_fast_forward_only_refuses_divergence() {
        let remote = seeded_remote();
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("wc");
        clone(&remote.url, &path, None).await.unwrap();

        create_branch(&path, "feature", "main", false).await.unwrap();
        commit_file(&path, "feature.txt", "f", "feature commit");
        checkout(&path, "main").await.unwrap();
        commit_file(&path, "main.txt", "m", "main commit");

        let outcome = merge(&path, "feature", true, &test_author()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.conflicts.is_empty());

        let outcome = merge(&path, "feature", false, &test_author()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.commit_hash.is_some());
        assert!(path.join("feature.txt").exists());
    }
}
