use std::path::{Component, Path, PathBuf};

use crate::agent::{ChangeAction, FileChange};
use crate::config::WorkspaceConfig;
use crate::error::{AppError, Result};

/// Maps repositories to working-copy directories and guards file access inside them.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            base_dir: config.base_dir.clone(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Conventional working-copy path: `<base_dir>/<owner>__<repo>`.
    pub fn path_for(&self, repo_url: &str) -> Result<PathBuf> {
        let (owner, repo) = owner_and_repo(repo_url)?;
        Ok(self.base_dir.join(format!("{owner}__{repo}")))
    }

    /// Make sure the parent directory of a working copy exists.
    pub async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to create workspace dir: {e}")))?;
        }
        Ok(())
    }

    /// Remove a working copy from disk.
    pub async fn cleanup(&self, path: &Path) -> Result<()> {
        if path.exists() {
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to cleanup workspace: {e}")))?;
        }
        Ok(())
    }

    /// Write proposed changes into the working copy.
    ///
    /// Applying the same change twice is harmless: writes overwrite and deletes
    /// of missing files are skipped. Returns the paths that were touched.
    pub async fn apply_changes(workspace_root: &Path, changes: &[FileChange]) -> Result<Vec<String>> {
        let mut touched = Vec::with_capacity(changes.len());
        for change in changes {
            if is_git_internal(&change.path) {
                return Err(AppError::Workspace(format!(
                    "Refusing to modify git metadata: {}",
                    change.path
                )));
            }
            let full_path = Self::verify_path(workspace_root, Path::new(&change.path))?;
            match &change.action {
                ChangeAction::Write { content } => {
                    tokio::fs::write(&full_path, content).await.map_err(|e| {
                        AppError::Workspace(format!("Failed to write {}: {e}", change.path))
                    })?;
                }
                ChangeAction::Delete => {
                    if full_path.is_file() {
                        tokio::fs::remove_file(&full_path).await.map_err(|e| {
                            AppError::Workspace(format!("Failed to delete {}: {e}", change.path))
                        })?;
                    }
                }
            }
            touched.push(change.path.clone());
        }
        Ok(touched)
    }

    /// Verify a path is within the workspace (path traversal protection).
    pub fn verify_path(workspace_root: &Path, requested_path: &Path) -> Result<PathBuf> {
        if requested_path.is_absolute() {
            return Err(AppError::Workspace(format!(
                "Absolute paths are not allowed: {}",
                requested_path.display()
            )));
        }

        let full_path = workspace_root.join(requested_path);

        // Canonicalize to resolve .. and symlinks
        // If the file doesn't exist yet, canonicalize the parent
        let canonical = if full_path.exists() {
            full_path.canonicalize()
        } else {
            let parent = full_path
                .parent()
                .ok_or_else(|| AppError::Workspace("Invalid file path".to_string()))?;

            // Reject before creating anything outside the root.
            if requested_path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
            {
                return Err(AppError::Workspace(format!(
                    "Path traversal detected: {} is outside workspace",
                    requested_path.display()
                )));
            }

            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Workspace(format!("Failed to create directory: {e}")))?;
            }

            let canonical_parent = parent
                .canonicalize()
                .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

            let file_name = full_path
                .file_name()
                .ok_or_else(|| AppError::Workspace("Invalid file name".to_string()))?;

            Ok(canonical_parent.join(file_name))
        }
        .map_err(|e| AppError::Workspace(format!("Failed to resolve path: {e}")))?;

        let canonical_root = workspace_root
            .canonicalize()
            .map_err(|e| AppError::Workspace(format!("Failed to resolve workspace root: {e}")))?;

        if !canonical.starts_with(&canonical_root) {
            return Err(AppError::Workspace(format!(
                "Path traversal detected: {} is outside workspace",
                requested_path.display()
            )));
        }

        Ok(canonical)
    }
}

pub(crate) fn is_git_internal(path: &str) -> bool {
    Path::new(path)
        .components()
        .any(|c| c.as_os_str() == ".git")
}

/// Extract `(owner, repo)` from the last two path segments of a remote URL.
pub fn owner_and_repo(repo_url: &str) -> Result<(String, String)> {
    let trimmed = repo_url.trim_end_matches('/');
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let mut segments = without_scheme
        .rsplit(|c: char| c == '/' || c == ':')
        .filter(|s| !s.is_empty());

    let repo = segments
        .next()
        .map(|s| s.trim_end_matches(".git"))
        .filter(|s| !s.is_empty());
    let owner = segments.next();

    match (owner, repo) {
        (Some(owner), Some(repo)) if is_safe_segment(owner) && is_safe_segment(repo) => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(AppError::Workspace(format!(
            "Cannot derive owner/repo from URL: {repo_url}"
        ))),
    }
}

fn is_safe_segment(segment: &str) -> bool {
    segment != "." && segment != ".." && !segment.contains('@')
}
