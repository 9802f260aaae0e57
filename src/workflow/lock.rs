use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes work on a repository's working copy.
///
/// Every ticket branch of a repository lives in the same checkout, so the
/// key is the checkout's path: holding it also serializes each
/// (repository, branch) pair, however the repository URL is spelled.
#[derive(Debug, Clone, Default)]
pub struct WorkingCopyLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

/// Held for as long as the working copy is in use.
#[derive(Debug)]
pub struct WorkingCopyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl WorkingCopyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder uses the working copy at `working_copy`.
    pub async fn acquire(&self, working_copy: &Path, branch_name: &str) -> WorkingCopyGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Forget locks nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(working_copy.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        if lock.try_lock().is_err() {
            tracing::info!(
                working_copy = %working_copy.display(),
                branch = %branch_name,
                "Waiting for working copy"
            );
        }
        WorkingCopyGuard {
            _guard: lock.lock_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;
    use crate::workspace::WorkspaceManager;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_working_copy_is_serialized() {
        let locks = WorkingCopyLocks::new();
        let first = locks.acquire(Path::new("/work/acme__r"), "ticket/a").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(Path::new("/work/acme__r"), "ticket/b").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_working_copies_do_not_block() {
        let locks = WorkingCopyLocks::new();
        let _a = locks.acquire(Path::new("/work/acme__a"), "ticket/a").await;
        tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire(Path::new("/work/acme__b"), "ticket/a"),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_url_spellings_of_one_repository_share_a_lock() {
        let workspace = WorkspaceManager::new(&WorkspaceConfig {
            base_dir: PathBuf::from("/work"),
        });
        let with_suffix = workspace.path_for("https://github.com/acme/widgets.git").unwrap();
        let without_suffix = workspace.path_for("https://github.com/acme/widgets").unwrap();

        let locks = WorkingCopyLocks::new();
        let first = locks.acquire(&with_suffix, "ticket/a").await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(&without_suffix, "ticket/b").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
