pub mod branch;
pub mod git;
pub mod manager;
pub mod sync;

pub use branch::{BranchInfo, BranchManager};
pub use git::{Author, CommitInfo, MergeOutcome};
pub use manager::WorkspaceManager;
pub use sync::{PushOutcome, RepositorySync};

/// Fixtures for tests that need real repositories with a reachable remote.
#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};

    use git2::{Repository, RepositoryInitOptions, Signature};
    use tempfile::TempDir;

    use super::git::Author;

    /// A bare repository at `<tmp>/acme/widgets.git` with one commit on `main`.
    pub struct TestRemote {
        pub dir: TempDir,
        pub bare_path: PathBuf,
        pub url: String,
    }

    pub fn test_author() -> Author {
        Author {
            name: "Test Bot".to_string(),
            email: "bot@example.com".to_string(),
        }
    }

    pub fn seeded_remote() -> TestRemote {
        let dir = tempfile::tempdir().unwrap();
        let bare_path = dir.path().join("acme").join("widgets.git");
        let mut bare_opts = RepositoryInitOptions::new();
        bare_opts.bare(true).initial_head("main");
        Repository::init_opts(&bare_path, &bare_opts).unwrap();
        let url = format!("file://{}", bare_path.display());

        let seed_path = dir.path().join("seed");
        let mut seed_opts = RepositoryInitOptions::new();
        seed_opts.initial_head("main");
        let seed = Repository::init_opts(&seed_path, &seed_opts).unwrap();
        commit_file(&seed_path, "README.md", "hello\n", "initial commit");

        let mut remote = seed.remote("origin", &url).unwrap();
        remote
            .push(&["refs/heads/main:refs/heads/main"], None)
            .unwrap();

        TestRemote {
            dir,
            bare_path,
            url,
        }
    }

    /// Write a file and commit it on whatever branch is checked out.
    pub fn commit_file(repo_path: &Path, name: &str, content: &str, message: &str) -> String {
        let repo = Repository::open(repo_path).unwrap();
        std::fs::write(repo_path.join(name), content).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

        let sig = Signature::now("Test Bot", "bot@example.com").unwrap();
        let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
            .to_string()
    }

    /// Tip of `branch` in the bare remote, if present.
    pub fn remote_tip(remote: &TestRemote, branch: &str) -> Option<String> {
        let repo = Repository::open_bare(&remote.bare_path).unwrap();
        let reference = repo.find_reference(&format!("refs/heads/{branch}")).ok()?;
        reference.target().map(|oid| oid.to_string())
    }
}
