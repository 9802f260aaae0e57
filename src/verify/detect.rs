//! Discovery of a project's test command from well-known manifest files.

use std::path::Path;

use crate::error::Result;

/// A test command to run from the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    /// Short name used in logs and result summaries.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
}

impl TestCommand {
    fn new(label: &str, program: &str, args: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// A configured shell command line, run through `sh -c`.
    pub fn shell(command_line: &str) -> Self {
        Self {
            label: command_line.to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), command_line.to_string()],
        }
    }
}

/// Find the test command for a working copy. First match wins:
///
/// 1. pytest (`pytest.ini`, `conftest.py`, `tox.ini`, or `pyproject.toml` with `[tool.pytest`)
/// 2. `npm test` (`package.json` with a `test` script)
/// 3. `cargo test` (`Cargo.toml`)
/// 4. `go test ./...` (`go.mod`)
/// 5. `make test` (`Makefile` with a `test:` target)
pub async fn detect(repo_path: &Path) -> Result<Option<TestCommand>> {
    if has_pytest_config(repo_path).await? {
        return Ok(Some(TestCommand::new("pytest", "pytest", &[])));
    }
    if has_npm_test_script(repo_path).await? {
        return Ok(Some(TestCommand::new("npm test", "npm", &["test"])));
    }
    if repo_path.join("Cargo.toml").is_file() {
        return Ok(Some(TestCommand::new("cargo test", "cargo", &["test"])));
    }
    if repo_path.join("go.mod").is_file() {
        return Ok(Some(TestCommand::new("go test", "go", &["test", "./..."])));
    }
    if has_make_test_target(repo_path).await? {
        return Ok(Some(TestCommand::new("make test", "make", &["test"])));
    }
    Ok(None)
}

async fn has_pytest_config(repo_path: &Path) -> Result<bool> {
    if ["pytest.ini", "conftest.py", "tox.ini"]
        .iter()
        .any(|f| repo_path.join(f).is_file())
    {
        return Ok(true);
    }
    Ok(read_optional(&repo_path.join("pyproject.toml"))
        .await?
        .is_some_and(|content| content.contains("[tool.pytest")))
}

async fn has_npm_test_script(repo_path: &Path) -> Result<bool> {
    let Some(content) = read_optional(&repo_path.join("package.json")).await? else {
        return Ok(false);
    };
    // An unparseable manifest is treated as having no test script.
    let manifest: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unparseable package.json");
            return Ok(false);
        }
    };
    Ok(manifest["scripts"]["test"]
        .as_str()
        .is_some_and(|script| !script.trim().is_empty()))
}

async fn has_make_test_target(repo_path: &Path) -> Result<bool> {
    Ok(read_optional(&repo_path.join("Makefile"))
        .await?
        .is_some_and(|content| content.lines().any(|line| line.starts_with("test:"))))
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    async fn detected(files: &[(&str, &str)]) -> Option<String> {
        let tmp = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(tmp.path().join(name), content).unwrap();
        }
        detect(tmp.path()).await.unwrap().map(|c| c.label)
    }

    #[tokio::test]
    async fn test_nothing_detected_in_empty_repo() {
        assert_eq!(detected(&[("README.md", "hi")]).await, None);
    }

    #[tokio::test]
    async fn test_pyproject_needs_pytest_section() {
        assert_eq!(
            detected(&[("pyproject.toml", "[project]\nname = \"x\"\n")]).await,
            None
        );
        assert_eq!(
            detected(&[("pyproject.toml", "[tool.pytest.ini_options]\n")]).await,
            Some("pytest".to_string())
        );
    }

    #[tokio::test]
    async fn test_package_json_needs_test_script() {
        assert_eq!(
            detected(&[("package.json", r#"{"scripts": {"build": "tsc"}}"#)]).await,
            None
        );
        assert_eq!(
            detected(&[("package.json", r#"{"scripts": {"test": "jest"}}"#)]).await,
            Some("npm test".to_string())
        );
        assert_eq!(detected(&[("package.json", "{not json")]).await, None);
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        assert_eq!(
            detected(&[
                ("conftest.py", ""),
                ("package.json", r#"{"scripts": {"test": "jest"}}"#),
                ("Cargo.toml", "[package]"),
            ])
            .await,
            Some("pytest".to_string())
        );
        assert_eq!(
            detected(&[("go.mod", "module x"), ("Makefile", "test:\n\tgo test\n")]).await,
            Some("go test".to_string())
        );
    }

    #[tokio::test]
    async fn test_makefile_needs_test_target() {
        assert_eq!(detected(&[("Makefile", "build:\n\tcc main.c\n")]).await, None);
        assert_eq!(
            detected(&[("Makefile", "build:\n\tcc main.c\n\ntest: build\n\t./run\n")]).await,
            Some("make test".to_string())
        );
    }
}
