//! Test execution against a working copy.

pub mod detect;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{NoTestsPolicy, VerificationConfig};
use crate::error::Result;
use crate::workflow::types::VerificationResult;

pub use detect::TestCommand;

/// Summary used when a working copy has no recognizable test setup.
pub const NO_CI_CONFIGURATION: &str = "No CI configuration found";

/// Runs a project's verification and classifies the outcome.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, repo_path: &Path, commit_hash: Option<&str>) -> Result<VerificationResult>;
}

/// Runs the detected (or configured) test command as a subprocess.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    timeout: Duration,
    output_limit: usize,
    when_no_tests: NoTestsPolicy,
    command: Option<String>,
}

impl CommandTestRunner {
    pub fn new(config: &VerificationConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit: config.output_limit_bytes,
            when_no_tests: config.when_no_tests,
            command: config.command.clone(),
        }
    }

    async fn execute(&self, repo_path: &Path, test: &TestCommand) -> VerificationResult {
        let child = tokio::process::Command::new(&test.program)
            .args(&test.args)
            .current_dir(repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(command = %test.label, error = %e, "Failed to start test command");
                return VerificationResult::fail(
                    format!("Could not start `{}`: {e}", test.label),
                    None,
                );
            }
        };

        // Dropping the wait future on timeout kills the child.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return VerificationResult::fail(
                    format!("`{}` could not be awaited: {e}", test.label),
                    None,
                );
            }
            Err(_) => {
                tracing::warn!(
                    command = %test.label,
                    timeout_secs = self.timeout.as_secs(),
                    "Test command timed out"
                );
                return VerificationResult::fail(
                    format!(
                        "`{}` timed out after {} seconds",
                        test.label,
                        self.timeout.as_secs()
                    ),
                    None,
                );
            }
        };

        let stdout = tail(&String::from_utf8_lossy(&output.stdout), self.output_limit);
        let stderr = tail(&String::from_utf8_lossy(&output.stderr), self.output_limit);
        let raw_output = format_output(&stdout, &stderr);

        if output.status.success() {
            VerificationResult::pass(format!("`{}` passed", test.label), Some(raw_output))
        } else {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            VerificationResult::fail(
                format!("`{}` failed (exit {code})", test.label),
                Some(raw_output),
            )
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, repo_path: &Path, commit_hash: Option<&str>) -> Result<VerificationResult> {
        let test = match &self.command {
            Some(line) => Some(TestCommand::shell(line)),
            None => detect::detect(repo_path).await?,
        };

        let Some(test) = test else {
            tracing::info!(path = %repo_path.display(), policy = ?self.when_no_tests, "No test configuration detected");
            return Ok(match self.when_no_tests {
                NoTestsPolicy::Pass => VerificationResult::pass(NO_CI_CONFIGURATION, None),
                NoTestsPolicy::Fail => VerificationResult::fail(NO_CI_CONFIGURATION, None),
            });
        };

        tracing::info!(
            command = %test.label,
            commit = commit_hash.unwrap_or("working tree"),
            "Running tests"
        );
        let result = self.execute(repo_path, &test).await;
        tracing::info!(command = %test.label, passed = result.passed, "Tests finished");
        Ok(result)
    }
}

/// The last `limit` bytes of `text`, cut on a char boundary.
pub fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

fn format_output(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stdout.trim().is_empty() {
        out.push_str("--- stdout ---\n");
        out.push_str(stdout.trim_end());
        out.push('\n');
    }
    if !stderr.trim().is_empty() {
        out.push_str("--- stderr ---\n");
        out.push_str(stderr.trim_end());
        out.push('\n');
    }
    out
}
