//! Runs the external `git` binary as a child process.
//!
//! Keeps a thin process runner separate from the higher-level state and
//! activity layers built on top of it: no parsing happens here, and argv
//! is always built as a vector of owned strings, never interpolated into
//! a shell.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use thiserror::Error;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum GitExecError {
    #[error("git executable not found on PATH")]
    NotAvailable,
    #[error("git command failed: {0}")]
    ExecFailed(String),
    #[error("git command timed out after {0:?}")]
    ExecTimeout(Duration),
}

/// Output of a successful `git` invocation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs `git` as a subprocess with an explicit argv, cwd, and timeout.
#[derive(Clone, Default)]
pub struct GitExecutor;

impl GitExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Spawn `git <argv...>` in `cwd`, killing it if it runs past `timeout`.
    /// The child's environment is inherited from this process; no shell is
    /// involved, so arguments never need escaping.
    pub async fn run<I, S>(
        &self,
        argv: I,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecOutput, GitExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let git = utils::shell::resolve_executable_path("git")
            .await
            .ok_or(GitExecError::NotAvailable)?;

        let mut cmd = Command::new(&git);
        cmd.current_dir(cwd)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| GitExecError::ExecFailed(e.to_string()))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(GitExecError::ExecFailed(e.to_string())),
            Err(_) => return Err(GitExecError::ExecTimeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            let combined = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(GitExecError::ExecFailed(combined));
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Convenience wrapper using the default 15s timeout.
    pub async fn run_default<I, S>(&self, argv: I, cwd: &Path) -> Result<ExecOutput, GitExecError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run(argv, cwd, DEFAULT_TIMEOUT).await
    }

    /// `fetch --prune`, with the longer timeout reserved for network calls.
    pub async fn fetch_prune(&self, cwd: &Path) -> Result<ExecOutput, GitExecError> {
        self.run(["fetch", "--prune"], cwd, FETCH_TIMEOUT).await
    }

    /// `rev-parse --git-dir` succeeds iff `path` is inside a git working tree.
    pub async fn is_git_repository(&self, path: &Path) -> bool {
        self.run_default(["rev-parse", "--git-dir"], path)
            .await
            .is_ok()
    }

    /// Canonicalised top-level working directory, via `rev-parse --show-toplevel`.
    pub async fn repository_root(&self, path: &Path) -> Result<PathBuf, GitExecError> {
        let out = self
            .run_default(["rev-parse", "--show-toplevel"], path)
            .await?;
        let root = out.stdout.trim();
        Ok(dunce::canonicalize(root).unwrap_or_else(|_| PathBuf::from(root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn init_repo(path: &Path) {
        StdCommand::new("git")
            .args(["init", "-q"])
            .current_dir(path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(path)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(path)
            .output()
            .unwrap();
    }

    #[tokio::test]
    async fn test_is_git_repository_true_for_repo() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let exec = GitExecutor::new();
        assert!(exec.is_git_repository(dir.path()).await);
    }

    #[tokio::test]
    async fn test_is_git_repository_false_for_plain_dir() {
        let dir = TempDir::new().unwrap();
        let exec = GitExecutor::new();
        assert!(!exec.is_git_repository(dir.path()).await);
    }

    #[tokio::test]
    async fn test_run_returns_stdout() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let exec = GitExecutor::new();
        let out = exec
            .run_default(["status", "--short"], dir.path())
            .await
            .unwrap();
        assert!(out.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fires() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let exec = GitExecutor::new();
        let result = exec
            .run(["status"], dir.path(), Duration::from_nanos(1))
            .await;
        assert!(matches!(result, Err(GitExecError::ExecTimeout(_))));
    }
}
