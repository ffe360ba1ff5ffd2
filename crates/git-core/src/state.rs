//! Derives a [`RepoState`] snapshot from a working directory.
//!
//! Every probe here is independent and side-effect free (`fetch` is the one
//! exception) so `read_repo_state` can run them concurrently. Parsing is
//! lenient: a probe that fails to parse falls back to its empty value
//! rather than failing the whole snapshot — only a missing `head` is fatal,
//! per the data model's invariant that `head` is the one required field.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use async_trait::async_trait;

use crate::{
    executor::{ExecOutput, GitExecError, GitExecutor},
    types::{CommitMeta, DETACHED_HEAD, RepoState},
};

/// `{upstream?, ahead, behind}` as returned by `upstream_ahead_behind`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamInfo {
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
}

/// The subset of git queries the activity detector needs that aren't
/// captured by a plain `RepoState` diff — kept as a trait so the detector
/// can be tested with a fake without spawning processes.
#[async_trait]
pub trait GitQueries: Send + Sync {
    async fn is_merge_head(&self, cwd: &Path) -> bool;
    async fn get_last_commit_meta(&self, cwd: &Path) -> Option<CommitMeta>;
    async fn detect_recent_push(&self, cwd: &Path, since_minutes: i64) -> bool;
    async fn get_merge_parents_count(&self, cwd: &Path) -> usize;
    /// `diff --numstat [--cached] -- <path>`, parsed as `(lines_added, lines_removed)`.
    /// Tries the staged form first, falling back to the unstaged form.
    async fn numstat(&self, cwd: &Path, path: &str) -> (u32, u32);
}

/// Reads `RepoState` snapshots and answers the supplemental queries in
/// [`GitQueries`], all by invoking `git` through a [`GitExecutor`].
#[derive(Clone, Default)]
pub struct GitStateReader {
    exec: GitExecutor,
}

impl GitStateReader {
    pub fn new() -> Self {
        Self {
            exec: GitExecutor::new(),
        }
    }

    pub fn with_executor(exec: GitExecutor) -> Self {
        Self { exec }
    }

    /// `symbolic-ref -q --short HEAD`, falling back to the `"DETACHED"` sentinel.
    pub async fn branch(&self, cwd: &Path) -> String {
        match self
            .exec
            .run_default(["symbolic-ref", "-q", "--short", "HEAD"], cwd)
            .await
        {
            Ok(out) if !out.stdout.trim().is_empty() => out.stdout.trim().to_string(),
            _ => DETACHED_HEAD.to_string(),
        }
    }

    /// `rev-parse HEAD`. The only probe whose failure is fatal to the whole read.
    pub async fn head(&self, cwd: &Path) -> Result<String, GitExecError> {
        let out = self.exec.run_default(["rev-parse", "HEAD"], cwd).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// `status --short`, trimmed; empty string on any failure.
    pub async fn status_short(&self, cwd: &Path) -> String {
        self.exec
            .run_default(["status", "--short"], cwd)
            .await
            .map(|out| out.stdout.trim_end().to_string())
            .unwrap_or_default()
    }

    /// `branch -vv --no-color`, parsed for the current branch's
    /// `[upstream: ahead N, behind M]` annotation.
    pub async fn upstream_ahead_behind(&self, cwd: &Path) -> UpstreamInfo {
        let Ok(out) = self.exec.run_default(["branch", "-vv", "--no-color"], cwd).await else {
            return UpstreamInfo::default();
        };
        out.stdout
            .lines()
            .find(|line| line.starts_with('*'))
            .map(parse_branch_vv_line)
            .unwrap_or_default()
    }

    /// `for-each-ref refs/heads --format=%(refname:short)`.
    pub async fn list_local_branches(&self, cwd: &Path) -> BTreeSet<String> {
        self.for_each_ref(cwd, "refs/heads").await
    }

    /// `for-each-ref refs/remotes --format=%(refname:short)`.
    pub async fn list_remote_branches(&self, cwd: &Path) -> BTreeSet<String> {
        self.for_each_ref(cwd, "refs/remotes").await
    }

    async fn for_each_ref(&self, cwd: &Path, prefix: &str) -> BTreeSet<String> {
        self.exec
            .run_default(["for-each-ref", prefix, "--format=%(refname:short)"], cwd)
            .await
            .map(|out| {
                out.stdout
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `remote -v`, keeping only `(fetch)` lines.
    pub async fn get_remote_urls(&self, cwd: &Path) -> BTreeMap<String, String> {
        let Ok(out) = self.exec.run_default(["remote", "-v"], cwd).await else {
            return BTreeMap::new();
        };
        out.stdout
            .lines()
            .filter(|line| line.ends_with("(fetch)"))
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let name = parts.next()?;
                let url = parts.next()?;
                Some((name.to_string(), url.to_string()))
            })
            .collect()
    }

    /// `log -1 --pretty=%H%x1f%an%x1f%s`, split on the unit separator.
    async fn raw_last_commit(&self, cwd: &Path) -> Option<ExecOutput> {
        self.exec
            .run_default(["log", "-1", "--pretty=%H%x1f%an%x1f%s"], cwd)
            .await
            .ok()
    }

    /// `log -1 --pretty=%P`, split on whitespace to count parents.
    async fn raw_parents(&self, cwd: &Path) -> Option<ExecOutput> {
        self.exec
            .run_default(["log", "-1", "--pretty=%P"], cwd)
            .await
            .ok()
    }

    /// Assembles every probe above into one `RepoState`, running the
    /// independent reads concurrently.
    pub async fn read_repo_state(&self, cwd: &Path) -> Result<RepoState, GitExecError> {
        let (head, branch, status_short, upstream_info, local_branches, remote_branches, remote_urls) = tokio::join!(
            self.head(cwd),
            self.branch(cwd),
            self.status_short(cwd),
            self.upstream_ahead_behind(cwd),
            self.list_local_branches(cwd),
            self.list_remote_branches(cwd),
            self.get_remote_urls(cwd),
        );

        Ok(RepoState {
            branch,
            head: head?,
            status_short,
            upstream: upstream_info.upstream,
            ahead: upstream_info.ahead,
            behind: upstream_info.behind,
            local_branches,
            remote_branches,
            remote_urls,
        })
    }
}

#[async_trait]
impl GitQueries for GitStateReader {
    async fn is_merge_head(&self, cwd: &Path) -> bool {
        self.get_merge_parents_count(cwd).await >= 2
    }

    async fn get_last_commit_meta(&self, cwd: &Path) -> Option<CommitMeta> {
        let out = self.raw_last_commit(cwd).await?;
        let mut parts = out.stdout.trim().split('\u{1f}');
        let _hash = parts.next()?;
        let author = parts.next()?.to_string();
        let subject = parts.next().unwrap_or_default().to_string();
        Some(CommitMeta { author, subject })
    }

    async fn detect_recent_push(&self, cwd: &Path, since_minutes: i64) -> bool {
        let Ok(out) = self
            .exec
            .run_default(
                [
                    "reflog".to_string(),
                    "--date=iso".to_string(),
                    format!("--since={since_minutes} minutes ago"),
                ],
                cwd,
            )
            .await
        else {
            return false;
        };
        out.stdout.to_lowercase().contains("push")
    }

    async fn get_merge_parents_count(&self, cwd: &Path) -> usize {
        match self.raw_parents(cwd).await {
            Some(out) => out.stdout.split_whitespace().count(),
            None => 0,
        }
    }

    async fn numstat(&self, cwd: &Path, path: &str) -> (u32, u32) {
        if let Some(counts) = self.run_numstat(cwd, path, true).await {
            return counts;
        }
        self.run_numstat(cwd, path, false).await.unwrap_or((0, 0))
    }
}

impl GitStateReader {
    async fn run_numstat(&self, cwd: &Path, path: &str, cached: bool) -> Option<(u32, u32)> {
        let mut args = vec!["diff".to_string(), "--numstat".to_string()];
        if cached {
            args.push("--cached".to_string());
        }
        args.push("--".to_string());
        args.push(path.to_string());

        let out = self.exec.run_default(args, cwd).await.ok()?;
        let line = out.stdout.lines().next()?;
        let mut cols = line.split_whitespace();
        let added = cols.next()?.parse().ok()?;
        let removed = cols.next()?.parse().ok()?;
        Some((added, removed))
    }
}

/// Parses a `branch -vv` current-branch line like:
/// `* main abc1234 [origin/main: ahead 2, behind 1] subject`
/// or `* main abc1234 [origin/main] subject` (in sync)
/// or `* main abc1234 subject` (no upstream).
fn parse_branch_vv_line(line: &str) -> UpstreamInfo {
    let Some(bracket_start) = line.find('[') else {
        return UpstreamInfo::default();
    };
    let Some(bracket_end) = line[bracket_start..].find(']') else {
        return UpstreamInfo::default();
    };
    let inner = &line[bracket_start + 1..bracket_start + bracket_end];

    let (upstream, rest) = match inner.split_once(':') {
        Some((upstream, rest)) => (upstream.trim(), Some(rest)),
        None => (inner.trim(), None),
    };

    let mut ahead = 0;
    let mut behind = 0;
    if let Some(rest) = rest {
        for token in rest.split(',') {
            let token = token.trim();
            if let Some(n) = token.strip_prefix("ahead ") {
                ahead = n.trim().parse().unwrap_or(0);
            } else if let Some(n) = token.strip_prefix("behind ") {
                behind = n.trim().parse().unwrap_or(0);
            }
        }
    }

    UpstreamInfo {
        upstream: Some(upstream.to_string()),
        ahead,
        behind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ahead_behind() {
        let info = parse_branch_vv_line(
            "* main abc1234 [origin/main: ahead 2, behind 1] Latest commit",
        );
        assert_eq!(info.upstream.as_deref(), Some("origin/main"));
        assert_eq!(info.ahead, 2);
        assert_eq!(info.behind, 1);
    }

    #[test]
    fn test_parse_in_sync() {
        let info = parse_branch_vv_line("* main abc1234 [origin/main] Latest commit");
        assert_eq!(info.upstream.as_deref(), Some("origin/main"));
        assert_eq!(info.ahead, 0);
        assert_eq!(info.behind, 0);
    }

    #[test]
    fn test_parse_no_upstream() {
        let info = parse_branch_vv_line("* main abc1234 Latest commit");
        assert_eq!(info.upstream, None);
        assert_eq!(info.ahead, 0);
        assert_eq!(info.behind, 0);
    }

    #[test]
    fn test_parse_ahead_only() {
        let info = parse_branch_vv_line("* dev abc1234 [origin/dev: ahead 3] wip");
        assert_eq!(info.ahead, 3);
        assert_eq!(info.behind, 0);
    }
}
