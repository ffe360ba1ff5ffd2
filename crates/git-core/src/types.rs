//! Shared value types for the git-reading layer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Sentinel branch name used when HEAD is detached.
pub const DETACHED_HEAD: &str = "DETACHED";

/// Compact snapshot of git-observable state for one working tree.
///
/// Branch/remote sets use `BTreeSet`/`BTreeMap` so two states built from the
/// same git output always compare and serialize identically regardless of
/// the order `git` printed its lines in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    pub branch: String,
    pub head: String,
    pub status_short: String,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub local_branches: BTreeSet<String>,
    pub remote_branches: BTreeSet<String>,
    pub remote_urls: BTreeMap<String, String>,
}

impl RepoState {
    /// Checks the invariants from the data model: non-negative counters
    /// (guaranteed by the `u32` type itself), an upstream that actually
    /// exists among the remote branches, and a 40-hex HEAD.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(upstream) = &self.upstream
            && !self.remote_branches.contains(upstream)
        {
            return Err(format!(
                "upstream {upstream:?} not present in remote_branches"
            ));
        }
        if self.head.len() != 40 || !self.head.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("head {:?} is not a 40-hex commit id", self.head));
        }
        Ok(())
    }
}

/// `validate_repo_state` — a free function wrapper kept for
/// call sites that don't otherwise hold a `RepoState` value to call a method on.
pub fn validate_repo_state(state: &RepoState) -> Result<(), String> {
    state.validate()
}

/// `clone_repo_state` — the detector treats its inputs as
/// immutable, so this is just a deep copy via `Clone`.
pub fn clone_repo_state(state: &RepoState) -> RepoState {
    state.clone()
}

/// Author + subject of the last commit, from `get_last_commit_meta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    pub author: String,
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> RepoState {
        RepoState {
            branch: "main".into(),
            head: "a".repeat(40),
            status_short: String::new(),
            upstream: Some("origin/main".into()),
            ahead: 0,
            behind: 0,
            local_branches: BTreeSet::from(["main".to_string()]),
            remote_branches: BTreeSet::from(["origin/main".to_string()]),
            remote_urls: BTreeMap::new(),
        }
    }

    #[test]
    fn test_valid_state_passes() {
        assert!(sample_state().validate().is_ok());
    }

    #[test]
    fn test_dangling_upstream_rejected() {
        let mut state = sample_state();
        state.upstream = Some("origin/feature".into());
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_short_head_rejected() {
        let mut state = sample_state();
        state.head = "deadbeef".into();
        assert!(state.validate().is_err());
    }
}
