//! Classifies state transitions into typed activities.
//!
//! `detect_local`/`detect_remote` are the only entry points that consult
//! [`GitQueries`] for data a `RepoState` diff alone can't carry (merge
//! parentage, commit metadata, reflog pushes); otherwise this module is a
//! pure diff over two [`RepoState`] values.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::GitQueries;
use crate::types::RepoState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchScope {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// Tagged payload for one semantic activity. The variant name is the wire
/// `type`; its fields are the wire `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    BranchSwitch {
        from: String,
        to: String,
    },
    BranchCreated {
        name: String,
        scope: BranchScope,
    },
    Commit {
        branch: String,
        head: String,
        author: String,
        subject: String,
    },
    Merge {
        branch: String,
        head: String,
        parents_count: usize,
    },
    RemoteUpdate {
        branch: String,
        ahead: u32,
        behind: u32,
    },
    Push {
        branch: String,
        head: String,
    },
    WorktreeChange {
        summary: String,
    },
    FileChange {
        file_path: String,
        change_type: FileChangeType,
        file_type: String,
    },
    FileFocus {
        file_path: String,
        file_type: String,
    },
    Error {
        message: String,
        command: Option<String>,
        changed_path: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub project_id: Uuid,
    pub repo_id: Uuid,
    #[serde(flatten)]
    pub kind: ActivityKind,
    pub at: DateTime<Utc>,
}

impl Activity {
    fn new(project_id: Uuid, repo_id: Uuid, at: DateTime<Utc>, kind: ActivityKind) -> Self {
        Self {
            project_id,
            repo_id,
            kind,
            at,
        }
    }
}

/// One parsed row of `status --short`, before line-delta enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeSummary {
    pub file_path: String,
    pub change_type: FileChangeType,
    pub lines_added: u32,
    pub lines_removed: u32,
}

/// Steps 1-5 of the local-observation pipeline. `prev = None`
/// means this is the first observation of the repo — by invariant 1, that
/// never produces an activity.
pub async fn detect_local(
    prev: Option<&RepoState>,
    next: &RepoState,
    queries: &dyn GitQueries,
    cwd: &Path,
    project_id: Uuid,
    repo_id: Uuid,
    at: DateTime<Utc>,
) -> Vec<Activity> {
    let Some(prev) = prev else {
        return Vec::new();
    };
    if prev == next {
        return Vec::new();
    }

    let mut out = Vec::new();
    let emit = |kind: ActivityKind| Activity::new(project_id, repo_id, at, kind);

    if prev.branch != next.branch {
        out.push(emit(ActivityKind::BranchSwitch {
            from: prev.branch.clone(),
            to: next.branch.clone(),
        }));
    }

    for name in next.local_branches.difference(&prev.local_branches) {
        out.push(emit(ActivityKind::BranchCreated {
            name: name.clone(),
            scope: BranchScope::Local,
        }));
    }

    // A HEAD advance is classified as exactly one of COMMIT or MERGE,
    // regardless of whether the branch also changed in this observation
    // (a checkout to a branch whose tip differs still reports the new tip).
    if prev.head != next.head {
        if queries.is_merge_head(cwd).await {
            let parents_count = queries.get_merge_parents_count(cwd).await;
            out.push(emit(ActivityKind::Merge {
                branch: next.branch.clone(),
                head: next.head.clone(),
                parents_count,
            }));
        } else {
            let meta = queries.get_last_commit_meta(cwd).await.unwrap_or_default();
            out.push(emit(ActivityKind::Commit {
                branch: next.branch.clone(),
                head: next.head.clone(),
                author: meta.author,
                subject: meta.subject,
            }));
        }
    }

    if out.is_empty() && prev.status_short != next.status_short {
        let summary = if next.status_short.is_empty() {
            "Working tree clean".to_string()
        } else {
            next.status_short.clone()
        };
        out.push(emit(ActivityKind::WorktreeChange { summary }));
    }

    out
}

/// Remote-poll entry point. Only ever called after a `fetch`.
pub async fn detect_remote(
    prev: Option<&RepoState>,
    next: &RepoState,
    queries: &dyn GitQueries,
    cwd: &Path,
    project_id: Uuid,
    repo_id: Uuid,
    at: DateTime<Utc>,
) -> Vec<Activity> {
    let Some(prev) = prev else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let emit = |kind: ActivityKind| Activity::new(project_id, repo_id, at, kind);

    for name in next.remote_branches.difference(&prev.remote_branches) {
        out.push(emit(ActivityKind::BranchCreated {
            name: name.clone(),
            scope: BranchScope::Remote,
        }));
    }

    if (prev.ahead, prev.behind) != (next.ahead, next.behind) {
        out.push(emit(ActivityKind::RemoteUpdate {
            branch: next.branch.clone(),
            ahead: next.ahead,
            behind: next.behind,
        }));
    }

    if queries.detect_recent_push(cwd, 2).await {
        out.push(emit(ActivityKind::Push {
            branch: next.branch.clone(),
            head: next.head.clone(),
        }));
    }

    out
}

/// Parses `next.status_short` into file-level entries, then enriches
/// non-deleted files with line counts from `diff --numstat`.
pub async fn detect_file_changes(
    cwd: &Path,
    next: &RepoState,
    queries: &dyn GitQueries,
) -> Vec<FileChangeSummary> {
    let mut out = Vec::new();
    for line in next.status_short.lines() {
        let Some(entry) = parse_status_line(line) else {
            continue;
        };
        let (lines_added, lines_removed) = if entry.change_type == FileChangeType::Deleted {
            (0, 0)
        } else {
            queries.numstat(cwd, &entry.file_path).await
        };
        out.push(FileChangeSummary {
            file_path: entry.file_path,
            change_type: entry.change_type,
            lines_added,
            lines_removed,
        });
    }
    out
}

struct StatusEntry {
    file_path: String,
    change_type: FileChangeType,
}

/// Interprets the two-character `status --short` prefix. `R` entries carry
/// `old -> new`; we keep the new path.
fn parse_status_line(line: &str) -> Option<StatusEntry> {
    if line.len() < 3 {
        return None;
    }
    let prefix = &line[0..2];
    let rest = line[3..].trim();

    let change_type = if prefix.contains('A') {
        FileChangeType::Added
    } else if prefix.contains('D') {
        FileChangeType::Deleted
    } else if prefix.contains('R') {
        FileChangeType::Renamed
    } else if prefix.contains('M') || prefix.contains('U') {
        FileChangeType::Modified
    } else {
        FileChangeType::Modified
    };

    let file_path = match rest.split_once(" -> ") {
        Some((_old, new)) => new.to_string(),
        None => rest.to_string(),
    };

    if file_path.is_empty() {
        return None;
    }

    Some(StatusEntry {
        file_path,
        change_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommitMeta;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeQueries {
        is_merge: bool,
        parents: usize,
        commit_meta: Option<CommitMeta>,
        recent_push: bool,
        numstat_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GitQueries for FakeQueries {
        async fn is_merge_head(&self, _cwd: &Path) -> bool {
            self.is_merge
        }
        async fn get_last_commit_meta(&self, _cwd: &Path) -> Option<CommitMeta> {
            self.commit_meta.clone()
        }
        async fn detect_recent_push(&self, _cwd: &Path, _since_minutes: i64) -> bool {
            self.recent_push
        }
        async fn get_merge_parents_count(&self, _cwd: &Path) -> usize {
            self.parents
        }
        async fn numstat(&self, _cwd: &Path, path: &str) -> (u32, u32) {
            self.numstat_calls.lock().unwrap().push(path.to_string());
            (3, 1)
        }
    }

    fn state(
        branch: &str,
        head: &str,
        status_short: &str,
        local: &[&str],
        remote: &[&str],
        ahead: u32,
        behind: u32,
    ) -> RepoState {
        RepoState {
            branch: branch.to_string(),
            head: head.to_string(),
            status_short: status_short.to_string(),
            upstream: remote.first().map(|s| s.to_string()),
            ahead,
            behind,
            local_branches: local.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            remote_branches: remote.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            remote_urls: BTreeMap::new(),
        }
    }

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[tokio::test]
    async fn test_property_first_observation_is_empty() {
        let next = state("main", &"b".repeat(40), "", &["main"], &[], 0, 0);
        let queries = FakeQueries::default();
        let activities = detect_local(
            None,
            &next,
            &queries,
            Path::new("."),
            uid(1),
            uid(1),
            Utc::now(),
        )
        .await;
        assert!(activities.is_empty());

        let activities = detect_remote(
            None,
            &next,
            &queries,
            Path::new("."),
            uid(1),
            uid(1),
            Utc::now(),
        )
        .await;
        assert!(activities.is_empty());
    }

    #[tokio::test]
    async fn test_property_no_change_no_activity() {
        let s = state("main", &"a".repeat(40), "", &["main"], &[], 0, 0);
        let queries = FakeQueries::default();
        let activities = detect_local(
            Some(&s),
            &s,
            &queries,
            Path::new("."),
            uid(1),
            uid(1),
            Utc::now(),
        )
        .await;
        assert!(activities.is_empty());
    }

    #[tokio::test]
    async fn test_s1_branch_switch_plus_commit() {
        let prev = state(
            "main",
            &"a".repeat(40),
            "",
            &["main", "dev"],
            &["origin/main"],
            0,
            0,
        );
        let next = state(
            "dev",
            &"b".repeat(40),
            "",
            &["main", "dev"],
            &["origin/main"],
            0,
            0,
        );
        let queries = FakeQueries {
            is_merge: false,
            commit_meta: Some(CommitMeta {
                author: "A".into(),
                subject: "x".into(),
            }),
            ..Default::default()
        };

        let activities = detect_local(
            Some(&prev),
            &next,
            &queries,
            Path::new("."),
            uid(1),
            uid(2),
            Utc::now(),
        )
        .await;

        assert_eq!(activities.len(), 2);
        assert!(matches!(
            &activities[0].kind,
            ActivityKind::BranchSwitch { from, to } if from == "main" && to == "dev"
        ));
        assert!(matches!(
            &activities[1].kind,
            ActivityKind::Commit { branch, head, author, subject }
                if branch == "dev" && head == &"b".repeat(40) && author == "A" && subject == "x"
        ));
    }

    #[tokio::test]
    async fn test_s2_merge_head() {
        let prev = state("main", &"a".repeat(40), "", &["main"], &[], 0, 0);
        let next = state("main", &"c".repeat(40), "", &["main"], &[], 0, 0);
        let queries = FakeQueries {
            is_merge: true,
            parents: 2,
            ..Default::default()
        };

        let activities = detect_local(
            Some(&prev),
            &next,
            &queries,
            Path::new("."),
            uid(1),
            uid(1),
            Utc::now(),
        )
        .await;

        assert_eq!(activities.len(), 1);
        assert!(matches!(
            &activities[0].kind,
            ActivityKind::Merge { branch, head, parents_count }
                if branch == "main" && head == &"c".repeat(40) && *parents_count == 2
        ));
    }

    #[tokio::test]
    async fn test_s3_new_remote_branch_and_ahead_behind() {
        let prev = state("main", &"a".repeat(40), "", &["main"], &["origin/main"], 0, 0);
        let next = state(
            "main",
            &"a".repeat(40),
            "",
            &["main"],
            &["origin/main", "origin/feature"],
            1,
            2,
        );
        let queries = FakeQueries {
            recent_push: true,
            ..Default::default()
        };

        let activities = detect_remote(
            Some(&prev),
            &next,
            &queries,
            Path::new("."),
            uid(1),
            uid(1),
            Utc::now(),
        )
        .await;

        assert_eq!(activities.len(), 3);
        assert!(matches!(
            &activities[0].kind,
            ActivityKind::BranchCreated { name, scope }
                if name == "origin/feature" && *scope == BranchScope::Remote
        ));
        assert!(matches!(
            &activities[1].kind,
            ActivityKind::RemoteUpdate { ahead, behind, .. } if *ahead == 1 && *behind == 2
        ));
        assert!(matches!(&activities[2].kind, ActivityKind::Push { .. }));
    }

    #[tokio::test]
    async fn test_s4_worktree_change_fallback() {
        let prev = state("main", &"a".repeat(40), "", &["main"], &[], 0, 0);
        let next = state("main", &"a".repeat(40), " M src/a.txt", &["main"], &[], 0, 0);
        let queries = FakeQueries::default();

        let activities = detect_local(
            Some(&prev),
            &next,
            &queries,
            Path::new("."),
            uid(1),
            uid(1),
            Utc::now(),
        )
        .await;

        assert_eq!(activities.len(), 1);
        assert!(matches!(
            &activities[0].kind,
            ActivityKind::WorktreeChange { summary } if summary == " M src/a.txt"
        ));
    }

    #[tokio::test]
    async fn test_commit_and_merge_are_mutually_exclusive() {
        let prev = state("main", &"a".repeat(40), "", &["main"], &[], 0, 0);
        let next = state("main", &"b".repeat(40), "", &["main"], &[], 0, 0);
        for is_merge in [true, false] {
            let queries = FakeQueries {
                is_merge,
                parents: 2,
                commit_meta: Some(CommitMeta {
                    author: "A".into(),
                    subject: "s".into(),
                }),
                ..Default::default()
            };
            let activities = detect_local(
                Some(&prev),
                &next,
                &queries,
                Path::new("."),
                uid(1),
                uid(1),
                Utc::now(),
            )
            .await;
            let has_commit = activities
                .iter()
                .any(|a| matches!(a.kind, ActivityKind::Commit { .. }));
            let has_merge = activities
                .iter()
                .any(|a| matches!(a.kind, ActivityKind::Merge { .. }));
            assert!(!(has_commit && has_merge));
        }
    }

    #[tokio::test]
    async fn test_worktree_fallback_suppressed_when_other_activity_present() {
        let prev = state("main", &"a".repeat(40), "", &["main"], &[], 0, 0);
        let mut next = state("main", &"b".repeat(40), " M x", &["main"], &[], 0, 0);
        next.status_short = " M x".to_string();
        let queries = FakeQueries {
            commit_meta: Some(CommitMeta {
                author: "A".into(),
                subject: "s".into(),
            }),
            ..Default::default()
        };
        let activities = detect_local(
            Some(&prev),
            &next,
            &queries,
            Path::new("."),
            uid(1),
            uid(1),
            Utc::now(),
        )
        .await;
        assert!(
            !activities
                .iter()
                .any(|a| matches!(a.kind, ActivityKind::WorktreeChange { .. }))
        );
    }

    #[test]
    fn test_parse_status_line_kinds() {
        assert_eq!(
            parse_status_line("A  new.txt").unwrap().change_type,
            FileChangeType::Added
        );
        assert_eq!(
            parse_status_line(" D gone.txt").unwrap().change_type,
            FileChangeType::Deleted
        );
        assert_eq!(
            parse_status_line(" M changed.txt").unwrap().change_type,
            FileChangeType::Modified
        );
        let renamed = parse_status_line("R  old.txt -> new.txt").unwrap();
        assert_eq!(renamed.change_type, FileChangeType::Renamed);
        assert_eq!(renamed.file_path, "new.txt");
    }

    #[tokio::test]
    async fn test_detect_file_changes_skips_numstat_for_deletes() {
        let next = state("main", &"a".repeat(40), " D gone.txt\n M kept.txt", &["main"], &[], 0, 0);
        let queries = FakeQueries::default();
        let summaries = detect_file_changes(Path::new("."), &next, &queries).await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].lines_added, 0);
        assert_eq!(summaries[0].lines_removed, 0);
        assert_eq!(summaries[1].lines_added, 3);
        assert_eq!(summaries[1].lines_removed, 1);
        assert_eq!(*queries.numstat_calls.lock().unwrap(), vec!["kept.txt"]);
    }
}
