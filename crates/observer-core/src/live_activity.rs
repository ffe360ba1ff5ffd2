//! Per-user session tracking: liveness, focus file, and aggregated
//! file-change deltas over a work-tree, independent of `.git/`.
//!
//! Sessions live in a `DashMap` keyed by session id rather than behind a
//! back-pointer from the watcher callback, so a callback only ever needs to
//! carry the id — never a reference into the monitor itself.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use git_core::{ActivityKind, GitStateReader, RepoState};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::repo_store::RepoConfig;
use crate::sink::{FileChangeRow, LiveActivityRecord, Sink, TeamAwareness};

pub use git_core::FileChangeType;

const IGNORE_GLOBS: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
    "**/.next/**",
    "**/coverage/**",
    "**/*.log",
];

const MAX_WATCH_DEPTH: usize = 10;

#[derive(Debug, Clone)]
pub struct LiveSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub repository_id: Option<Uuid>,
    pub local_path: PathBuf,
    pub session_start: DateTime<Utc>,
    pub is_active: bool,
    pub current_branch: Option<String>,
    pub current_head: Option<String>,
    pub working_directory_status: Option<String>,
    pub ahead_count: u32,
    pub behind_count: u32,
    pub focus_file: Option<String>,
    pub editor_info: Option<String>,
    /// Human-readable summary of the most recent `COMMIT`/`BRANCH_SWITCH`/
    /// `PUSH` activity, surfaced to `TeamAwareness.last_commit_message`.
    pub last_activity_summary: Option<String>,
}

/// Per-(session, relative-path) aggregate. Counters only ever grow within a
/// session; `change_type` reflects the most recent event observed.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub file_path: String,
    pub file_type: String,
    pub change_type: FileChangeType,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub characters_added: u32,
    pub characters_removed: u32,
    pub first_change_at: DateTime<Utc>,
    pub last_change_at: DateTime<Utc>,
}

struct SessionState {
    session: Mutex<LiveSession>,
    last_activity: Mutex<Instant>,
    file_changes: Mutex<HashMap<String, FileChange>>,
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

pub struct LiveActivityMonitor {
    sessions: Arc<DashMap<Uuid, Arc<SessionState>>>,
    reader: Arc<GitStateReader>,
    sink: Arc<dyn Sink>,
    session_timeout: Duration,
}

impl LiveActivityMonitor {
    pub fn new(reader: Arc<GitStateReader>, sink: Arc<dyn Sink>, session_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            reader,
            sink,
            session_timeout,
        }
    }

    pub async fn start_monitoring(
        &self,
        user_id: Uuid,
        config: &RepoConfig,
    ) -> Result<Uuid, git_core::GitExecError> {
        let state = self.reader.read_repo_state(&config.path).await?;
        let now = Utc::now();

        let session = LiveSession {
            id: Uuid::new_v4(),
            user_id,
            project_id: config.project_id,
            repository_id: Some(config.id),
            local_path: config.path.clone(),
            session_start: now,
            is_active: true,
            current_branch: Some(state.branch.clone()),
            current_head: Some(state.head.clone()),
            working_directory_status: Some(state.status_short.clone()),
            ahead_count: state.ahead,
            behind_count: state.behind,
            focus_file: None,
            editor_info: None,
            last_activity_summary: None,
        };
        let session_id = session.id;

        let watcher = self.spawn_worktree_watcher(session_id, &config.path);

        let entry = Arc::new(SessionState {
            session: Mutex::new(session),
            last_activity: Mutex::new(Instant::now()),
            file_changes: Mutex::new(HashMap::new()),
            _watcher: Mutex::new(watcher),
        });
        self.sessions.insert(session_id, entry);

        Ok(session_id)
    }

    /// Watches `root` (excluding the fixed ignore globs) and folds every
    /// add/modify/remove into this session's `file_changes` map.
    fn spawn_worktree_watcher(&self, session_id: Uuid, root: &Path) -> Option<RecommendedWatcher> {
        let ignore = build_ignore_matcher(root);
        let root = root.to_path_buf();
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();

        let mut watcher = match RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!("failed to create worktree watcher for {:?}: {e}", root);
                return None;
            }
        };

        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            tracing::warn!("failed to watch worktree {:?}: {e}", root);
            return None;
        }

        let sessions = Arc::clone(&self.sessions);
        let root_for_task = root.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(entry) = sessions.get(&session_id).map(|e| Arc::clone(e.value())) else {
                    break;
                };
                for path in &event.paths {
                    if path_is_ignored(&ignore, path) || exceeds_depth(&root_for_task, path) {
                        continue;
                    }
                    let Some(change_type) = classify_event(&event.kind) else {
                        continue;
                    };
                    let rel = path
                        .strip_prefix(&root_for_task)
                        .unwrap_or(path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    apply_file_event(&entry, &rel, change_type);
                }
            }
        });

        Some(watcher)
    }

    pub async fn stop_monitoring(&self, session_id: Uuid) {
        if let Some((_, entry)) = self.sessions.remove(&session_id) {
            entry.session.lock().is_active = false;
            self.sync_session(&entry).await;
        }
    }

    /// Sets the session's focus file, recording a `FILE_FOCUS` activity and
    /// updating awareness; returns that activity for the caller to route.
    pub fn update_focus_file(&self, session_id: Uuid, path: String) -> Option<ActivityKind> {
        let entry = self.sessions.get(&session_id)?;
        let file_type = extension_of(&path);
        entry.session.lock().focus_file = Some(path.clone());
        Some(ActivityKind::FileFocus {
            file_path: path,
            file_type,
        })
    }

    /// Updates derived session fields from a just-emitted git activity.
    pub fn record_git_activity(&self, session_id: Uuid, kind: &ActivityKind) {
        let Some(entry) = self.sessions.get(&session_id) else {
            return;
        };
        *entry.last_activity.lock() = Instant::now();
        let mut session = entry.session.lock();
        match kind {
            ActivityKind::BranchSwitch { from, to } => {
                session.current_branch = Some(to.clone());
                session.last_activity_summary = Some(format!("switched from {from} to {to}"));
            }
            ActivityKind::Commit { branch, head, subject, .. } => {
                session.current_head = Some(head.clone());
                session.last_activity_summary = Some(format!("committed \"{subject}\" on {branch}"));
            }
            ActivityKind::Push { branch, .. } => {
                session.last_activity_summary = Some(format!("pushed {branch}"));
            }
            _ => {}
        }
    }

    pub fn get_team_awareness(&self, project_id: Uuid) -> Vec<TeamAwareness> {
        self.sessions
            .iter()
            .filter(|e| e.session.lock().project_id == project_id)
            .map(|e| {
                let session = e.session.lock();
                TeamAwareness {
                    user_id: session.user_id,
                    status: if session.is_active { "active" } else { "idle" }.to_string(),
                    current_branch: session.current_branch.clone(),
                    current_file: session.focus_file.clone(),
                    last_commit_message: session.last_activity_summary.clone(),
                    repository_path: Some(session.local_path.display().to_string()),
                    working_on: session.focus_file.clone(),
                    last_seen: Utc::now(),
                    is_online: session.is_active,
                }
            })
            .collect()
    }

    /// Stops every active session, regardless of idle time. Used when the
    /// owning backend shuts down entirely.
    pub async fn stop_all(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.stop_monitoring(id).await;
        }
    }

    /// `HEARTBEAT_INTERVAL` tick: deactivate any session idle past the
    /// configured timeout.
    pub async fn heartbeat_tick(&self) {
        let timed_out: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|e| e.last_activity.lock().elapsed() > self.session_timeout)
            .map(|e| *e.key())
            .collect();
        for id in timed_out {
            self.stop_monitoring(id).await;
        }
    }

    /// `SYNC_INTERVAL` tick: push a snapshot of every active session, and
    /// the file-change aggregates for sessions that have any.
    pub async fn sync_tick(&self) {
        let entries: Vec<Arc<SessionState>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        for entry in entries {
            if entry.session.lock().is_active {
                self.sync_session(&entry).await;
            }
        }
    }

    async fn sync_session(&self, entry: &Arc<SessionState>) {
        let (session_id, project_id, repo_id) = {
            let session = entry.session.lock();
            (session.id, session.project_id, session.repository_id)
        };
        let record = LiveActivityRecord {
            id: Uuid::new_v4(),
            project_id,
            repo_id: repo_id.unwrap_or_default(),
            session_id: Some(session_id),
            kind: ActivityKind::WorktreeChange {
                summary: "session-sync".to_string(),
            },
            at: Utc::now(),
        };
        if let Err(e) = self.sink.sync_live_activity(record).await {
            tracing::debug!("sync_live_activity failed (transient={}): {e}", e.transient);
        }

        let rows: Vec<FileChangeRow> = {
            let changes = entry.file_changes.lock();
            changes
                .values()
                .map(|c| FileChangeRow {
                    file_path: c.file_path.clone(),
                    file_type: c.file_type.clone(),
                    change_type: c.change_type,
                    lines_added: c.lines_added,
                    lines_removed: c.lines_removed,
                    characters_added: c.characters_added,
                    characters_removed: c.characters_removed,
                    first_change_at: c.first_change_at,
                    last_change_at: c.last_change_at,
                })
                .collect()
        };
        if rows.is_empty() {
            return;
        }
        let (session_id, user_id, project_id) = {
            let session = entry.session.lock();
            (session.id, session.user_id, session.project_id)
        };
        if let Err(e) = self
            .sink
            .sync_file_changes(session_id, user_id, project_id, rows)
            .await
        {
            tracing::debug!("sync_file_changes failed (transient={}): {e}", e.transient);
        }
    }
}

fn apply_file_event(entry: &Arc<SessionState>, rel_path: &str, change_type: FileChangeType) {
    *entry.last_activity.lock() = Instant::now();
    let now = Utc::now();
    let mut changes = entry.file_changes.lock();
    changes
        .entry(rel_path.to_string())
        .and_modify(|c| {
            c.change_type = change_type;
            c.last_change_at = now;
        })
        .or_insert_with(|| FileChange {
            file_path: rel_path.to_string(),
            file_type: extension_of(rel_path),
            change_type,
            lines_added: 0,
            lines_removed: 0,
            characters_added: 0,
            characters_removed: 0,
            first_change_at: now,
            last_change_at: now,
        });
}

fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn classify_event(kind: &notify::EventKind) -> Option<FileChangeType> {
    use notify::EventKind;
    match kind {
        EventKind::Create(_) => Some(FileChangeType::Added),
        EventKind::Modify(_) => Some(FileChangeType::Modified),
        EventKind::Remove(_) => Some(FileChangeType::Deleted),
        _ => None,
    }
}

fn build_ignore_matcher(root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in IGNORE_GLOBS {
        let _ = builder.add_line(None, pattern);
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

fn path_is_ignored(ignore: &Gitignore, path: &Path) -> bool {
    ignore.matched(path, path.is_dir()).is_ignore()
}

fn exceeds_depth(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| rel.components().count() > MAX_WATCH_DEPTH)
        .unwrap_or(false)
}
