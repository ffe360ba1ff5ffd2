//! File-system watch of `.git/` for one repository → debounce → state-diff
//! → activity emission.
//!
//! The debounce is modelled as an explicit state machine rather than via
//! closure-captured timers, so the debounce invariants are directly
//! testable: `Idle` while quiescent, `Scheduled(deadline)` while a trailing
//! timer is armed, `Processing` while a read+diff is in flight. The
//! `Processing` state is the overlap-prevention latch: events that arrive
//! while it's set are queued on the channel and picked up fresh once
//! processing completes, rather than scheduling a second concurrent run.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use git_core::{ActivityKind, GitExecutor, GitStateReader};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::events::EventEmitter;
use crate::repo_store::RepoConfig;
use crate::repo_store::RepoStore;

#[derive(Debug, Error)]
pub enum GitWatcherError {
    #[error("path is not a git repository")]
    NotGitRepo,
    #[error("failed to create filesystem watcher: {0}")]
    WatcherCreation(#[from] notify::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Scheduled,
    Processing,
}

enum WatchSignal {
    Changed,
    Error(String),
}

struct ActiveWatcher {
    _fs_watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    state: Arc<Mutex<DebounceState>>,
}

impl Drop for ActiveWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Manages one `GitWatcher` instance per repo-id. A `ProjectWatcher` owns one
/// of these per watched project and drives `start`/`stop` per repo.
pub struct GitWatcher {
    executor: Arc<GitExecutor>,
    reader: Arc<GitStateReader>,
    store: RepoStore,
    debounce: Duration,
    active: Mutex<HashMap<Uuid, ActiveWatcher>>,
}

impl GitWatcher {
    pub fn new(
        executor: Arc<GitExecutor>,
        reader: Arc<GitStateReader>,
        store: RepoStore,
        debounce: Duration,
    ) -> Self {
        Self {
            executor,
            reader,
            store,
            debounce,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_watching(&self, repo_id: Uuid) -> bool {
        self.active.lock().contains_key(&repo_id)
    }

    pub fn stop(&self, repo_id: Uuid) {
        self.active.lock().remove(&repo_id);
    }

    /// Begins observation for `config`. On a non-repo path, emits a single
    /// `ERROR{command:"validation"}` activity and returns without starting
    /// a watcher.
    pub async fn start(&self, config: RepoConfig, emitter: EventEmitter) -> Result<(), GitWatcherError> {
        if !self.executor.is_git_repository(&config.path).await {
            emitter.emit_activity(git_core::Activity {
                project_id: config.project_id,
                repo_id: config.id,
                kind: ActivityKind::Error {
                    message: format!("{} is not a git repository", config.path.display()),
                    command: Some("validation".to_string()),
                    changed_path: None,
                },
                at: Utc::now(),
            });
            return Ok(());
        }

        let git_dir = config.path.join(".git");
        let (tx, rx) = mpsc::unbounded_channel::<WatchSignal>();

        let mut fs_watcher = RecommendedWatcher::new(
            {
                let tx = tx.clone();
                move |res: Result<notify::Event, notify::Error>| match res {
                    Ok(_event) => {
                        let _ = tx.send(WatchSignal::Changed);
                    }
                    Err(e) => {
                        let _ = tx.send(WatchSignal::Error(e.to_string()));
                    }
                }
            },
            notify::Config::default(),
        )?;

        for sub in ["HEAD", "index", "refs"] {
            let path = git_dir.join(sub);
            if !path.exists() {
                continue;
            }
            let mode = if path.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            if let Err(e) = fs_watcher.watch(&path, mode) {
                tracing::debug!("failed to watch {:?}: {e}", path);
            }
        }

        let state = Arc::new(Mutex::new(DebounceState::Idle));
        let task = spawn_debounce_loop(
            rx,
            Arc::clone(&state),
            self.debounce,
            config.clone(),
            Arc::clone(&self.reader),
            self.store.clone(),
            emitter,
        );

        self.active.lock().insert(
            config.id,
            ActiveWatcher {
                _fs_watcher: fs_watcher,
                task,
                state,
            },
        );

        Ok(())
    }

    #[cfg(test)]
    fn debounce_state(&self, repo_id: Uuid) -> Option<DebounceState> {
        self.active.lock().get(&repo_id).map(|w| *w.state.lock())
    }
}

fn spawn_debounce_loop(
    mut rx: mpsc::UnboundedReceiver<WatchSignal>,
    state: Arc<Mutex<DebounceState>>,
    debounce: Duration,
    config: RepoConfig,
    reader: Arc<GitStateReader>,
    store: RepoStore,
    emitter: EventEmitter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let signal = match rx.recv().await {
                Some(s) => s,
                None => return,
            };
            if let WatchSignal::Error(msg) = signal {
                emit_error(&emitter, &config, "file-watching", msg, None);
                continue;
            }

            let mut deadline = Instant::now() + debounce;
            *state.lock() = DebounceState::Scheduled;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline.into()) => {
                        *state.lock() = DebounceState::Processing;
                        break;
                    }
                    next = rx.recv() => {
                        match next {
                            Some(WatchSignal::Changed) => {
                                deadline = Instant::now() + debounce;
                            }
                            Some(WatchSignal::Error(msg)) => {
                                emit_error(&emitter, &config, "file-watching", msg, None);
                            }
                            None => return,
                        }
                    }
                }
            }

            process_observation(&config, &reader, &store, &emitter).await;
            *state.lock() = DebounceState::Idle;
        }
    })
}

async fn process_observation(
    config: &RepoConfig,
    reader: &GitStateReader,
    store: &RepoStore,
    emitter: &EventEmitter,
) {
    let prev = store.get(config.id).and_then(|c| c.last);

    match reader.read_repo_state(&config.path).await {
        Ok(next) => {
            let activities = git_core::activity::detect_local(
                prev.as_ref(),
                &next,
                reader,
                &config.path,
                config.project_id,
                config.id,
                Utc::now(),
            )
            .await;
            for activity in activities {
                emitter.emit_activity(activity);
            }
            store.save_last(config.id, next);
        }
        Err(e) => {
            emit_error(
                emitter,
                config,
                "process-changes",
                e.to_string(),
                Some(config.path.display().to_string()),
            );
        }
    }
}

fn emit_error(
    emitter: &EventEmitter,
    config: &RepoConfig,
    command: &str,
    message: String,
    changed_path: Option<String>,
) {
    emitter.emit_activity(git_core::Activity {
        project_id: config.project_id,
        repo_id: config.id,
        kind: ActivityKind::Error {
            message,
            command: Some(command.to_string()),
            changed_path,
        },
        at: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(path: &Path) {
        std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(path)
            .output()
            .unwrap();
        std::process::Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(path)
            .output()
            .unwrap();
        std::process::Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(path)
            .output()
            .unwrap();
        std::fs::write(path.join("a.txt"), "hi").unwrap();
        std::process::Command::new("git")
            .args(["add", "."])
            .current_dir(path)
            .output()
            .unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "init"])
            .current_dir(path)
            .output()
            .unwrap();
    }

    fn setup() -> (tempfile::TempDir, GitWatcher, RepoStore) {
        let dir = tempfile::TempDir::new().unwrap();
        init_repo(dir.path());
        let store = RepoStore::new();
        let watcher = GitWatcher::new(
            Arc::new(GitExecutor::new()),
            Arc::new(GitStateReader::new()),
            store.clone(),
            Duration::from_millis(50),
        );
        (dir, watcher, store)
    }

    #[tokio::test]
    async fn test_start_rejects_non_repo_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RepoStore::new();
        let watcher = GitWatcher::new(
            Arc::new(GitExecutor::new()),
            Arc::new(GitStateReader::new()),
            store.clone(),
            Duration::from_millis(50),
        );
        let (emitter, mut activities, _system) = EventEmitter::channel();
        let config = RepoConfig::new(Uuid::new_v4(), dir.path().to_path_buf());
        watcher.start(config, emitter).await.unwrap();

        let activity = activities.recv().await.unwrap();
        assert!(matches!(
            activity.kind,
            ActivityKind::Error { command: Some(c), .. } if c == "validation"
        ));
        assert!(!watcher.is_watching(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_start_watches_valid_repo() {
        let (dir, watcher, _store) = setup();
        let (emitter, _activities, _system) = EventEmitter::channel();
        let config = RepoConfig::new(Uuid::new_v4(), dir.path().to_path_buf());
        let id = config.id;
        watcher.start(config, emitter).await.unwrap();
        assert!(watcher.is_watching(id));
        watcher.stop(id);
        assert!(!watcher.is_watching(id));
    }

    #[tokio::test]
    async fn test_debounced_commit_emits_activity() {
        let (dir, watcher, store) = setup();
        let (emitter, mut activities, _system) = EventEmitter::channel();
        let config = RepoConfig::new(Uuid::new_v4(), dir.path().to_path_buf());
        let id = config.id;

        // Seed `last` as if this is not the first observation, matching the
        // state after an initial read.
        let reader = GitStateReader::new();
        let initial = reader.read_repo_state(dir.path()).await.unwrap();
        store.upsert(config.clone());
        store.save_last(id, initial);

        watcher.start(config, emitter).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        std::process::Command::new("git")
            .args(["commit", "-aq", "-m", "second"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        let activity = tokio::time::timeout(Duration::from_secs(3), activities.recv())
            .await
            .expect("activity within timeout")
            .expect("channel open");
        assert!(matches!(activity.kind, ActivityKind::Commit { .. }));
    }

    #[tokio::test]
    async fn test_rapid_events_fold_into_one_activity() {
        let (dir, watcher, store) = setup();
        let (emitter, mut activities, _system) = EventEmitter::channel();
        let config = RepoConfig::new(Uuid::new_v4(), dir.path().to_path_buf());
        let id = config.id;

        let reader = GitStateReader::new();
        let initial = reader.read_repo_state(dir.path()).await.unwrap();
        store.upsert(config.clone());
        store.save_last(id, initial);

        watcher.start(config, emitter).await.unwrap();

        // Ten filesystem touches 5ms apart, well inside the 50ms debounce
        // window, followed by the commit that should be the only thing
        // observed once the trailing edge fires.
        for i in 0..10 {
            std::fs::write(dir.path().join("churn.txt"), format!("{i}")).unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        std::process::Command::new("git")
            .args(["commit", "-aq", "-m", "second"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        let activity = tokio::time::timeout(Duration::from_secs(3), activities.recv())
            .await
            .expect("activity within timeout")
            .expect("channel open");
        assert!(matches!(activity.kind, ActivityKind::Commit { .. }));

        // The ten touches folded into the same debounce window as the
        // commit: nothing else should have been queued.
        assert!(activities.try_recv().is_err());

        watcher.stop(id);
    }
}
