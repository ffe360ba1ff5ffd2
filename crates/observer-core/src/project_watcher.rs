//! One per watched project: owns a `GitWatcher` registry for its repos plus
//! a remote-polling timer that runs `fetch` + `detect_remote` serially.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use git_core::{ActivityKind, GitExecutor, GitStateReader};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::events::EventEmitter;
use crate::git_watcher::GitWatcher;
use crate::repo_store::{RepoConfig, RepoStore};

/// `Idle -> Watching -> Idle`. `start`/`stop` are serialised by the
/// `RwLock` around the running state; overlapping `start` calls observe
/// `Watching` and no-op with a warning, `stop` is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Watching,
}

pub struct ProjectWatcher {
    project_id: Uuid,
    store: RepoStore,
    git_watcher: Arc<GitWatcher>,
    reader: Arc<GitStateReader>,
    executor: Arc<GitExecutor>,
    emitter: EventEmitter,
    remote_poll_interval: Duration,
    state: RwLock<RunState>,
    repos: Arc<RwLock<Vec<RepoConfig>>>,
    poll_task: RwLock<Option<JoinHandle<()>>>,
}

impl ProjectWatcher {
    pub fn new(
        project_id: Uuid,
        store: RepoStore,
        executor: Arc<GitExecutor>,
        reader: Arc<GitStateReader>,
        emitter: EventEmitter,
        debounce: Duration,
        remote_poll_interval: Duration,
    ) -> Self {
        Self {
            project_id,
            git_watcher: Arc::new(GitWatcher::new(
                Arc::clone(&executor),
                Arc::clone(&reader),
                store.clone(),
                debounce,
            )),
            store,
            reader,
            executor,
            emitter,
            remote_poll_interval,
            state: RwLock::new(RunState::Idle),
            repos: Arc::new(RwLock::new(Vec::new())),
            poll_task: RwLock::new(None),
        }
    }

    pub fn is_watching(&self) -> bool {
        *self.state.read() == RunState::Watching
    }

    pub async fn start(&self, repos: Vec<RepoConfig>) {
        {
            let mut state = self.state.write();
            if *state == RunState::Watching {
                tracing::warn!(project_id = %self.project_id, "start called while already watching; ignoring");
                return;
            }
            *state = RunState::Watching;
        }

        *self.repos.write() = repos.clone();

        for repo in &repos {
            self.git_watcher.start(repo.clone(), self.emitter.clone()).await.ok();
        }

        let mut has_remote = false;
        for repo in &repos {
            let remotes_nonempty = match &repo.last {
                Some(state) => !state.remote_urls.is_empty(),
                None => !self.reader.get_remote_urls(&repo.path).await.is_empty(),
            };
            if remotes_nonempty {
                has_remote = true;
                break;
            }
        }
        if has_remote {
            self.arm_remote_timer();
        }

        self.emitter.emit_system(crate::events::SystemEvent {
            evt: crate::events::SystemEventKind::WatchingOn,
            project_id: self.project_id,
            repo_id: None,
            error: None,
        });
    }

    pub fn stop(&self) {
        let mut state = self.state.write();
        if *state == RunState::Idle {
            return;
        }
        *state = RunState::Idle;
        drop(state);

        if let Some(task) = self.poll_task.write().take() {
            task.abort();
        }
        for repo in self.repos.read().iter() {
            self.git_watcher.stop(repo.id);
        }
        self.emitter.emit_system(crate::events::SystemEvent {
            evt: crate::events::SystemEventKind::WatchingOff,
            project_id: self.project_id,
            repo_id: None,
            error: None,
        });
    }

    pub async fn add_repository(&self, config: RepoConfig) {
        self.repos.write().push(config.clone());
        if config.watching && self.is_watching() {
            self.git_watcher.start(config, self.emitter.clone()).await.ok();
        }
    }

    pub fn remove_repository(&self, repo_id: Uuid) {
        self.repos.write().retain(|r| r.id != repo_id);
        self.git_watcher.stop(repo_id);
    }

    pub async fn update_repository(&self, config: RepoConfig) {
        let was_watching = self.git_watcher.is_watching(config.id);
        {
            let mut repos = self.repos.write();
            if let Some(slot) = repos.iter_mut().find(|r| r.id == config.id) {
                *slot = config.clone();
            }
        }
        match (was_watching, config.watching) {
            (false, true) => {
                self.git_watcher.start(config, self.emitter.clone()).await.ok();
            }
            (true, false) => {
                self.git_watcher.stop(config.id);
            }
            _ => {}
        }
    }

    fn arm_remote_timer(&self) {
        let project_id = self.project_id;
        let store = self.store.clone();
        let executor = Arc::clone(&self.executor);
        let reader = Arc::clone(&self.reader);
        let emitter = self.emitter.clone();
        let interval = self.remote_poll_interval;
        let repos = Arc::clone(&self.repos);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                let current = repos.read().clone();
                for repo in current {
                    poll_remote(&repo, &store, &executor, &reader, &emitter, project_id).await;
                }
            }
        });
        *self.poll_task.write() = Some(task);
    }
}

async fn poll_remote(
    repo: &RepoConfig,
    store: &RepoStore,
    executor: &GitExecutor,
    reader: &GitStateReader,
    emitter: &EventEmitter,
    project_id: Uuid,
) {
    let state_before = match reader.read_repo_state(&repo.path).await {
        Ok(s) => s,
        Err(e) => {
            emit_poll_error(emitter, repo, project_id, e.to_string());
            return;
        }
    };
    if let Err(e) = executor.fetch_prune(&repo.path).await {
        emit_poll_error(emitter, repo, project_id, e.to_string());
        return;
    }
    let state_after = match reader.read_repo_state(&repo.path).await {
        Ok(s) => s,
        Err(e) => {
            emit_poll_error(emitter, repo, project_id, e.to_string());
            return;
        }
    };

    let activities = git_core::activity::detect_remote(
        Some(&state_before),
        &state_after,
        reader,
        &repo.path,
        project_id,
        repo.id,
        Utc::now(),
    )
    .await;
    for activity in activities {
        emitter.emit_activity(activity);
    }
    store.save_last(repo.id, state_after);
}

fn emit_poll_error(emitter: &EventEmitter, repo: &RepoConfig, project_id: Uuid, message: String) {
    emitter.emit_activity(git_core::Activity {
        project_id,
        repo_id: repo.id,
        kind: ActivityKind::Error {
            message,
            command: Some("remote-polling".to_string()),
            changed_path: None,
        },
        at: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(path: &std::path::Path) {
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

    #[tokio::test]
    async fn test_start_stop_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        init_repo(dir.path());
        let store = RepoStore::new();
        let (emitter, _a, mut system) = EventEmitter::channel();
        let watcher = ProjectWatcher::new(
            Uuid::new_v4(),
            store,
            Arc::new(GitExecutor::new()),
            Arc::new(GitStateReader::new()),
            emitter,
            Duration::from_millis(50),
            Duration::from_secs(120),
        );

        let config = RepoConfig::new(Uuid::new_v4(), dir.path().to_path_buf());
        watcher.start(vec![config]).await;
        assert!(watcher.is_watching());

        watcher.start(vec![]).await; // no-op
        assert!(watcher.is_watching());

        watcher.stop();
        assert!(!watcher.is_watching());
        watcher.stop(); // idempotent

        let on = system.recv().await.unwrap();
        assert_eq!(on.evt, crate::events::SystemEventKind::WatchingOn);
        let off = system.recv().await.unwrap();
        assert_eq!(off.evt, crate::events::SystemEventKind::WatchingOff);
    }

    #[tokio::test]
    async fn test_add_and_remove_repository() {
        let dir = tempfile::TempDir::new().unwrap();
        init_repo(dir.path());
        let store = RepoStore::new();
        let (emitter, _a, _s) = EventEmitter::channel();
        let watcher = ProjectWatcher::new(
            Uuid::new_v4(),
            store,
            Arc::new(GitExecutor::new()),
            Arc::new(GitStateReader::new()),
            emitter,
            Duration::from_millis(50),
            Duration::from_secs(120),
        );
        watcher.start(vec![]).await;

        let mut config = RepoConfig::new(Uuid::new_v4(), dir.path().to_path_buf());
        config.watching = true;
        let id = config.id;
        watcher.add_repository(config).await;
        assert!(watcher.git_watcher.is_watching(id));

        watcher.remove_repository(id);
        assert!(!watcher.git_watcher.is_watching(id));
    }
}
