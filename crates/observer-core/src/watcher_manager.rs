//! Lifecycle + restore of `ProjectWatcher`s from the `RepoStore`.

use std::{collections::HashMap, sync::Arc, time::Duration};

use git_core::{GitExecutor, GitStateReader};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::events::EventEmitter;
use crate::project_watcher::ProjectWatcher;
use crate::repo_store::{RepoConfig, RepoStore};

pub struct ProjectWatcherManager {
    store: RepoStore,
    executor: Arc<GitExecutor>,
    reader: Arc<GitStateReader>,
    emitter: EventEmitter,
    debounce: Duration,
    remote_poll_interval: Duration,
    watchers: RwLock<HashMap<Uuid, Arc<ProjectWatcher>>>,
}

impl ProjectWatcherManager {
    pub fn new(
        store: RepoStore,
        executor: Arc<GitExecutor>,
        reader: Arc<GitStateReader>,
        emitter: EventEmitter,
        debounce: Duration,
        remote_poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            reader,
            emitter,
            debounce,
            remote_poll_interval,
            watchers: RwLock::new(HashMap::new()),
        }
    }

    /// Groups the store's repos by project; for every group with at least
    /// one `watching=true` entry, starts its project watcher.
    pub async fn restore_watching_projects(&self) {
        let mut by_project: HashMap<Uuid, Vec<RepoConfig>> = HashMap::new();
        for repo in self.store.all() {
            by_project.entry(repo.project_id).or_default().push(repo);
        }
        for (project_id, repos) in by_project {
            if repos.iter().any(|r| r.watching) {
                self.start_watching(project_id).await;
            }
        }
    }

    pub async fn start_watching(&self, project_id: Uuid) {
        if self.watchers.read().contains_key(&project_id) {
            return;
        }
        let watcher = Arc::new(ProjectWatcher::new(
            project_id,
            self.store.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.reader),
            self.emitter.clone(),
            self.debounce,
            self.remote_poll_interval,
        ));
        let repos = self.store.list_by_project(project_id);
        watcher.start(repos).await;
        self.watchers.write().insert(project_id, watcher);
    }

    pub fn stop_watching(&self, project_id: Uuid) {
        if let Some(watcher) = self.watchers.write().remove(&project_id) {
            watcher.stop();
        }
    }

    pub fn is_watching(&self, project_id: Uuid) -> bool {
        self.watchers
            .read()
            .get(&project_id)
            .map(|w| w.is_watching())
            .unwrap_or(false)
    }

    /// Always updates the store; only forwards to a running project watcher
    /// (creates none if the project isn't currently being watched).
    pub async fn add_repository(&self, config: RepoConfig) {
        self.store.upsert(config.clone());
        if let Some(watcher) = self.watchers.read().get(&config.project_id).cloned() {
            watcher.add_repository(config).await;
        }
    }

    pub fn remove_repository(&self, repo_id: Uuid) {
        if let Some(repo) = self.store.get(repo_id) {
            if let Some(watcher) = self.watchers.read().get(&repo.project_id).cloned() {
                watcher.remove_repository(repo_id);
            }
            self.store.remove(repo_id);
        }
    }

    pub async fn update_repository(&self, config: RepoConfig) {
        self.store.upsert(config.clone());
        if let Some(watcher) = self.watchers.read().get(&config.project_id).cloned() {
            watcher.update_repository(config).await;
        }
    }

    pub fn stop_all(&self) {
        let mut watchers = self.watchers.write();
        for (_, watcher) in watchers.drain() {
            watcher.stop();
        }
    }

    pub fn active_project_count(&self) -> usize {
        self.watchers.read().len()
    }
}
