//! Top-level coordinator: reconciles project watchers against the Sink's
//! watched set, wires every emitted activity through the live-activity
//! monitor and the Sink, and runs a periodic reconciliation timer.

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use git_core::{Activity, ActivityKind, GitExecutor, GitStateReader};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::config::ObserverConfig;
use crate::events::EventEmitter;
use crate::live_activity::LiveActivityMonitor;
use crate::repo_store::{RepoConfig, RepoStore};
use crate::sink::{FileChangeRow, LiveActivityRecord, Sink, TeamAwareness};
use crate::watcher_manager::ProjectWatcherManager;

/// Supplies the repo-config mapping for a project; the embedder owns
/// whatever persistent store actually holds project→repo mappings.
#[async_trait]
pub trait RepoConfigProvider: Send + Sync {
    async fn list_repos(&self, project_id: Uuid) -> Vec<RepoConfig>;
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Sink(#[from] crate::sink::SinkError),
    #[error("project {0} is already being monitored")]
    AlreadyMonitoring(Uuid),
    #[error("project {0} is not watched for this user")]
    NotWatched(Uuid),
}

/// `{success:false, error:string}` wire shape for control operations.
#[derive(Debug, Clone)]
pub struct ControlError {
    pub error: String,
}

impl From<BackendError> for ControlError {
    fn from(e: BackendError) -> Self {
        Self { error: e.to_string() }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub user_id: Uuid,
    pub enable_live_activity: bool,
    pub sync_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub is_running: bool,
    pub watched_projects: Vec<Uuid>,
    pub active_watchers: usize,
    pub config: BackendConfig,
}

pub struct GitMonitoringBackend {
    store: RepoStore,
    reader: Arc<GitStateReader>,
    manager: Arc<ProjectWatcherManager>,
    live_activity: Arc<LiveActivityMonitor>,
    sink: Arc<dyn Sink>,
    repo_provider: Arc<dyn RepoConfigProvider>,
    config: RwLock<BackendConfig>,
    heartbeat_interval: Duration,
    live_sync_interval: Duration,
    watched_projects: RwLock<HashSet<Uuid>>,
    sessions: dashmap::DashMap<(Uuid, Uuid), Uuid>,
    activity_task: RwLock<Option<JoinHandle<()>>>,
    reconcile_task: RwLock<Option<JoinHandle<()>>>,
    live_activity_tasks: RwLock<Vec<JoinHandle<()>>>,
    running: RwLock<bool>,
}

impl GitMonitoringBackend {
    pub fn new(
        sink: Arc<dyn Sink>,
        repo_provider: Arc<dyn RepoConfigProvider>,
        observer_config: &ObserverConfig,
        backend_config: BackendConfig,
    ) -> (Arc<Self>, mpsc::Receiver<Activity>, mpsc::Receiver<crate::events::SystemEvent>) {
        let store = RepoStore::new();
        let executor = Arc::new(GitExecutor::new());
        let reader = Arc::new(GitStateReader::new());
        let (emitter, activities_rx, system_rx) = EventEmitter::channel();

        let manager = Arc::new(ProjectWatcherManager::new(
            store.clone(),
            Arc::clone(&executor),
            Arc::clone(&reader),
            emitter,
            observer_config.debounce(),
            observer_config.remote_poll_interval(),
        ));
        let live_activity = Arc::new(LiveActivityMonitor::new(
            Arc::clone(&reader),
            Arc::clone(&sink),
            observer_config.session_timeout(),
        ));

        let backend = Arc::new(Self {
            store,
            reader,
            manager,
            live_activity,
            sink,
            repo_provider,
            config: RwLock::new(backend_config),
            heartbeat_interval: observer_config.heartbeat_interval(),
            live_sync_interval: observer_config.sync_interval(),
            watched_projects: RwLock::new(HashSet::new()),
            sessions: dashmap::DashMap::new(),
            activity_task: RwLock::new(None),
            reconcile_task: RwLock::new(None),
            live_activity_tasks: RwLock::new(Vec::new()),
            running: RwLock::new(false),
        });

        (backend, activities_rx, system_rx)
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Drives the activity stream: spawn as a task owning `activities_rx`
    /// from [`GitMonitoringBackend::new`] so every emitted activity is
    /// routed through [`Self::handle_activity`].
    pub fn spawn_activity_router(self: &Arc<Self>, mut activities_rx: mpsc::Receiver<Activity>) {
        let backend = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(activity) = activities_rx.recv().await {
                backend.handle_activity(activity).await;
            }
        });
        *self.activity_task.write() = Some(task);
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), ControlError> {
        {
            let mut running = self.running.write();
            if *running {
                return Ok(());
            }
            *running = true;
        }

        let user_id = self.config.read().user_id;
        let watched = match self.sink.sync_watched_projects(user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                *self.running.write() = false;
                return Err(BackendError::from(e).into());
            }
        };

        let mut started = Vec::new();
        for project_id in watched {
            match self.start_project_monitoring(project_id).await {
                Ok(()) => started.push(project_id),
                Err(e) => {
                    for p in started {
                        self.stop_project_monitoring(p);
                    }
                    *self.running.write() = false;
                    return Err(e.into());
                }
            }
        }

        self.arm_reconciliation_timer();
        self.arm_live_activity_timers();
        Ok(())
    }

    pub fn stop(self: &Arc<Self>) {
        let mut running = self.running.write();
        if !*running {
            return;
        }
        *running = false;
        drop(running);

        if let Some(task) = self.reconcile_task.write().take() {
            task.abort();
        }
        for task in self.live_activity_tasks.write().drain(..) {
            task.abort();
        }
        self.manager.stop_all();
        let live_activity = Arc::clone(&self.live_activity);
        tokio::spawn(async move {
            live_activity.stop_all().await;
        });
        self.watched_projects.write().clear();
        self.sessions.clear();
    }

    pub async fn start_project_monitoring(&self, project_id: Uuid) -> Result<(), BackendError> {
        if self.watched_projects.read().contains(&project_id) {
            return Err(BackendError::AlreadyMonitoring(project_id));
        }
        let user_id = self.config.read().user_id;
        if !self.sink.is_project_watched(project_id, user_id).await? {
            return Err(BackendError::NotWatched(project_id));
        }

        let repos = self.repo_provider.list_repos(project_id).await;
        for repo in &repos {
            self.store.upsert(repo.clone());
        }
        self.manager.start_watching(project_id).await;

        let enable_live_activity = self.config.read().enable_live_activity;
        if enable_live_activity {
            for repo in repos.iter().filter(|r| r.watching) {
                if let Ok(session_id) = self.live_activity.start_monitoring(user_id, repo).await {
                    self.sessions.insert((project_id, repo.id), session_id);
                }
            }
        }

        self.watched_projects.write().insert(project_id);
        Ok(())
    }

    pub fn stop_project_monitoring(&self, project_id: Uuid) {
        self.manager.stop_watching(project_id);
        self.watched_projects.write().remove(&project_id);
        let to_remove: Vec<(Uuid, Uuid)> = self
            .sessions
            .iter()
            .filter(|e| e.key().0 == project_id)
            .map(|e| *e.key())
            .collect();
        let live_activity = Arc::clone(&self.live_activity);
        let sessions = to_remove
            .iter()
            .filter_map(|k| self.sessions.remove(k).map(|(_, v)| v))
            .collect::<Vec<_>>();
        tokio::spawn(async move {
            for session_id in sessions {
                live_activity.stop_monitoring(session_id).await;
            }
        });
    }

    pub async fn toggle_project_watch(&self, project_id: Uuid, on: bool) -> Result<(), ControlError> {
        let user_id = self.config.read().user_id;
        self.sink
            .toggle_project_watch(project_id, user_id, on)
            .await
            .map_err(BackendError::from)?;
        if on {
            self.start_project_monitoring(project_id)
                .await
                .map_err(ControlError::from)?;
        } else {
            self.stop_project_monitoring(project_id);
        }
        Ok(())
    }

    /// Routes one emitted activity: updates the owning session's derived
    /// state, publishes it to the Sink, and — for the activity kinds that
    /// carry worktree changes — syncs the file-change aggregate too.
    pub async fn handle_activity(&self, activity: Activity) {
        let session_id = self
            .sessions
            .get(&(activity.project_id, activity.repo_id))
            .map(|e| *e.value());

        let enable_live_activity = self.config.read().enable_live_activity;
        if enable_live_activity && let Some(session_id) = session_id {
            self.live_activity.record_git_activity(session_id, &activity.kind);
        }

        let user_id = self.config.read().user_id;
        let record = LiveActivityRecord {
            id: Uuid::new_v4(),
            project_id: activity.project_id,
            repo_id: activity.repo_id,
            session_id,
            kind: activity.kind.clone(),
            at: activity.at,
        };
        if let Err(e) = self.sink.sync_live_activity(record).await {
            tracing::debug!("sync_live_activity failed (transient={}): {e}", e.transient);
        }

        if matches!(
            activity.kind,
            ActivityKind::WorktreeChange { .. } | ActivityKind::Commit { .. }
        ) {
            self.sync_file_changes_for(&activity, session_id, user_id).await;
        }
    }

    async fn sync_file_changes_for(&self, activity: &Activity, session_id: Option<Uuid>, user_id: Uuid) {
        let Some(repo) = self.store.get(activity.repo_id) else {
            return;
        };
        let Some(next) = &repo.last else {
            return;
        };
        let summaries = git_core::activity::detect_file_changes(&repo.path, next, &*self.reader).await;
        if summaries.is_empty() {
            return;
        }
        let rows: Vec<FileChangeRow> = summaries
            .into_iter()
            .map(|s| FileChangeRow {
                file_path: s.file_path.clone(),
                file_type: std::path::Path::new(&s.file_path)
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                change_type: s.change_type,
                lines_added: s.lines_added,
                lines_removed: s.lines_removed,
                characters_added: 0,
                characters_removed: 0,
                first_change_at: activity.at,
                last_change_at: activity.at,
            })
            .collect();

        if let Err(e) = self
            .sink
            .sync_file_changes(session_id.unwrap_or_default(), user_id, activity.project_id, rows)
            .await
        {
            tracing::debug!("sync_file_changes failed (transient={}): {e}", e.transient);
        }
    }

    pub fn get_team_awareness(&self, project_id: Uuid) -> Vec<TeamAwareness> {
        self.live_activity.get_team_awareness(project_id)
    }

    pub async fn get_recent_activities(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LiveActivityRecord>, ControlError> {
        self.sink
            .get_recent_activities(project_id, limit)
            .await
            .map_err(|e| BackendError::from(e).into())
    }

    pub fn get_status(&self) -> BackendStatus {
        BackendStatus {
            is_running: self.is_running(),
            watched_projects: self.watched_projects.read().iter().copied().collect(),
            active_watchers: self.manager.active_project_count(),
            config: self.config.read().clone(),
        }
    }

    fn arm_reconciliation_timer(self: &Arc<Self>) {
        let backend = Arc::clone(self);
        let interval = self.config.read().sync_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                backend.reconcile_tick().await;
            }
        });
        *self.reconcile_task.write() = Some(task);
    }

    /// Arms `G`'s two independent timers: `HEARTBEAT_INTERVAL` retires
    /// sessions idle past their timeout, `SYNC_INTERVAL` pushes live-session
    /// snapshots and file-change aggregates to the Sink. Run as separate
    /// loops since the two periods are independent and not a common
    /// multiple of one another in general.
    fn arm_live_activity_timers(self: &Arc<Self>) {
        let heartbeat_activity = Arc::clone(&self.live_activity);
        let heartbeat_interval = self.heartbeat_interval;
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                heartbeat_activity.heartbeat_tick().await;
            }
        });

        let sync_activity = Arc::clone(&self.live_activity);
        let sync_interval = self.live_sync_interval;
        let sync_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sync_activity.sync_tick().await;
            }
        });

        *self.live_activity_tasks.write() = vec![heartbeat_task, sync_task];
    }

    async fn reconcile_tick(&self) {
        if let Err(e) = self.sink.cleanup_old_data().await {
            tracing::debug!("cleanup_old_data failed (transient={}): {e}", e.transient);
        }

        let user_id = self.config.read().user_id;
        let fresh = match self.sink.sync_watched_projects(user_id).await {
            Ok(ids) => ids.into_iter().collect::<HashSet<_>>(),
            Err(e) => {
                tracing::debug!("sync_watched_projects failed (transient={}): {e}", e.transient);
                return;
            }
        };

        let current = self.watched_projects.read().clone();
        for project_id in fresh.difference(&current) {
            let _ = self.start_project_monitoring(*project_id).await;
        }
        for project_id in current.difference(&fresh) {
            self.stop_project_monitoring(*project_id);
        }
    }
}

impl Drop for GitMonitoringBackend {
    fn drop(&mut self) {
        if let Some(task) = self.activity_task.write().take() {
            task.abort();
        }
        if let Some(task) = self.reconcile_task.write().take() {
            task.abort();
        }
        for task in self.live_activity_tasks.write().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;

    struct FakeSink {
        watched: Vec<Uuid>,
    }

    #[async_trait]
    impl Sink for FakeSink {
        async fn sync_watched_projects(&self, _user_id: Uuid) -> Result<Vec<Uuid>, SinkError> {
            Ok(self.watched.clone())
        }
        async fn get_watched_project_ids(&self, _user_id: Uuid) -> Result<Vec<Uuid>, SinkError> {
            Ok(self.watched.clone())
        }
        async fn is_project_watched(&self, project_id: Uuid, _u: Uuid) -> Result<bool, SinkError> {
            Ok(self.watched.contains(&project_id))
        }
        async fn toggle_project_watch(&self, _p: Uuid, _u: Uuid, _on: bool) -> Result<(), SinkError> {
            Ok(())
        }
        async fn sync_live_activity(&self, _record: LiveActivityRecord) -> Result<(), SinkError> {
            Ok(())
        }
        async fn sync_file_changes(
            &self,
            _s: Uuid,
            _u: Uuid,
            _p: Uuid,
            _c: Vec<FileChangeRow>,
        ) -> Result<(), SinkError> {
            Ok(())
        }
        async fn cleanup_old_data(&self) -> Result<(), SinkError> {
            Ok(())
        }
        async fn get_team_awareness(&self, _p: Uuid) -> Result<Vec<TeamAwareness>, SinkError> {
            Ok(vec![])
        }
        async fn get_recent_activities(
            &self,
            _p: Uuid,
            _limit: usize,
        ) -> Result<Vec<LiveActivityRecord>, SinkError> {
            Ok(vec![])
        }
    }

    struct FakeProvider;

    #[async_trait]
    impl RepoConfigProvider for FakeProvider {
        async fn list_repos(&self, _project_id: Uuid) -> Vec<RepoConfig> {
            vec![]
        }
    }

    #[tokio::test]
    async fn test_start_with_no_watched_projects_is_running() {
        let sink: Arc<dyn Sink> = Arc::new(FakeSink { watched: vec![] });
        let provider: Arc<dyn RepoConfigProvider> = Arc::new(FakeProvider);
        let observer_config = ObserverConfig::default();
        let backend_config = BackendConfig {
            user_id: Uuid::new_v4(),
            enable_live_activity: true,
            sync_interval: Duration::from_secs(60),
        };
        let (backend, activities_rx, _system_rx) =
            GitMonitoringBackend::new(sink, provider, &observer_config, backend_config);
        backend.spawn_activity_router(activities_rx);

        backend.start().await.unwrap();
        assert!(backend.is_running());
        let status = backend.get_status();
        assert!(status.is_running);
        assert!(status.watched_projects.is_empty());

        backend.stop();
        assert!(!backend.is_running());
        backend.stop(); // idempotent
    }

    #[tokio::test]
    async fn test_start_project_monitoring_refuses_duplicates() {
        let project_id = Uuid::new_v4();
        let sink: Arc<dyn Sink> = Arc::new(FakeSink {
            watched: vec![project_id],
        });
        let provider: Arc<dyn RepoConfigProvider> = Arc::new(FakeProvider);
        let observer_config = ObserverConfig::default();
        let backend_config = BackendConfig {
            user_id: Uuid::new_v4(),
            enable_live_activity: false,
            sync_interval: Duration::from_secs(60),
        };
        let (backend, activities_rx, _system_rx) =
            GitMonitoringBackend::new(sink, provider, &observer_config, backend_config);
        backend.spawn_activity_router(activities_rx);

        backend.start().await.unwrap();
        let result = backend.start_project_monitoring(project_id).await;
        assert!(matches!(result, Err(BackendError::AlreadyMonitoring(_))));
    }
}
