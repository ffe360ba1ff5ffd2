//! In-memory keyed store of `RepoConfig`, indexed by repo-id and project-id.
//!
//! The only structure touched from multiple threads; every operation takes
//! the lock for the duration of the call, so callers never observe a torn
//! read across the two indexes.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

use git_core::RepoState;
use parking_lot::RwLock;
use uuid::Uuid;

/// Lifecycle record for one watched working tree.
///
/// `last` is populated on first successful read and overwritten after every
/// successful diff; watchers hold their own snapshot+callback and only ever
/// push updates back through [`RepoStore::save_last`].
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub id: Uuid,
    pub project_id: Uuid,
    pub path: PathBuf,
    pub watching: bool,
    pub last: Option<RepoState>,
}

impl RepoConfig {
    pub fn new(project_id: Uuid, path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            path,
            watching: false,
            last: None,
        }
    }
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<Uuid, RepoConfig>,
    by_project: HashMap<Uuid, Vec<Uuid>>,
}

/// Thread-safe associative store with two indexes, `by_id` and `by_project`.
#[derive(Clone, Default)]
pub struct RepoStore {
    inner: Arc<RwLock<Indexes>>,
}

impl RepoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, config: RepoConfig) {
        let mut idx = self.inner.write();
        let project_id = config.project_id;
        let id = config.id;
        if idx.by_id.insert(id, config).is_none() {
            idx.by_project.entry(project_id).or_default().push(id);
        }
    }

    pub fn remove(&self, repo_id: Uuid) {
        let mut idx = self.inner.write();
        if let Some(config) = idx.by_id.remove(&repo_id)
            && let Some(ids) = idx.by_project.get_mut(&config.project_id)
        {
            ids.retain(|id| *id != repo_id);
            if ids.is_empty() {
                idx.by_project.remove(&config.project_id);
            }
        }
    }

    pub fn get(&self, repo_id: Uuid) -> Option<RepoConfig> {
        self.inner.read().by_id.get(&repo_id).cloned()
    }

    pub fn list_by_project(&self, project_id: Uuid) -> Vec<RepoConfig> {
        let idx = self.inner.read();
        idx.by_project
            .get(&project_id)
            .map(|ids| ids.iter().filter_map(|id| idx.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// No-op if the repo is absent. The only mutator called from a watcher's
    /// hot path.
    pub fn save_last(&self, repo_id: Uuid, state: RepoState) {
        let mut idx = self.inner.write();
        if let Some(config) = idx.by_id.get_mut(&repo_id) {
            config.last = Some(state);
        }
    }

    pub fn size(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn all(&self) -> Vec<RepoConfig> {
        self.inner.read().by_id.values().cloned().collect()
    }
}
