//! Reference [`Sink`] backed by process memory — used by the demo binary
//! and the crate's own integration tests. Not meant for production use: a
//! real embedder backs the trait with whatever row store already holds
//! projects/sessions/activities.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use observer_core::{FileChangeRow, LiveActivityRecord, Sink, SinkError, TeamAwareness};
use parking_lot::RwLock;
use uuid::Uuid;

/// Upsert key for the file-change aggregate: a row belongs to one session's
/// view of one file. `session_id` is `None` when an activity couldn't be
/// tied to a live session (e.g. a remote-poll-only repo).
type FileChangeKey = (Option<Uuid>, String);

pub struct InMemorySink {
    watched: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
    activities: RwLock<HashMap<Uuid, Vec<LiveActivityRecord>>>,
    file_changes: RwLock<HashMap<FileChangeKey, FileChangeRow>>,
    retention_per_project: usize,
}

impl InMemorySink {
    pub fn new(retention_per_project: usize) -> Self {
        Self {
            watched: RwLock::new(HashMap::new()),
            activities: RwLock::new(HashMap::new()),
            file_changes: RwLock::new(HashMap::new()),
            retention_per_project,
        }
    }

    /// Snapshot of the merged file-change rows for one session, for tests
    /// and diagnostics — not part of the `Sink` contract.
    pub fn file_changes_for_session(&self, session_id: Uuid) -> Vec<FileChangeRow> {
        self.file_changes
            .read()
            .iter()
            .filter(|((sid, _), _)| *sid == Some(session_id))
            .map(|(_, row)| row.clone())
            .collect()
    }

    pub fn activity_count(&self, project_id: Uuid) -> usize {
        self.activities.read().get(&project_id).map(Vec::len).unwrap_or(0)
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn sync_watched_projects(&self, user_id: Uuid) -> Result<Vec<Uuid>, SinkError> {
        Ok(self
            .watched
            .read()
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn get_watched_project_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, SinkError> {
        self.sync_watched_projects(user_id).await
    }

    async fn is_project_watched(&self, project_id: Uuid, user_id: Uuid) -> Result<bool, SinkError> {
        Ok(self
            .watched
            .read()
            .get(&user_id)
            .is_some_and(|set| set.contains(&project_id)))
    }

    async fn toggle_project_watch(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        on: bool,
    ) -> Result<(), SinkError> {
        let mut watched = self.watched.write();
        let set = watched.entry(user_id).or_default();
        if on {
            set.insert(project_id);
        } else {
            set.remove(&project_id);
        }
        Ok(())
    }

    async fn sync_live_activity(&self, record: LiveActivityRecord) -> Result<(), SinkError> {
        let mut activities = self.activities.write();
        let bucket = activities.entry(record.project_id).or_default();
        bucket.push(record);
        if bucket.len() > self.retention_per_project {
            let overflow = bucket.len() - self.retention_per_project;
            bucket.drain(0..overflow);
        }
        Ok(())
    }

    async fn sync_file_changes(
        &self,
        session_id: Uuid,
        _user_id: Uuid,
        _project_id: Uuid,
        changes: Vec<FileChangeRow>,
    ) -> Result<(), SinkError> {
        let mut file_changes = self.file_changes.write();
        for incoming in changes {
            let key = (Some(session_id), incoming.file_path.clone());
            file_changes
                .entry(key)
                .and_modify(|existing| merge_file_change(existing, &incoming))
                .or_insert(incoming);
        }
        Ok(())
    }

    async fn cleanup_old_data(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn get_team_awareness(&self, _project_id: Uuid) -> Result<Vec<TeamAwareness>, SinkError> {
        Ok(Vec::new())
    }

    async fn get_recent_activities(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LiveActivityRecord>, SinkError> {
        let activities = self.activities.read();
        let Some(bucket) = activities.get(&project_id) else {
            return Ok(Vec::new());
        };
        Ok(bucket.iter().rev().take(limit).cloned().collect())
    }
}

/// Merges `incoming` into `existing`: counters take the max of the two
/// (they're cumulative-since-session-start snapshots, not deltas),
/// `change_type` takes the newer value, timestamps widen to the union.
fn merge_file_change(existing: &mut FileChangeRow, incoming: &FileChangeRow) {
    existing.lines_added = existing.lines_added.max(incoming.lines_added);
    existing.lines_removed = existing.lines_removed.max(incoming.lines_removed);
    existing.characters_added = existing.characters_added.max(incoming.characters_added);
    existing.characters_removed = existing.characters_removed.max(incoming.characters_removed);
    existing.change_type = incoming.change_type;
    existing.first_change_at = earliest(existing.first_change_at, incoming.first_change_at);
    existing.last_change_at = latest(existing.last_change_at, incoming.last_change_at);
}

fn earliest(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    if a <= b { a } else { b }
}

fn latest(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    if a >= b { a } else { b }
}
