//! Narrow adapter interface over the external row-oriented persistence API.
//!
//! The core never owns a concrete Sink implementation — it only depends on
//! this trait, so an embedder can back it with whatever store they like (see
//! `observer-sink-memory` for a reference implementation used in tests and
//! the demo binary).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git_core::ActivityKind;
use thiserror::Error;
use uuid::Uuid;

use crate::live_activity::FileChangeType;

#[derive(Debug, Error)]
#[error("sink call failed (transient={transient})")]
pub struct SinkError {
    pub transient: bool,
}

impl SinkError {
    pub fn transient(msg: impl Into<String>) -> Self {
        tracing::warn!("transient sink error: {}", msg.into());
        Self { transient: true }
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        tracing::warn!("sink error: {}", msg.into());
        Self { transient: false }
    }
}

/// One emitted activity, addressed with enough context for the Sink to
/// route/dedupe it. Carries the typed kind from `git-core` rather than a
/// duck-typed payload.
#[derive(Debug, Clone)]
pub struct LiveActivityRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub repo_id: Uuid,
    pub session_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub at: DateTime<Utc>,
}

/// Row produced by `sync_file_changes`; mirrors the `FileChange` aggregate
/// owned by the live-activity monitor.
#[derive(Debug, Clone)]
pub struct FileChangeRow {
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

/// Derived projection over a project's active sessions.
#[derive(Debug, Clone)]
pub struct TeamAwareness {
    pub user_id: Uuid,
    pub status: String,
    pub current_branch: Option<String>,
    pub current_file: Option<String>,
    pub last_commit_message: Option<String>,
    pub repository_path: Option<String>,
    pub working_on: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
}

/// The ten operations the core needs from the external Sink. All calls are
/// expected to be idempotent; the core retries none of them synchronously.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn sync_watched_projects(&self, user_id: Uuid) -> Result<Vec<Uuid>, SinkError>;
    async fn get_watched_project_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, SinkError>;
    async fn is_project_watched(&self, project_id: Uuid, user_id: Uuid) -> Result<bool, SinkError>;
    async fn toggle_project_watch(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        on: bool,
    ) -> Result<(), SinkError>;
    async fn sync_live_activity(&self, record: LiveActivityRecord) -> Result<(), SinkError>;
    async fn sync_file_changes(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        project_id: Uuid,
        changes: Vec<FileChangeRow>,
    ) -> Result<(), SinkError>;
    async fn cleanup_old_data(&self) -> Result<(), SinkError>;
    async fn get_team_awareness(&self, project_id: Uuid) -> Result<Vec<TeamAwareness>, SinkError>;
    async fn get_recent_activities(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<Vec<LiveActivityRecord>, SinkError>;
}

/// A [`Sink`] that discards everything and reports no projects as watched.
/// Useful for tests and for running the demo binary with no real backing
/// store configured.
pub mod noop {
    use async_trait::async_trait;
    use uuid::Uuid;

    use super::{FileChangeRow, LiveActivityRecord, Sink, SinkError, TeamAwareness};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct NoopSink;

    #[async_trait]
    impl Sink for NoopSink {
        async fn sync_watched_projects(&self, _user_id: Uuid) -> Result<Vec<Uuid>, SinkError> {
            Ok(Vec::new())
        }

        async fn get_watched_project_ids(&self, _user_id: Uuid) -> Result<Vec<Uuid>, SinkError> {
            Ok(Vec::new())
        }

        async fn is_project_watched(&self, _project_id: Uuid, _user_id: Uuid) -> Result<bool, SinkError> {
            Ok(false)
        }

        async fn toggle_project_watch(
            &self,
            _project_id: Uuid,
            _user_id: Uuid,
            _on: bool,
        ) -> Result<(), SinkError> {
            Ok(())
        }

        async fn sync_live_activity(&self, _record: LiveActivityRecord) -> Result<(), SinkError> {
            Ok(())
        }

        async fn sync_file_changes(
            &self,
            _session_id: Uuid,
            _user_id: Uuid,
            _project_id: Uuid,
            _changes: Vec<FileChangeRow>,
        ) -> Result<(), SinkError> {
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
            _project_id: Uuid,
            _limit: usize,
        ) -> Result<Vec<LiveActivityRecord>, SinkError> {
            Ok(Vec::new())
        }
    }

}
