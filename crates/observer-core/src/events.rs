//! The two outbound channels every component writes to: the activity stream
//! and the manager-level system-event line.
//!
//! Per the design notes, the activity stream is a typed channel owned by J
//! rather than an ambient global listener — every component that can emit
//! gets a cheap clone of this struct instead of a back-reference to J.

use git_core::Activity;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// `{evt, projectId, repoId?, error?}` manager-level status line.
///
/// Kept distinct from `Activity`'s `ERROR` variant: the source conflated the
/// two (an `"ERROR"` activity sometimes meant "watch stopped", not "this
/// repo observation failed") — here a watch lifecycle transition is always a
/// `SystemEvent`, and `ActivityKind::Error` is reserved for a diagnostic tied
/// to a specific observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SystemEventKind {
    WatchingOn,
    WatchingOff,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub evt: SystemEventKind,
    pub project_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const CHANNEL_CAPACITY: usize = 1024;

/// Cheaply-cloned handle to the two outbound channels. `emit_activity` /
/// `emit_system` never block the caller: a full channel means no one is
/// reading the stream, and the event is dropped rather than stalling a
/// watcher's hot path.
#[derive(Clone)]
pub struct EventEmitter {
    activities: mpsc::Sender<Activity>,
    system: mpsc::Sender<SystemEvent>,
}

impl EventEmitter {
    pub fn channel() -> (Self, mpsc::Receiver<Activity>, mpsc::Receiver<SystemEvent>) {
        let (activities_tx, activities_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (system_tx, system_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                activities: activities_tx,
                system: system_tx,
            },
            activities_rx,
            system_rx,
        )
    }

    pub fn emit_activity(&self, activity: Activity) {
        if self.activities.try_send(activity).is_err() {
            tracing::debug!("activity channel full or closed, dropping event");
        }
    }

    pub fn emit_system(&self, event: SystemEvent) {
        if self.system.try_send(event).is_err() {
            tracing::debug!("system event channel full or closed, dropping event");
        }
    }
}
