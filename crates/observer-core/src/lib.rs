//! Coordinates git-core's pure detection logic into a running observer:
//! per-repo file-system watching with debounce (`git_watcher`), per-project
//! remote polling (`project_watcher`), restore-on-startup lifecycle
//! (`watcher_manager`), live work-tree session tracking (`live_activity`),
//! and the top-level reconciliation loop against an external Sink
//! (`backend`).

pub mod backend;
pub mod config;
pub mod events;
pub mod git_watcher;
pub mod live_activity;
pub mod project_watcher;
pub mod repo_store;
pub mod sink;
pub mod watcher_manager;

pub use backend::{BackendConfig, BackendError, BackendStatus, ControlError, GitMonitoringBackend, RepoConfigProvider};
pub use config::ObserverConfig;
pub use events::{EventEmitter, SystemEvent, SystemEventKind};
pub use git_watcher::{DebounceState, GitWatcher, GitWatcherError};
pub use live_activity::{FileChange, LiveActivityMonitor, LiveSession};
pub use project_watcher::ProjectWatcher;
pub use repo_store::{RepoConfig, RepoStore};
pub use sink::{FileChangeRow, LiveActivityRecord, Sink, SinkError, TeamAwareness};
pub use watcher_manager::ProjectWatcherManager;
