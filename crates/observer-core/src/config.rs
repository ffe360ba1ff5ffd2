//! Observer-wide tunables, loaded leniently so a missing or malformed file
//! never blocks startup — it just falls back to defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_debounce_ms() -> u64 {
    400
}

fn default_remote_poll_secs() -> u64 {
    120
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_session_timeout_secs() -> u64 {
    600
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_recent_push_window_minutes() -> i64 {
    2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub debounce_ms: u64,
    pub remote_poll_secs: u64,
    pub heartbeat_secs: u64,
    pub session_timeout_secs: u64,
    pub sync_interval_secs: u64,
    /// Tunable window for `detect_recent_push`; the source hard-coded 2
    /// minutes, promoted here to configuration per the open question in
    /// the design notes.
    pub recent_push_window_minutes: i64,
    pub enable_live_activity: bool,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            remote_poll_secs: default_remote_poll_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            recent_push_window_minutes: default_recent_push_window_minutes(),
            enable_live_activity: default_true(),
        }
    }
}

impl ObserverConfig {
    /// Reads `path` as JSON; any failure (missing file, parse error) falls
    /// back to [`ObserverConfig::default`] rather than propagating.
    pub async fn load_from_file(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("failed to parse observer config at {:?}: {e}", path);
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no observer config found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    pub fn debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_ms)
    }

    pub fn remote_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.remote_poll_secs)
    }

    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_secs)
    }

    pub fn session_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec_constants() {
        let cfg = ObserverConfig::default();
        assert_eq!(cfg.debounce_ms, 400);
        assert_eq!(cfg.remote_poll_secs, 120);
        assert_eq!(cfg.heartbeat_secs, 30);
        assert_eq!(cfg.session_timeout_secs, 600);
        assert_eq!(cfg.sync_interval_secs, 60);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_default() {
        let cfg = ObserverConfig::load_from_file(Path::new("/nonexistent/observer.json")).await;
        assert_eq!(cfg.debounce_ms, 400);
    }

    #[tokio::test]
    async fn test_malformed_file_falls_back_to_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("observer.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let cfg = ObserverConfig::load_from_file(&path).await;
        assert_eq!(cfg.debounce_ms, 400);
    }
}
