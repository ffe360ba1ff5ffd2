use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use observer_core::{BackendConfig, GitMonitoringBackend, ObserverConfig, RepoConfig, RepoConfigProvider};
use observer_sink_memory::InMemorySink;
use tracing_subscriber::{EnvFilter, prelude::*};
use uuid::Uuid;

/// Hands the backend exactly one project containing one repo: the path
/// given on the command line. A real embedder backs this with whatever
/// table maps projects to their tracked working trees.
struct SingleRepoProvider {
    project_id: Uuid,
    repo_path: PathBuf,
}

#[async_trait]
impl RepoConfigProvider for SingleRepoProvider {
    async fn list_repos(&self, project_id: Uuid) -> Vec<RepoConfig> {
        if project_id != self.project_id {
            return Vec::new();
        }
        let mut config = RepoConfig::new(project_id, self.repo_path.clone());
        config.watching = true;
        vec![config]
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tracing::error!("failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,observer_core={level},observer_sink_memory={level},git_core={level},observer_cli={level}",
        level = log_level
    );
    let filter = EnvFilter::try_new(&filter_string).unwrap_or_else(|_| EnvFilter::new(&log_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let repo_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let repo_path = dunce::canonicalize(&repo_path)
        .map_err(|e| anyhow::anyhow!("cannot resolve {}: {e}", repo_path.display()))?;

    let user_id = Uuid::new_v4();
    let project_id = Uuid::new_v4();

    let sink = Arc::new(InMemorySink::default());
    sink.toggle_project_watch(project_id, user_id, true).await?;

    let provider = Arc::new(SingleRepoProvider {
        project_id,
        repo_path: repo_path.clone(),
    });
    let observer_config = ObserverConfig::default();
    let backend_config = BackendConfig {
        user_id,
        enable_live_activity: true,
        sync_interval: observer_config.sync_interval(),
    };

    let (backend, mut activities_rx, mut system_rx) =
        GitMonitoringBackend::new(sink.clone(), provider, &observer_config, backend_config);

    let router_backend = Arc::clone(&backend);
    tokio::spawn(async move {
        while let Some(activity) = activities_rx.recv().await {
            tracing::info!(kind = ?activity.kind, repo_id = %activity.repo_id, "activity");
            router_backend.handle_activity(activity).await;
        }
    });
    tokio::spawn(async move {
        while let Some(event) = system_rx.recv().await {
            tracing::info!(evt = ?event.evt, project_id = %event.project_id, "system event");
        }
    });

    backend
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start observer: {}", e.error))?;
    tracing::info!("watching {}", repo_path.display());

    shutdown_signal().await;
    tracing::info!("shutting down");
    backend.stop();

    Ok(())
}
