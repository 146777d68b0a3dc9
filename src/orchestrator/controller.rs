//! Guard loop.
//!
//! Keeps the process alive while a scene runs: waits for a shutdown request, for the
//! scene to end (override or stop), and periodically reaps a worker that exited on
//! its own.

use super::Orchestrator;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info};

const REAP_INTERVAL: Duration = Duration::from_secs(2);

/// Why the guard loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardExit {
    /// Shutdown was requested by the host process.
    Shutdown,
    /// The scene stopped: override detected, worker exited, or stopped elsewhere.
    SceneEnded,
}

/// Run until `shutdown` resolves or no scene is running any more.
///
/// Does not tear anything down; the caller runs [`Orchestrator::shutdown`] afterwards.
pub(crate) async fn run_guard<F>(orchestrator: &Arc<Orchestrator>, shutdown: F) -> GuardExit
where
    F: Future<Output = ()>,
{
    let mut running = orchestrator.subscribe_running();
    let mut reap = tokio::time::interval(REAP_INTERVAL);
    tokio::pin!(shutdown);

    if !*running.borrow_and_update() {
        return GuardExit::SceneEnded;
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break GuardExit::Shutdown;
            }
            changed = running.changed() => {
                if changed.is_err() || !*running.borrow_and_update() {
                    info!("scene ended");
                    break GuardExit::SceneEnded;
                }
            }
            _ = reap.tick() => {
                if orchestrator.reap_finished_worker().await {
                    debug!("finished worker reaped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorConfig;
    use crate::rooms::RoomTable;
    use crate::worker::tests::{write_worker, SCRIPT_NAME};

    fn orchestrator(dir: &std::path::Path) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(OrchestratorConfig {
            worker_script: dir.join(SCRIPT_NAME),
            state_file: dir.join("scene.json"),
            rooms: RoomTable::from_json(r#"{"rooms":{"kitchen":["k1"]}}"#).unwrap(),
            stop_timeout: Duration::from_secs(5),
            stream_join_timeout: Duration::from_secs(1),
        }))
    }

    #[tokio::test]
    async fn returns_immediately_without_a_scene() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let exit = run_guard(&orch, std::future::pending()).await;
        assert_eq!(exit, GuardExit::SceneEnded);
    }

    #[tokio::test]
    async fn shutdown_wins_while_scene_runs() {
        let dir = tempfile::tempdir().unwrap();
        write_worker(dir.path());
        let orch = orchestrator(dir.path());
        orch.start_scene("sunset", "pulse", &["kitchen".to_string()], 80)
            .await
            .unwrap();

        let exit = run_guard(&orch, tokio::time::sleep(Duration::from_millis(100))).await;
        assert_eq!(exit, GuardExit::Shutdown);
        assert!(orch.status().running);
        orch.shutdown().await;
        assert!(!orch.status().running);
    }

    #[tokio::test]
    async fn stopping_the_scene_ends_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        write_worker(dir.path());
        let orch = orchestrator(dir.path());
        orch.start_scene("sunset", "pulse", &["kitchen".to_string()], 80)
            .await
            .unwrap();

        let stopper = orch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.stop_scene().await;
        });
        let exit = tokio::time::timeout(
            Duration::from_secs(10),
            run_guard(&orch, std::future::pending()),
        )
        .await
        .unwrap();
        assert_eq!(exit, GuardExit::SceneEnded);
    }
}
