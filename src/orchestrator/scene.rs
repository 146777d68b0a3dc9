//! Scene orchestrator.
//!
//! Owns the authoritative [`SceneState`] and wires the worker controller, the state
//! store and the event stream together. All state transitions go through here.

use super::relay;
use crate::error::SceneError;
use crate::model::{
    ClassifierView, Clock, Health, OverrideVerdict, SceneState, SceneStatus, SystemClock,
};
use crate::rooms::RoomTable;
use crate::storage::StateStore;
use crate::stream::{EventStreamClient, SceneView, StreamHandle};
use crate::worker::{self, WorkerController, WorkerSlot};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub worker_script: PathBuf,
    pub state_file: PathBuf,
    pub rooms: RoomTable,
    pub stop_timeout: Duration,
    pub stream_join_timeout: Duration,
}

/// State shared with the stream task. Only the orchestrator writes through it.
struct SharedScene {
    state: Mutex<SceneState>,
    clock: Arc<dyn Clock>,
}

impl SharedScene {
    fn lock(&self) -> MutexGuard<'_, SceneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SceneView for SharedScene {
    fn classifier_view(&self) -> ClassifierView {
        self.lock().classifier_view()
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

pub struct Orchestrator {
    scene: Arc<SharedScene>,
    controller: WorkerController,
    store: StateStore,
    rooms: RoomTable,
    worker_script: PathBuf,
    /// Serializes start/stop sequences. Status queries never take it.
    lifecycle: tokio::sync::Mutex<()>,
    stream: Mutex<Option<StreamHandle>>,
    running_tx: watch::Sender<bool>,
    stream_join_timeout: Duration,
}

impl Orchestrator {
    pub fn new(cfg: OrchestratorConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: OrchestratorConfig, clock: Arc<dyn Clock>) -> Self {
        let script_name = cfg
            .worker_script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (running_tx, _) = watch::channel(false);
        Self {
            scene: Arc::new(SharedScene {
                state: Mutex::new(SceneState::default()),
                clock,
            }),
            controller: WorkerController::new(script_name, cfg.stop_timeout),
            store: StateStore::new(cfg.state_file),
            rooms: cfg.rooms,
            worker_script: cfg.worker_script,
            lifecycle: tokio::sync::Mutex::new(()),
            stream: Mutex::new(None),
            running_tx,
            stream_join_timeout: cfg.stream_join_timeout,
        }
    }

    /// Stop whatever runs, then launch `palette`/`animation` on `rooms`.
    ///
    /// Unknown room names are passed through to the worker but contribute no tracked
    /// devices; the request fails only when none of the rooms are known.
    pub async fn start_scene(
        &self,
        palette: &str,
        animation: &str,
        rooms: &[String],
        brightness: u8,
    ) -> Result<(), SceneError> {
        for room in rooms.iter().filter(|r| !self.rooms.contains(r)) {
            warn!(room = %room, "unknown room, no devices tracked for it");
        }
        let targets = self.rooms.resolve(rooms);
        if targets.is_empty() {
            return Err(SceneError::NoTargets(rooms.to_vec()));
        }

        let _gate = self.lifecycle.lock().await;
        self.stop_locked().await;

        let mut args = vec![
            palette.to_string(),
            animation.to_string(),
            brightness.to_string(),
        ];
        args.extend(rooms.iter().cloned());
        let work_dir = worker::work_dir_for(&self.worker_script);

        let (child, pid) = match self.controller.start(&self.worker_script, &args, &work_dir) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(error = %e, palette, animation, "scene failed to start");
                return Err(e.into());
            }
        };

        let record = {
            let mut state = self.scene.lock();
            let generation = state.generation + 1;
            *state = SceneState {
                running: true,
                worker: WorkerSlot::Live { child, pid },
                palette_id: palette.to_string(),
                animation_id: animation.to_string(),
                brightness,
                target_rooms: rooms.to_vec(),
                target_device_ids: Arc::new(targets),
                started_at: Some(crate::model::timestamp_utc()),
                last_command_at: self.scene.clock.now_millis(),
                generation,
            };
            state.to_record()
        };
        if let Some(record) = &record {
            self.persist(record);
        }
        self.running_tx.send_replace(true);

        info!(
            pid,
            palette,
            animation,
            brightness,
            rooms = ?rooms,
            devices = record.as_ref().map(|r| r.target_device_ids.len()).unwrap_or(0),
            "scene started"
        );
        Ok(())
    }

    /// Stop the current scene, if any. Safe to call at any time.
    pub async fn stop_scene(&self) {
        let _gate = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// Stop only if the scene a verdict was computed for is still the current one.
    async fn stop_scene_for(&self, verdict: &OverrideVerdict) {
        let _gate = self.lifecycle.lock().await;
        let current = {
            let state = self.scene.lock();
            state.running && state.generation == verdict.generation
        };
        if !current {
            debug!(device = %verdict.device_id, "stale override verdict ignored");
            return;
        }
        info!(
            device = %verdict.device_id,
            signal = ?verdict.signal,
            elapsed_ms = verdict.elapsed_ms,
            "manual override, stopping scene"
        );
        self.stop_locked().await;
    }

    /// Caller must hold the lifecycle gate.
    async fn stop_locked(&self) {
        let previous = {
            let mut state = self.scene.lock();
            let generation = state.generation;
            std::mem::replace(
                &mut *state,
                SceneState {
                    generation,
                    ..SceneState::default()
                },
            )
        };
        let was_running = previous.running;
        let pid = previous.worker.pid();

        self.controller.stop(previous.worker).await;
        if let Some(pid) = pid {
            self.release_record(pid);
        }
        self.running_tx.send_replace(false);

        if was_running {
            info!(pid, palette = %previous.palette_id, "scene stopped");
        }
    }

    fn persist(&self, record: &crate::model::PersistedSceneRecord) {
        // The in-memory state stays authoritative when the disk write fails.
        if let Err(e) = self.store.save(record) {
            warn!(error = %e, "failed to persist scene state");
        }
    }

    /// Drop the on-disk record for `pid` unless another instance has replaced it.
    fn release_record(&self, pid: u32) {
        if let Err(e) = self.store.release(pid) {
            warn!(pid, error = %e, "failed to clear scene state");
        }
    }

    /// Refresh the debounce window when a command for a tracked device goes out.
    pub fn note_command_sent(&self, device_id: &str) {
        let now = self.scene.clock.now_millis();
        let mut state = self.scene.lock();
        if state.running && state.target_device_ids.contains(device_id) {
            state.last_command_at = now;
        }
    }

    /// Proxy-layer hook: call for every relayed bridge request.
    pub fn note_relayed_command(&self, method: &str, path: &str) {
        if let Some(device_id) = relay::device_id_for_command(method, path) {
            self.note_command_sent(device_id);
        }
    }

    /// Adopt the worker of a persisted scene if it survived a restart.
    ///
    /// Returns true when a scene was recovered. A record whose pid is gone or belongs
    /// to another program is deleted.
    pub async fn recover_on_startup(&self) -> bool {
        let _gate = self.lifecycle.lock().await;
        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(e) => {
                warn!(path = %self.store.path().display(), error = %e, "failed to read persisted scene");
                return false;
            }
        };

        if !self.controller.recover(record.pid) {
            info!(pid = record.pid, "persisted worker is gone, discarding record");
            self.release_record(record.pid);
            return false;
        }

        info!(
            pid = record.pid,
            palette = %record.palette_id,
            animation = %record.animation_id,
            "recovered running scene"
        );
        {
            let mut state = self.scene.lock();
            let generation = state.generation + 1;
            *state = SceneState::recovered(record, generation);
        }
        self.running_tx.send_replace(true);
        true
    }

    /// Clean up after a worker that exited on its own. Returns true if it had.
    pub async fn reap_finished_worker(&self) -> bool {
        let exited = {
            let mut state = self.scene.lock();
            state.running && self.controller.has_exited(&mut state.worker)
        };
        if !exited {
            return false;
        }
        let _gate = self.lifecycle.lock().await;
        let still_exited = {
            let mut state = self.scene.lock();
            state.running && self.controller.has_exited(&mut state.worker)
        };
        if still_exited {
            info!("worker exited on its own");
            self.stop_locked().await;
        }
        still_exited
    }

    pub fn status(&self) -> SceneStatus {
        self.scene.lock().status()
    }

    /// Pid of the running worker, for diagnostics.
    pub fn worker_pid(&self) -> Option<u32> {
        self.scene.lock().worker.pid()
    }

    pub fn health(&self) -> Health {
        let tracked_device_count = {
            let state = self.scene.lock();
            if state.running {
                state.target_device_ids.len()
            } else {
                0
            }
        };
        let event_stream_connected = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(StreamHandle::is_connected);
        Health {
            event_stream_connected,
            tracked_device_count,
        }
    }

    /// Watch that flips whenever a scene starts or stops.
    pub fn subscribe_running(&self) -> watch::Receiver<bool> {
        self.running_tx.subscribe()
    }

    /// Start the event stream and the override listener. Replaces any earlier stream.
    pub async fn start_event_stream(self: &Arc<Self>, client: EventStreamClient) {
        let (verdict_tx, verdict_rx) = mpsc::unbounded_channel();
        let handle = client.spawn(self.scene.clone(), verdict_tx);
        let previous = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.shutdown(self.stream_join_timeout).await;
        }
        tokio::spawn(override_listener(Arc::downgrade(self), verdict_rx));
    }

    /// Ordered teardown: stop the stream, then the scene.
    pub async fn shutdown(&self) {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stream) = stream {
            stream.shutdown(self.stream_join_timeout).await;
        }
        self.stop_scene().await;
    }
}

/// Turns override verdicts into scene stops. Ends when the stream task drops its sender.
async fn override_listener(
    orchestrator: Weak<Orchestrator>,
    mut verdicts: mpsc::UnboundedReceiver<OverrideVerdict>,
) {
    while let Some(verdict) = verdicts.recv().await {
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        orchestrator.stop_scene_for(&verdict).await;
    }
}
