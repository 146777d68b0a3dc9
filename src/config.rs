//! Runtime settings resolved from CLI flags and environment.

use crate::classifier::DebounceWindows;
use crate::orchestrator::OrchestratorConfig;
use crate::rooms::RoomTable;
use crate::storage::StateStore;
use crate::stream::StreamConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const ROOMS_FILE_NAME: &str = "rooms.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bridge: String,
    pub app_key: Option<String>,
    pub worker_script: PathBuf,
    pub rooms_file: PathBuf,
    pub state_file: PathBuf,
    pub stop_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub stream_join_timeout: Duration,
    pub windows: DebounceWindows,
}

impl Settings {
    pub fn new(args: &crate::cli::Cli) -> Self {
        Self {
            bridge: args.bridge.clone(),
            app_key: args.app_key.clone().filter(|k| !k.trim().is_empty()),
            worker_script: args.scripts_dir.join(&args.worker_script),
            rooms_file: args
                .rooms_file
                .clone()
                .unwrap_or_else(|| args.scripts_dir.join(ROOMS_FILE_NAME)),
            state_file: args.state_file.clone().unwrap_or_else(StateStore::default_path),
            stop_timeout: Duration::from(args.stop_timeout),
            stream_idle_timeout: Duration::from(args.stream_idle_timeout),
            stream_join_timeout: Duration::from_secs(5),
            windows: DebounceWindows::from_short(Duration::from(args.debounce)),
        }
    }

    /// Orchestrator settings. Loads the room table, which must exist.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        Ok(OrchestratorConfig {
            worker_script: self.worker_script.clone(),
            state_file: self.state_file.clone(),
            rooms: RoomTable::load(&self.rooms_file)?,
            stop_timeout: self.stop_timeout,
            stream_join_timeout: self.stream_join_timeout,
        })
    }

    /// Orchestrator settings for commands that only touch a persisted scene.
    pub fn orchestrator_config_without_rooms(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_script: self.worker_script.clone(),
            state_file: self.state_file.clone(),
            rooms: RoomTable::default(),
            stop_timeout: self.stop_timeout,
            stream_join_timeout: self.stream_join_timeout,
        }
    }

    pub fn stream_config(&self) -> Result<StreamConfig> {
        let app_key = self
            .app_key
            .clone()
            .context("HUE_USER is not set; pass --app-key or set it in the environment")?;
        let mut cfg = StreamConfig::for_bridge(&self.bridge, app_key);
        cfg.idle_timeout = self.stream_idle_timeout;
        cfg.windows = self.windows;
        Ok(cfg)
    }
}
