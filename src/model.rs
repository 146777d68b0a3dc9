use crate::worker::WorkerSlot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(0)
}

pub fn timestamp_utc() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

/// Time source for debounce decisions.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        epoch_millis()
    }
}

/// Authoritative in-memory scene state. Only the orchestrator mutates it.
#[derive(Debug, Default)]
pub struct SceneState {
    pub running: bool,
    pub worker: WorkerSlot,
    pub palette_id: String,
    pub animation_id: String,
    pub brightness: u8,
    pub target_rooms: Vec<String>,
    pub target_device_ids: Arc<BTreeSet<String>>,
    pub started_at: Option<String>,
    pub last_command_at: u64,
    /// Bumped on every start so late verdicts cannot stop a newer scene.
    pub generation: u64,
}

impl SceneState {
    /// Rebuild a running state from a persisted record whose worker survived a restart.
    ///
    /// The debounce clock restarts at zero: any event for the recovered devices is
    /// treated as potentially external until the next observed command.
    pub fn recovered(record: PersistedSceneRecord, generation: u64) -> Self {
        Self {
            running: true,
            worker: WorkerSlot::Recovered { pid: record.pid },
            palette_id: record.palette_id,
            animation_id: record.animation_id,
            brightness: record.brightness,
            target_rooms: record.target_rooms,
            target_device_ids: Arc::new(record.target_device_ids),
            started_at: Some(record.started_at),
            last_command_at: 0,
            generation,
        }
    }

    pub fn to_record(&self) -> Option<PersistedSceneRecord> {
        if !self.running {
            return None;
        }
        Some(PersistedSceneRecord {
            pid: self.worker.pid()?,
            palette_id: self.palette_id.clone(),
            animation_id: self.animation_id.clone(),
            brightness: self.brightness,
            target_rooms: self.target_rooms.clone(),
            target_device_ids: self.target_device_ids.as_ref().clone(),
            started_at: self.started_at.clone().unwrap_or_default(),
        })
    }

    pub fn status(&self) -> SceneStatus {
        if !self.running {
            return SceneStatus::default();
        }
        SceneStatus {
            running: true,
            palette: Some(self.palette_id.clone()),
            animation: Some(self.animation_id.clone()),
            brightness: Some(self.brightness),
            rooms: self.target_rooms.clone(),
            started_at: self.started_at.clone(),
        }
    }

    pub fn classifier_view(&self) -> ClassifierView {
        ClassifierView {
            running: self.running,
            target_device_ids: self.target_device_ids.clone(),
            last_command_at: self.last_command_at,
            generation: self.generation,
        }
    }
}

/// On-disk mirror of [`SceneState`] without the live process handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSceneRecord {
    pub pid: u32,
    pub palette_id: String,
    pub animation_id: String,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    pub target_rooms: Vec<String>,
    pub target_device_ids: BTreeSet<String>,
    pub started_at: String,
}

fn default_brightness() -> u8 {
    100
}

/// Read-only status handed to presentation layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneStatus {
    pub running: bool,
    pub palette: Option<String>,
    pub animation: Option<String>,
    pub brightness: Option<u8>,
    pub rooms: Vec<String>,
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub event_stream_connected: bool,
    pub tracked_device_count: usize,
}

/// Snapshot of the fields the classifier needs.
#[derive(Debug, Clone, Default)]
pub struct ClassifierView {
    pub running: bool,
    pub target_device_ids: Arc<BTreeSet<String>>,
    pub last_command_at: u64,
    pub generation: u64,
}

/// One resource change decoded from the bridge event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChange {
    /// Container type reported by the bridge (`update`, `add`, `delete`, ...).
    pub event_type: String,
    /// Resource type (`light`, `grouped_light`, ...).
    pub resource_type: String,
    pub device_id: String,
    /// New on/off state when the record carries one.
    pub power: Option<bool>,
    /// Colour, colour temperature or brightness changed.
    pub attributes_changed: bool,
}

impl DeviceChange {
    pub fn is_device_update(&self) -> bool {
        self.event_type == "update"
            && matches!(self.resource_type.as_str(), "light" | "grouped_light")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideSignal {
    PowerOff,
    AttributeChange,
}

/// Emitted when a change for a tracked device falls outside its debounce window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideVerdict {
    pub device_id: String,
    pub signal: OverrideSignal,
    pub elapsed_ms: u64,
    pub generation: u64,
}
