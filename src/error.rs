//! Error taxonomy for the scene engine.
//!
//! Only [`SceneError`] ever reaches callers of the orchestrator. Stream, decode and
//! persistence errors are logged where they happen and degrade functionality instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The worker could not be launched.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),
    #[error("failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure returned from `start_scene`.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("none of the requested rooms are known: {}", .0.join(", "))]
    NoTargets(Vec<String>),
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to build event stream client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("connecting to event stream: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("event stream returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("reading event stream: {0}")]
    Read(#[source] reqwest::Error),
    #[error("no data on event stream for {}", humantime::format_duration(*.0))]
    IdleTimeout(Duration),
    #[error("event stream closed by bridge")]
    Closed,
}

/// A single stream record that could not be decoded. Dropped per record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record carries no data payload")]
    Empty,
    #[error("invalid record payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("state file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding scene record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
