//! Scene lifecycle orchestration.
//!
//! This module owns the scene state machine (start/stop/recover), the override
//! listener that reacts to event stream verdicts, and the guard loop the CLI runs
//! while a scene is active.

mod controller;
mod relay;
mod scene;

pub(crate) use controller::{run_guard, GuardExit};
pub use scene::{Orchestrator, OrchestratorConfig};
