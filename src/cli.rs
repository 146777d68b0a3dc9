use crate::config::Settings;
use crate::orchestrator::{run_guard, GuardExit, Orchestrator};
use crate::stream::EventStreamClient;
use crate::text_summary::{build_status_summary, StatusReport};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "hue-scene-guard",
    version,
    about = "Run Hue light animations and stop them when someone takes over by hand"
)]
pub struct Cli {
    /// Hue bridge host or IP address
    #[arg(long, env = "HUE_BRIDGE", default_value = "192.168.1.209")]
    pub bridge: String,

    /// Bridge application key used for the event stream
    #[arg(long, env = "HUE_USER", hide_env_values = true)]
    pub app_key: Option<String>,

    /// Directory holding the worker script and rooms.json
    #[arg(long, env = "HUE_SCRIPTS_DIR", default_value = ".")]
    pub scripts_dir: PathBuf,

    /// File name of the worker script inside --scripts-dir
    #[arg(long, default_value = "run-scene.sh")]
    pub worker_script: String,

    /// Persisted scene record (defaults to the user data directory)
    #[arg(long, env = "HUE_SCENE_STATE")]
    pub state_file: Option<PathBuf>,

    /// Room table (defaults to <scripts-dir>/rooms.json)
    #[arg(long)]
    pub rooms_file: Option<PathBuf>,

    /// How long to wait for a stopped worker to exit
    #[arg(long, default_value = "10s")]
    pub stop_timeout: humantime::Duration,

    /// Reconnect the event stream after this long without data
    #[arg(long, default_value = "10m")]
    pub stream_idle_timeout: humantime::Duration,

    /// Power-off debounce window; attribute changes use twice this
    #[arg(long, default_value = "2s")]
    pub debounce: humantime::Duration,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Start a scene and guard it until it ends or the process is told to stop
    Run(RunArgs),
    /// Adopt a scene left running by an earlier instance and guard it
    Watch,
    /// Stop the persisted scene, if any
    Stop,
    /// Show the persisted scene
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Palette identifier passed to the worker
    #[arg(long)]
    pub palette: String,

    /// Animation identifier passed to the worker
    #[arg(long)]
    pub animation: String,

    /// Target room; repeat or pass several
    #[arg(long = "room", required = true, num_args = 1..)]
    pub rooms: Vec<String>,

    /// Brightness percentage
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub brightness: u8,
}

pub async fn run(args: Cli) -> Result<()> {
    let settings = Settings::new(&args);

    match args.command {
        Command::Run(run) => run_scene(&settings, Some(run)).await,
        Command::Watch => run_scene(&settings, None).await,
        Command::Stop => stop(&settings).await,
        Command::Status { json } => status(&settings, json).await,
    }
}

/// Shared body of `run` and `watch`: recover, optionally start, then guard.
async fn run_scene(settings: &Settings, start: Option<RunArgs>) -> Result<()> {
    let stream_cfg = settings.stream_config()?;
    let orchestrator = Arc::new(Orchestrator::new(
        settings
            .orchestrator_config()
            .context("failed to load room table")?,
    ));

    let recovered = orchestrator.recover_on_startup().await;
    match start {
        Some(run) => {
            orchestrator
                .start_scene(&run.palette, &run.animation, &run.rooms, run.brightness)
                .await
                .context("failed to start scene")?;
        }
        None if !recovered => {
            info!("no persisted scene to watch");
            return Ok(());
        }
        None => {}
    }

    let client = EventStreamClient::new(stream_cfg).context("failed to build event stream client")?;
    orchestrator.start_event_stream(client).await;

    let exit = run_guard(&orchestrator, shutdown_signal()).await;
    orchestrator.shutdown().await;
    if exit == GuardExit::SceneEnded {
        info!("scene is no longer running, exiting");
    }
    Ok(())
}

async fn stop(settings: &Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings.orchestrator_config_without_rooms());
    if !orchestrator.recover_on_startup().await {
        println!("No scene is running.");
        return Ok(());
    }
    orchestrator.stop_scene().await;
    println!("Scene stopped.");
    Ok(())
}

async fn status(settings: &Settings, json: bool) -> Result<()> {
    let orchestrator = Orchestrator::new(settings.orchestrator_config_without_rooms());
    orchestrator.recover_on_startup().await;
    let report = StatusReport {
        status: orchestrator.status(),
        worker_pid: orchestrator.worker_pid(),
        tracked_device_count: orchestrator.health().tracked_device_count,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in build_status_summary(&report).lines {
            println!("{line}");
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
