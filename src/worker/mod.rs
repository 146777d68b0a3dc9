//! Worker process controller.
//!
//! Launches the animation worker as the leader of its own process group, forwards its
//! output into the service log, and stops it again either through the live child
//! handle or, after a service restart, through the recorded pid.

mod process;

use crate::error::LaunchError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Who, if anyone, owns the worker.
#[derive(Debug, Default)]
pub enum WorkerSlot {
    #[default]
    NoWorker,
    /// Spawned by this process instance.
    Live { child: Child, pid: u32 },
    /// Adopted from a persisted record after a restart.
    Recovered { pid: u32 },
}

impl WorkerSlot {
    pub fn pid(&self) -> Option<u32> {
        match self {
            WorkerSlot::NoWorker => None,
            WorkerSlot::Live { pid, .. } | WorkerSlot::Recovered { pid } => Some(*pid),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerController {
    script_name: String,
    stop_timeout: Duration,
}

impl WorkerController {
    /// `script_name` is the file name a recovered pid's command line must contain.
    pub fn new(script_name: impl Into<String>, stop_timeout: Duration) -> Self {
        Self {
            script_name: script_name.into(),
            stop_timeout,
        }
    }

    /// Spawn the worker in a fresh process group. Must be called from a Tokio runtime.
    pub fn start(
        &self,
        command: &Path,
        args: &[String],
        work_dir: &Path,
    ) -> Result<(Child, u32), LaunchError> {
        if !command.exists() {
            return Err(LaunchError::ScriptNotFound(command.to_path_buf()));
        }

        let spawn_err = |source| LaunchError::Spawn {
            path: command.to_path_buf(),
            source,
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = cmd.spawn().map_err(spawn_err)?;
        let Some(pid) = child.id() else {
            return Err(spawn_err(std::io::Error::other(
                "worker exited before reporting a pid",
            )));
        };

        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_output(out, pid, "stdout"));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_output(err, pid, "stderr"));
        }

        info!(pid, command = %command.display(), ?args, "worker started");
        Ok((child, pid))
    }

    /// Stop whatever the slot holds. Never fails; unreachable processes count as stopped.
    pub async fn stop(&self, slot: WorkerSlot) {
        match slot {
            WorkerSlot::NoWorker => {}
            WorkerSlot::Live { mut child, pid } => self.stop_live(&mut child, pid).await,
            WorkerSlot::Recovered { pid } => self.stop_recovered(pid).await,
        }
    }

    async fn stop_live(&self, child: &mut Child, pid: u32) {
        // The group outlives its leader while any member is alive, so background
        // children are signalled even when the leader has already exited.
        if let Some(pgid) = process::leader_group(pid) {
            if let Err(e) = process::signal_group(pgid, libc::SIGTERM) {
                warn!(pid, pgid, error = %e, "failed to signal worker process group");
            }
        }

        if let Ok(Some(status)) = child.try_wait() {
            debug!(pid, %status, "worker already exited");
            return;
        }

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => info!(pid, %status, "worker stopped"),
            Ok(Err(e)) => warn!(pid, error = %e, "failed to wait for worker"),
            Err(_) => warn!(
                pid,
                timeout = %humantime::format_duration(self.stop_timeout),
                "worker did not exit in time"
            ),
        }
    }

    async fn stop_recovered(&self, pid: u32) {
        // Recovered workers are not our children, so signal the tree by hand:
        // the group, any children that left it, then the parent.
        if let Some(pgid) = process::leader_group(pid) {
            if let Err(e) = process::signal_group(pgid, libc::SIGTERM) {
                warn!(pid, pgid, error = %e, "failed to signal recovered worker group");
            }
        }
        for child in process::child_pids(pid) {
            if let Err(e) = process::signal_pid(child, libc::SIGTERM) {
                warn!(pid = child, parent = pid, error = %e, "failed to signal worker child");
            }
        }
        if let Err(e) = process::signal_pid(pid, libc::SIGTERM) {
            warn!(pid, error = %e, "failed to signal recovered worker");
        }

        let deadline = tokio::time::Instant::now() + self.stop_timeout;
        while process::is_running(pid) {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    pid,
                    timeout = %humantime::format_duration(self.stop_timeout),
                    "recovered worker did not exit in time"
                );
                return;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        info!(pid, "recovered worker stopped");
    }

    /// Whether `pid` is a live process running the worker script.
    ///
    /// A reused pid that belongs to an unrelated program must not be adopted.
    pub fn recover(&self, pid: u32) -> bool {
        if !process::is_running(pid) {
            debug!(pid, "persisted worker pid is not running");
            return false;
        }
        let matches = process::cmdline(pid).is_some_and(|args| {
            args.iter()
                .any(|a| Path::new(a).file_name() == Some(OsStr::new(&self.script_name)))
        });
        if !matches {
            debug!(pid, script = %self.script_name, "pid belongs to a different program");
        }
        matches
    }

    /// Whether the worker in `slot` has exited on its own.
    pub fn has_exited(&self, slot: &mut WorkerSlot) -> bool {
        match slot {
            WorkerSlot::NoWorker => true,
            WorkerSlot::Live { child, .. } => matches!(child.try_wait(), Ok(Some(_))),
            WorkerSlot::Recovered { pid } => !process::is_running(*pid),
        }
    }
}

/// Working directory for a worker script: the script's own directory.
pub fn work_dir_for(script: &Path) -> PathBuf {
    script
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn forward_output<R>(reader: R, pid: u32, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "worker", pid, stream, "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(pid, stream, error = %e, "worker output closed");
                break;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    pub(crate) const SCRIPT_NAME: &str = "run-scene.sh";

    /// A worker that records its arguments and keeps one child alive.
    pub(crate) fn write_worker(dir: &Path) -> PathBuf {
        let script = dir.join(SCRIPT_NAME);
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"$@\" > args.txt\nsleep 30 &\necho $! > child.pid\nwait\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    /// A worker that leaves a background child behind and exits at once.
    pub(crate) fn write_detaching_worker(dir: &Path) -> PathBuf {
        let script = dir.join(SCRIPT_NAME);
        std::fs::write(&script, "#!/bin/sh\nsleep 30 &\necho $! > child.pid\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    pub(crate) fn is_running(pid: u32) -> bool {
        process::is_running(pid)
    }

    /// Poll until `pid` is gone; false if it is still alive after ~2 s.
    pub(crate) async fn wait_until_gone(pid: u32) -> bool {
        for _ in 0..100 {
            if !process::is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    pub(crate) async fn wait_for_file(path: &Path) -> String {
        for _ in 0..100 {
            if let Ok(raw) = std::fs::read_to_string(path) {
                if raw.ends_with('\n') {
                    return raw;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never appeared", path.display());
    }

    fn controller() -> WorkerController {
        WorkerController::new(SCRIPT_NAME, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn start_passes_args_and_stop_kills_the_group() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_worker(dir.path());
        let args: Vec<String> = ["sunset", "pulse", "80", "kitchen"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let ctl = controller();
        let (child, pid) = ctl.start(&script, &args, dir.path()).unwrap();
        assert_eq!(
            wait_for_file(&dir.path().join("args.txt")).await.trim(),
            "sunset pulse 80 kitchen"
        );
        let grandchild: u32 = wait_for_file(&dir.path().join("child.pid"))
            .await
            .trim()
            .parse()
            .unwrap();
        assert_eq!(process::process_group_of(pid), Some(pid as libc::pid_t));
        assert!(ctl.recover(pid));

        ctl.stop(WorkerSlot::Live { child, pid }).await;
        assert!(!process::is_running(pid));
        for _ in 0..50 {
            if !process::is_running(grandchild) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!process::is_running(grandchild));
    }

    #[tokio::test]
    async fn missing_script_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = controller()
            .start(&dir.path().join(SCRIPT_NAME), &[], dir.path())
            .unwrap_err();
        assert!(matches!(err, LaunchError::ScriptNotFound(_)));
        assert!(err.to_string().starts_with("Script not found: "));
    }

    #[tokio::test]
    async fn recovered_pid_is_stopped_with_its_children() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_worker(dir.path());
        let ctl = controller();
        let (mut child, pid) = ctl.start(&script, &[], dir.path()).unwrap();
        let grandchild: u32 = wait_for_file(&dir.path().join("child.pid"))
            .await
            .trim()
            .parse()
            .unwrap();

        ctl.stop(WorkerSlot::Recovered { pid }).await;
        assert!(!process::is_running(pid));
        assert!(!process::is_running(grandchild));
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn unrelated_pid_is_not_recovered() {
        let mut sleeper = Command::new("sleep").arg("5").spawn().unwrap();
        let pid = sleeper.id().unwrap();
        assert!(!controller().recover(pid));
        sleeper.kill().await.unwrap();
        assert!(!controller().recover(pid));
    }

    #[tokio::test]
    async fn stopping_nothing_or_an_exited_worker_is_quiet() {
        let ctl = controller();
        ctl.stop(WorkerSlot::NoWorker).await;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join(SCRIPT_NAME);
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let (child, pid) = ctl.start(&script, &[], dir.path()).unwrap();
        let mut slot = WorkerSlot::Live { child, pid };
        for _ in 0..100 {
            if ctl.has_exited(&mut slot) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ctl.has_exited(&mut slot));
        ctl.stop(slot).await;
        ctl.stop(WorkerSlot::Recovered { pid }).await;
    }

    #[tokio::test]
    async fn stopping_an_exited_leader_still_stops_its_group() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_detaching_worker(dir.path());
        let ctl = controller();
        let (child, pid) = ctl.start(&script, &[], dir.path()).unwrap();
        let background: u32 = wait_for_file(&dir.path().join("child.pid"))
            .await
            .trim()
            .parse()
            .unwrap();

        let mut slot = WorkerSlot::Live { child, pid };
        for _ in 0..100 {
            if ctl.has_exited(&mut slot) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ctl.has_exited(&mut slot));
        assert!(process::is_running(background));

        ctl.stop(slot).await;
        assert!(wait_until_gone(background).await);
    }

    #[test]
    fn work_dir_is_script_parent() {
        assert_eq!(
            work_dir_for(Path::new("/opt/hue/scripts/run-scene.sh")),
            PathBuf::from("/opt/hue/scripts")
        );
        assert_eq!(work_dir_for(Path::new("run-scene.sh")), PathBuf::from("."));
    }
}
