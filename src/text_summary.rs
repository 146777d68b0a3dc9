//! Text summary builder for CLI output.
//!
//! Formats the scene status as human-readable lines.

use crate::model::SceneStatus;
use serde::Serialize;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Everything the `status` command reports, in the shape `--json` prints.
///
/// Event stream health is left out: only the guarding process holds a stream.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StatusReport {
    #[serde(flatten)]
    pub status: SceneStatus,
    pub worker_pid: Option<u32>,
    pub tracked_device_count: usize,
}

pub(crate) fn build_status_summary(report: &StatusReport) -> TextSummary {
    let status = &report.status;
    let mut lines = Vec::new();

    if !status.running {
        lines.push("Scene: not running".to_string());
        return TextSummary { lines };
    }

    let palette = status.palette.as_deref().unwrap_or("-");
    let animation = status.animation.as_deref().unwrap_or("-");
    lines.push(format!("Scene: {palette} / {animation}"));
    if let Some(brightness) = status.brightness {
        lines.push(format!("Brightness: {brightness}%"));
    }
    if !status.rooms.is_empty() {
        lines.push(format!("Rooms: {}", status.rooms.join(", ")));
    }
    if let Some(started) = status.started_at.as_deref() {
        lines.push(format!("Started: {started}"));
    }
    if let Some(pid) = report.worker_pid {
        lines.push(format!("Worker pid: {pid}"));
    }
    lines.push(format!("Tracked devices: {}", report.tracked_device_count));

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_summary_is_one_line() {
        let report = StatusReport {
            status: SceneStatus::default(),
            worker_pid: None,
            tracked_device_count: 0,
        };
        assert_eq!(build_status_summary(&report).lines, vec!["Scene: not running"]);
    }

    #[test]
    fn running_summary_lists_scene_details() {
        let report = StatusReport {
            status: SceneStatus {
                running: true,
                palette: Some("sunset".into()),
                animation: Some("pulse".into()),
                brightness: Some(80),
                rooms: vec!["kitchen".into(), "office".into()],
                started_at: Some("2026-03-01T20:15:00Z".into()),
            },
            worker_pid: Some(4242),
            tracked_device_count: 3,
        };
        let lines = build_status_summary(&report).lines;
        assert_eq!(lines[0], "Scene: sunset / pulse");
        assert!(lines.contains(&"Rooms: kitchen, office".to_string()));
        assert!(lines.contains(&"Worker pid: 4242".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("Tracked devices: 3"));
    }

    #[test]
    fn json_report_flattens_status() {
        let report = StatusReport {
            status: SceneStatus::default(),
            worker_pid: None,
            tracked_device_count: 0,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["running"], false);
        assert_eq!(value["tracked_device_count"], 0);
        assert!(value.get("event_stream_connected").is_none());
    }
}
