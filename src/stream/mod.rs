//! Bridge event stream client.
//!
//! One background task keeps an authenticated SSE connection to the bridge open,
//! decodes every record, classifies each change against the current scene, and sends
//! override verdicts over a channel. It reconnects after a fixed backoff until the
//! shared cancel flag is set.

mod bridge;
mod sse;

use crate::classifier::{classify, Classification, DebounceWindows};
use crate::error::StreamError;
use crate::model::{ClassifierView, OverrideVerdict};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
/// Upper bound on how long a blocked read delays noticing cancellation.
const CANCEL_POLL: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_STREAM_PATH: &str = "/eventstream/clip/v2";

/// Read access to the running scene, as needed by the classifier.
pub trait SceneView: Send + Sync {
    fn classifier_view(&self) -> ClassifierView;
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Scheme and host of the bridge, e.g. `https://192.168.1.209`.
    pub base_url: String,
    pub app_key: String,
    /// Reconnect when no bytes arrive for this long.
    pub idle_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub windows: DebounceWindows,
}

impl StreamConfig {
    pub fn for_bridge(bridge: &str, app_key: impl Into<String>) -> Self {
        Self {
            base_url: format!("https://{bridge}"),
            app_key: app_key.into(),
            idle_timeout: Duration::from_secs(600),
            reconnect_backoff: RECONNECT_BACKOFF,
            windows: DebounceWindows::default(),
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), EVENT_STREAM_PATH)
    }
}

enum LinkState {
    Disconnected { backoff: Option<Duration> },
    Connecting,
    Streaming(reqwest::Response),
}

pub struct EventStreamClient {
    cfg: StreamConfig,
    http: reqwest::Client,
}

impl EventStreamClient {
    pub fn new(cfg: StreamConfig) -> Result<Self, StreamError> {
        // The bridge serves a self-signed certificate. Verification is relaxed on this
        // client only; no other HTTP client in the process shares it.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(format!("hue-scene-guard/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StreamError::Client)?;
        Ok(Self { cfg, http })
    }

    /// Start the background task. Must be called from a Tokio runtime.
    pub fn spawn(
        self,
        view: Arc<dyn SceneView>,
        verdict_tx: UnboundedSender<OverrideVerdict>,
    ) -> StreamHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));
        let link = Link {
            view,
            verdict_tx,
            cancel: cancel.clone(),
            connected: connected.clone(),
        };
        let task = tokio::spawn(async move { self.run(link).await });
        StreamHandle {
            cancel,
            connected,
            task,
        }
    }

    async fn run(self, link: Link) {
        let mut state = LinkState::Disconnected { backoff: None };
        loop {
            if link.cancelled() {
                break;
            }
            state = match state {
                LinkState::Disconnected { backoff } => {
                    if let Some(delay) = backoff {
                        if link.sleep_unless_cancelled(delay).await {
                            break;
                        }
                    }
                    LinkState::Connecting
                }
                LinkState::Connecting => match self.connect().await {
                    Ok(resp) => {
                        link.connected.store(true, Ordering::Relaxed);
                        info!(url = %self.cfg.url(), "event stream connected");
                        LinkState::Streaming(resp)
                    }
                    Err(e) => {
                        warn!(error = %e, "event stream connection failed");
                        LinkState::Disconnected {
                            backoff: Some(self.cfg.reconnect_backoff),
                        }
                    }
                },
                LinkState::Streaming(resp) => {
                    let outcome = self.pump(resp, &link).await;
                    link.connected.store(false, Ordering::Relaxed);
                    match outcome {
                        Ok(()) => break,
                        Err(e) => {
                            warn!(
                                error = %e,
                                retry_in = %humantime::format_duration(self.cfg.reconnect_backoff),
                                "event stream disconnected"
                            );
                            LinkState::Disconnected {
                                backoff: Some(self.cfg.reconnect_backoff),
                            }
                        }
                    }
                }
            };
        }
        link.connected.store(false, Ordering::Relaxed);
        debug!("event stream task finished");
    }

    async fn connect(&self) -> Result<reqwest::Response, StreamError> {
        let resp = self
            .http
            .get(self.cfg.url())
            .header("hue-application-key", &self.cfg.app_key)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(StreamError::Connect)?;
        if !resp.status().is_success() {
            return Err(StreamError::Status(resp.status()));
        }
        Ok(resp)
    }

    /// Read until cancelled (`Ok`) or the connection fails (`Err`).
    async fn pump(&self, resp: reqwest::Response, link: &Link) -> Result<(), StreamError> {
        let mut body = resp.bytes_stream();
        let mut frames = sse::FrameAccumulator::default();
        let mut idle = Duration::ZERO;

        loop {
            if link.cancelled() {
                return Ok(());
            }
            match tokio::time::timeout(CANCEL_POLL, body.next()).await {
                Err(_) => {
                    idle += CANCEL_POLL;
                    if idle >= self.cfg.idle_timeout {
                        return Err(StreamError::IdleTimeout(idle));
                    }
                }
                Ok(None) => {
                    if frames.pending() > 0 {
                        debug!(bytes = frames.pending(), "dropping unterminated record");
                    }
                    return Err(StreamError::Closed);
                }
                Ok(Some(Err(e))) => return Err(StreamError::Read(e)),
                Ok(Some(Ok(chunk))) => {
                    idle = Duration::ZERO;
                    for frame in frames.push(&chunk) {
                        self.dispatch(&frame, link);
                    }
                }
            }
        }
    }

    fn dispatch(&self, frame: &sse::SseFrame, link: &Link) {
        let changes = match bridge::decode_changes(&frame.data) {
            Ok(changes) => changes,
            Err(e) => {
                debug!(id = ?frame.id, error = %e, "dropping undecodable record");
                return;
            }
        };
        if changes.is_empty() {
            return;
        }

        let view = link.view.classifier_view();
        if !view.running {
            return;
        }
        let now = link.view.now_millis();
        for change in &changes {
            match classify(change, &view, now, self.cfg.windows) {
                Classification::External(verdict) => {
                    info!(
                        device = %verdict.device_id,
                        signal = ?verdict.signal,
                        elapsed_ms = verdict.elapsed_ms,
                        "external change detected"
                    );
                    let _ = link.verdict_tx.send(verdict);
                }
                Classification::SelfCaused => {
                    debug!(device = %change.device_id, "change attributed to the running scene");
                }
                Classification::Ignored => {}
            }
        }
    }
}

/// Per-task shared state of the stream loop.
struct Link {
    view: Arc<dyn SceneView>,
    verdict_tx: UnboundedSender<OverrideVerdict>,
    cancel: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl Link {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Sleep in short slices; returns true if cancelled meanwhile.
    async fn sleep_unless_cancelled(&self, total: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + total;
        loop {
            if self.cancelled() {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
        }
    }
}

/// Owner-side handle of the stream task.
pub struct StreamHandle {
    cancel: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl StreamHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Set the cancel flag and wait up to `timeout` for the task to exit.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.store(true, Ordering::Relaxed);
        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => debug!("event stream stopped"),
            Ok(Err(e)) => warn!(error = %e, "event stream task failed"),
            Err(_) => {
                warn!(
                    timeout = %humantime::format_duration(timeout),
                    "event stream did not stop in time, abandoning it"
                );
                task.abort();
            }
        }
    }
}
