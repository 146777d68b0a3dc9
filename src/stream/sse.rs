//! Incremental server-sent-event framing.
//!
//! Chunks arrive at arbitrary byte boundaries. The accumulator keeps the partial tail
//! and yields one [`SseFrame`] per blank-line-terminated record.

use bytes::{Buf, BytesMut};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub(crate) struct FrameAccumulator {
    buf: BytesMut,
}

impl FrameAccumulator {
    /// Feed one chunk and return every record it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        // CRLF and LF are equivalent line endings here.
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let raw = self.buf.split_to(end);
            self.buf.advance(2);
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }
        frames
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut has_data = false;

    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if has_data {
                    frame.data.push('\n');
                }
                frame.data.push_str(value);
                has_data = true;
            }
            "id" => frame.id = Some(value.to_string()),
            "event" => frame.event = Some(value.to_string()),
            _ => {}
        }
    }

    has_data.then_some(frame)
}
