//! Event decoder: raw body bytes → typed frames.
//!
//! The backend writes `data: <json>` lines separated by blank lines and ends
//! with `data: [DONE]`. Chunk boundaries fall anywhere, including inside a
//! multi-byte UTF-8 character, so lines are split at byte level and only
//! complete lines are decoded.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::event::StreamEvent;
use crate::session::TransportError;

/// Field prefix of a payload line.
pub const DATA_PREFIX: &str = "data:";
/// Terminator payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    /// `[DONE]` was received; nothing after it is decoded.
    Done,
}

/// Why a payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Parse a single payload (the text after `data: `).
pub fn parse_payload(payload: &str) -> Result<StreamEvent, FrameError> {
    Ok(serde_json::from_str(payload)?)
}

/// Incremental line decoder.
///
/// Feed chunks with [`push`](Self::push); each call returns the frames
/// completed by that chunk. Bytes after the last newline stay buffered.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline.
    scanned: usize,
    malformed: usize,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            let frame = self.decode_line(start, end);
            start = end + 1;
            search_from = start;
            match frame {
                Some(Frame::Done) => {
                    self.done = true;
                    frames.push(Frame::Done);
                    break;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }

        if self.done {
            self.buffer.clear();
        } else {
            self.buffer.drain(..start);
        }
        self.scanned = self.buffer.len();
        frames
    }

    /// Signal end of input. Returns the number of buffered bytes dropped
    /// because they never formed a complete line.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            debug!(bytes = dropped, "Dropping incomplete trailing line");
        }
        self.buffer.clear();
        self.scanned = 0;
        self.done = true;
        dropped
    }

    /// Whether `[DONE]` has been seen or input has ended.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of payloads dropped because they failed to parse.
    pub fn malformed_frames(&self) -> usize {
        self.malformed
    }

    /// Bytes currently held waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn decode_line(&mut self, start: usize, end: usize) -> Option<Frame> {
        let bytes = &self.buffer[start..end];
        let line = match std::str::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                if bytes.starts_with(DATA_PREFIX.as_bytes()) {
                    self.malformed += 1;
                    warn!(error = %e, bytes = bytes.len(), "Dropping malformed frame");
                }
                return None;
            }
        };
        let line = line.strip_suffix('\r').unwrap_or(line);

        // Blank separators, comments and other SSE fields carry no payload.
        let payload = line.strip_prefix(DATA_PREFIX)?;
        let payload = payload.strip_prefix(' ').unwrap_or(payload);

        if payload.trim() == DONE_SENTINEL {
            return Some(Frame::Done);
        }

        match parse_payload(payload) {
            Ok(event) => Some(Frame::Event(event)),
            Err(e) => {
                self.malformed += 1;
                warn!(
                    error = %e,
                    payload = %truncate(payload, 120),
                    "Dropping malformed frame"
                );
                None
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Async adapter over a chunked byte stream.
///
/// `next_frame` is cancel-safe: dropping it mid-await loses no decoded
/// frames, so it can sit inside a `tokio::select!` arm.
pub struct FrameReader<S> {
    stream: S,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
    closed: bool,
}

impl<S, B, E> FrameReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            closed: false,
        }
    }

    /// Next frame, `None` once the body has closed and everything is drained.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if self.closed || self.decoder.is_done() {
                return None;
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    let frames = self.decoder.push(chunk.as_ref());
                    self.pending.extend(frames);
                }
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(Err(TransportError::Body(e.to_string())));
                }
                None => {
                    self.closed = true;
                    self.decoder.finish();
                }
            }
        }
    }

    pub fn malformed_frames(&self) -> usize {
        self.decoder.malformed_frames()
    }
}
