//! Server-Sent-Events framing: response bytes in, `{event, data}` frames out.
//!
//! Only framing happens here; field contents are interpreted in
//! [`crate::interpret`].

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::TransportError;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One blank-line-delimited SSE block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseFrame {
    pub fn new(event: Option<&str>, data: &str) -> Self {
        Self {
            event: event.map(String::from),
            data: Some(data.to_string()),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_none() && self.id.is_none() && self.retry.is_none()
    }

    fn byte_len(&self) -> usize {
        self.event.as_ref().map_or(0, String::len) + self.data.as_ref().map_or(0, String::len)
    }
}

/// Boxed frame stream handed from the transport to the orchestrator.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, TransportError>> + Send>>;

/// Parses a byte stream into [`SseFrame`]s.
///
/// Bytes are buffered rather than text so UTF-8 sequences split across
/// chunks decode correctly. At most one partial line plus one partial frame
/// is held at a time.
pub struct SseDecoder<S> {
    inner: S,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to contain no newline.
    scanned: usize,
    pending: SseFrame,
    bom_checked: bool,
    finished: bool,
    max_frame_bytes: usize,
}

impl<S> SseDecoder<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            scanned: 0,
            pending: SseFrame::default(),
            bom_checked: false,
            finished: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    /// Extract the next complete frame from already-buffered lines.
    fn next_buffered_frame(&mut self) -> Result<Option<SseFrame>, TransportError> {
        loop {
            let Some(pos) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') else {
                break;
            };
            let end = self.scanned + pos;
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            let line = &line[..line.len() - 1];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(frame) = self.process_line(line)? {
                return Ok(Some(frame));
            }
        }
        self.scanned = self.buffer.len();
        self.check_size()?;
        Ok(None)
    }

    fn process_line(&mut self, mut line: &[u8]) -> Result<Option<SseFrame>, TransportError> {
        if !self.bom_checked {
            self.bom_checked = true;
            line = line.strip_prefix(BOM).unwrap_or(line);
        }

        if line.is_empty() {
            // Block boundary: dispatch whatever was collected.
            let frame = std::mem::take(&mut self.pending);
            return Ok(if frame.is_empty() { None } else { Some(frame) });
        }

        if line[0] == b':' {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(line);
        let (field, value) = match text.find(':') {
            Some(idx) => {
                let value = &text[idx + 1..];
                (&text[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (text.as_ref(), ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => match self.pending.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_string()),
            },
            "id" => {
                if !value.contains('\0') {
                    self.pending.id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.pending.retry = Some(ms);
                }
            }
            other => {
                tracing::trace!(field = other, "ignoring unknown SSE field");
            }
        }

        self.check_size()?;
        Ok(None)
    }

    fn check_size(&self) -> Result<(), TransportError> {
        if self.pending.byte_len() + self.buffer.len() > self.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                limit: self.max_frame_bytes,
            });
        }
        Ok(())
    }

    fn fail(&mut self, err: TransportError) -> Poll<Option<Result<SseFrame, TransportError>>> {
        self.finished = true;
        self.buffer.clear();
        self.pending = SseFrame::default();
        Poll::Ready(Some(Err(err)))
    }
}

impl<S, E> Stream for SseDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SseFrame, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.next_buffered_frame() {
                Ok(Some(frame)) => return Poll::Ready(Some(Ok(frame))),
                Ok(None) => {}
                Err(e) => return self.fail(e),
            }

            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    return self.fail(TransportError::Stream(e.to_string()));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // A last line without trailing newline still counts.
                    let tail = std::mem::take(&mut self.buffer);
                    self.scanned = 0;
                    if !tail.is_empty() {
                        let tail = tail.strip_suffix(b"\r").unwrap_or(&tail);
                        if let Err(e) = self.process_line(tail) {
                            return self.fail(e);
                        }
                    }
                    let frame = std::mem::take(&mut self.pending);
                    if frame.is_empty() {
                        return Poll::Ready(None);
                    }
                    tracing::debug!("flushing unterminated SSE block at end of stream");
                    return Poll::Ready(Some(Ok(frame)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
