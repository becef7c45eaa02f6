//! Newline-delimited frame decoding.
//!
//! The wire format is a sequence of lines, each either raw JSON or prefixed
//! with `data: `. Reads may split a line (or a UTF-8 character) anywhere, so
//! the decoder buffers the trailing partial line until the next chunk arrives
//! or the stream ends.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;

use crate::error::{CoreResult, PaperStreamError};

/// Terminal sentinel sent by OpenAI-compatible backends.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Optional SSE field prefix in front of each payload.
pub const DATA_PREFIX: &str = "data: ";

/// One complete line from the stream, `\n` (and any `\r`) removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(String);

impl RawFrame {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Payload with an optional leading `data: ` removed.
    pub fn payload(&self) -> &str {
        strip_data_prefix(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// What the decoder hands upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(RawFrame),
    /// The `[DONE]` sentinel was seen.
    Done,
}

pub(crate) fn strip_data_prefix(line: &str) -> &str {
    line.strip_prefix(DATA_PREFIX).unwrap_or(line)
}

/// Incremental line splitter.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: String,
    // Bytes of a UTF-8 sequence cut by a read boundary.
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append already-decoded text.
    pub fn push_str(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
    }

    /// Append raw bytes, holding back an incomplete trailing UTF-8 sequence.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(s) => {
                self.buf.push_str(s);
                self.pending.clear();
                return;
            }
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Genuinely invalid bytes, not just a truncated tail.
            Err(_) => {
                let tail = incomplete_tail_len(&self.pending);
                self.pending.len() - tail
            }
        };
        let rest = self.pending.split_off(valid_up_to);
        let head = std::mem::replace(&mut self.pending, rest);
        self.buf.push_str(&String::from_utf8_lossy(&head));
    }

    /// Pull the next complete frame out of the buffer, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        while let Some(idx) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=idx).collect();
            if let Some(frame) = to_frame(line) {
                return Some(frame);
            }
        }
        None
    }

    /// Append `chunk` and lazily yield every frame it completes.
    pub fn decode<'a>(&'a mut self, chunk: &str) -> impl Iterator<Item = Frame> + 'a {
        self.push_str(chunk);
        std::iter::from_fn(move || self.next_frame())
    }

    /// Flush at end of stream: whatever remains is one last line.
    pub fn finish(&mut self) -> Option<Frame> {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.buf.push_str(&String::from_utf8_lossy(&pending));
        }
        if let Some(frame) = self.next_frame() {
            return Some(frame);
        }
        let rest = std::mem::take(&mut self.buf);
        to_frame(rest)
    }

    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty() || !self.pending.is_empty()
    }
}

fn to_frame(mut line: String) -> Option<Frame> {
    if line.ends_with('\n') {
        line.pop();
    }
    if line.ends_with('\r') {
        line.pop();
    }
    if line.trim().is_empty() {
        return None;
    }
    if strip_data_prefix(&line).trim() == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    Some(Frame::Data(RawFrame(line)))
}

/// Length of a trailing UTF-8 lead sequence that could still be completed.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    for back in 1..=3.min(bytes.len()) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

/// Frames decoded from a byte stream; a read error ends the stream with a
/// `Transport` error item.
pub struct FrameStream<E> {
    inner: ByteStream<E>,
    decoder: FrameDecoder,
    finished: bool,
}

impl<E> FrameStream<E> {
    pub fn new(inner: ByteStream<E>) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            finished: false,
        }
    }
}

impl<E> Stream for FrameStream<E>
where
    E: std::fmt::Display,
{
    type Item = CoreResult<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }
            // If we already have a complete line buffered, yield it immediately.
            if let Some(frame) = self.decoder.next_frame() {
                return Poll::Ready(Some(Ok(frame)));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.decoder.push_bytes(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(PaperStreamError::transport(e.to_string()))));
                }
                Poll::Ready(None) => {
                    // The inner stream is exhausted; never poll it again.
                    self.finished = true;
                    return Poll::Ready(self.decoder.finish().map(Ok));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
