//! Stream demultiplexer for the controller side.
//!
//! Feeds arbitrary console chunks through [`scan`](crate::protocol::scan) and
//! splits them into pass-through bytes and decoded protocol messages. Chunk
//! boundaries carry no meaning: a prefix, body, or suffix may be split across
//! any number of pushes, and the concatenated pass-through output is the same
//! however the stream was chunked.
//!
//! Rules applied at every position of the stream:
//! - a frame is accepted only if prefix through suffix fits in `max_pending`
//!   bytes; otherwise its first byte is released as text and scanning resumes
//!   at the following byte
//! - a single `\n` or `\r\n` directly after a suffix belongs to the frame
//! - a frame that fails to decode is logged and dropped
//!
//! # Example
//!
//! ```
//! use consolewire::demux::{DemuxItem, StreamDemux};
//! use consolewire::protocol::{frame, Event, EventName};
//!
//! let mut demux = StreamDemux::new();
//! let ready = frame::encode(&Event::bare(EventName::ServerReady)).unwrap();
//! let (head, tail) = ready.split_at(10);
//!
//! let mut items = demux.push(b"[INFO] Done!\n");
//! items.extend(demux.push(head));
//! items.extend(demux.push(tail));
//!
//! assert_eq!(items.len(), 2);
//! assert!(matches!(items[1], DemuxItem::Message(_)));
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{BridgeError, Result};
use crate::protocol::frame::{self, MAX_FRAME_LEN, PREFIX};
use crate::protocol::{scan, Inbound, Segment};

/// Default cap on a single frame, prefix through suffix. Covers every frame a
/// bridge is willing to emit.
pub const DEFAULT_MAX_PENDING: usize = MAX_FRAME_LEN;

/// Read buffer size for [`DemuxReader`].
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Output of the demultiplexer, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum DemuxItem {
    /// Console bytes outside any frame, unmodified.
    Passthrough(Bytes),
    /// A decoded protocol message.
    Message(Inbound),
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub frames: u64,
    pub malformed: u64,
    pub abandoned: u64,
    pub passthrough_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scanning,
    /// A suffix was just consumed; an optional line ending may follow.
    AfterSuffix,
}

enum Step {
    Gap(usize),
    Frame(usize, std::result::Result<Inbound, crate::error::FrameError>),
    Abandon,
}

/// Splits a console byte stream into pass-through text and messages.
///
/// Single-threaded per stream; chunks must be pushed in stream order.
#[derive(Debug)]
pub struct StreamDemux {
    buffer: BytesMut,
    state: State,
    max_pending: usize,
    stats: DemuxStats,
}

impl StreamDemux {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    /// Create a demultiplexer with a custom frame size cap.
    ///
    /// The cap is raised to fit at least the marker and an empty body.
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::Scanning,
            max_pending: max_pending.max(PREFIX.len() + 2),
            stats: DemuxStats::default(),
        }
    }

    /// Push a chunk and return every item it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DemuxItem> {
        tracing::trace!(len = chunk.len(), held = self.buffer.len(), "demux chunk");
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        self.drain(&mut out, false);
        out
    }

    /// Release everything still held. Call once the stream has ended.
    pub fn flush(&mut self) -> Vec<DemuxItem> {
        let mut out = Vec::new();
        self.drain(&mut out, true);
        self.state = State::Scanning;
        out
    }

    /// Drop held bytes. Used when the underlying stream is reattached.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(discarded = self.buffer.len(), "demux reset");
        }
        self.buffer.clear();
        self.state = State::Scanning;
    }

    /// Bytes currently held back waiting for more input.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    fn drain(&mut self, out: &mut Vec<DemuxItem>, eof: bool) {
        loop {
            if self.state == State::AfterSuffix {
                let line_ending = match self.buffer.as_ref() {
                    [] | [b'\r'] if !eof => return,
                    [b'\r', b'\n', ..] => 2,
                    [b'\n', ..] => 1,
                    _ => 0,
                };
                self.buffer.advance(line_ending);
                self.state = State::Scanning;
            }

            let step = match scan(&self.buffer).next() {
                None => return,
                Some((span, Segment::Gap(_))) => Step::Gap(span.end),
                Some((span, Segment::Frame { body })) => {
                    if span.len() > self.max_pending {
                        Step::Abandon
                    } else {
                        let decoded = frame::decode_body(body).and_then(Inbound::try_from);
                        Step::Frame(span.end, decoded)
                    }
                }
                Some((span, Segment::Pending(tail))) => {
                    if eof {
                        Step::Gap(span.end)
                    } else if tail.len() >= self.max_pending {
                        Step::Abandon
                    } else {
                        return;
                    }
                }
            };

            match step {
                Step::Gap(end) => self.emit_text(out, end),
                Step::Abandon => {
                    tracing::warn!(
                        max_pending = self.max_pending,
                        "unterminated frame exceeded limit, releasing as text"
                    );
                    self.stats.abandoned += 1;
                    self.emit_text(out, 1);
                }
                Step::Frame(end, decoded) => {
                    self.buffer.advance(end);
                    self.state = State::AfterSuffix;
                    match decoded {
                        Ok(message) => {
                            self.stats.frames += 1;
                            out.push(DemuxItem::Message(message));
                        }
                        Err(e) => {
                            self.stats.malformed += 1;
                            tracing::warn!(error = %e, "dropping malformed frame");
                        }
                    }
                }
            }
        }
    }

    fn emit_text(&mut self, out: &mut Vec<DemuxItem>, len: usize) {
        let text = self.buffer.split_to(len).freeze();
        self.stats.passthrough_bytes += text.len() as u64;
        // Merge adjacent text so callers see fewer, larger chunks.
        if let Some(DemuxItem::Passthrough(prev)) = out.last_mut() {
            let mut merged = BytesMut::with_capacity(prev.len() + text.len());
            merged.extend_from_slice(prev);
            merged.extend_from_slice(&text);
            *prev = merged.freeze();
        } else {
            out.push(DemuxItem::Passthrough(text));
        }
    }
}

impl Default for StreamDemux {
    fn default() -> Self {
        Self::new()
    }
}

/// Async adapter that reads a console stream and demultiplexes it.
pub struct DemuxReader<R> {
    reader: R,
    demux: StreamDemux,
    buf: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> DemuxReader<R> {
    pub fn new(reader: R, demux: StreamDemux) -> Self {
        Self {
            reader,
            demux,
            buf: vec![0u8; READ_BUFFER_SIZE],
            finished: false,
        }
    }

    /// Wait for the next read and return the items it produced.
    ///
    /// Returns `Ok(None)` once the stream has ended and held bytes were flushed.
    /// A read may complete no item (e.g. half a frame); that yields an empty batch.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<DemuxItem>>> {
        if self.finished {
            return Ok(None);
        }
        let n = self.reader.read(&mut self.buf).await.map_err(BridgeError::Io)?;
        if n == 0 {
            self.finished = true;
            let rest = self.demux.flush();
            return Ok(if rest.is_empty() { None } else { Some(rest) });
        }
        Ok(Some(self.demux.push(&self.buf[..n])))
    }

    pub fn demux(&self) -> &StreamDemux {
        &self.demux
    }

    pub fn into_inner(self) -> (R, StreamDemux) {
        (self.reader, self.demux)
    }
}
