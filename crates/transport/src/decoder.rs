use std::collections::VecDeque;

use futures::{Stream, StreamExt, stream};

use crate::event::StreamEvent;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Incremental decoder for `data: <json>` framed response bodies.
///
/// Bytes are buffered until a `\n` arrives. A newline byte never occurs inside a
/// multi-byte UTF-8 sequence, so characters split across chunks are reassembled
/// before any text decoding happens. One decoder serves exactly one stream.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = memchr::memchr(b'\n', &self.buffer[consumed..]) {
            let line_end = consumed + offset;
            if let Some(event) = decode_line(&self.buffer[consumed..line_end]) {
                events.push(event);
            }
            consumed = line_end + 1;
        }
        self.buffer.drain(..consumed);

        events
    }

    /// Decodes a final unterminated line once the byte stream has ended.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let remainder = std::mem::take(&mut self.buffer);
        decode_line(&remainder).into_iter().collect()
    }

    /// Bytes held back waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8]) -> Option<StreamEvent> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }

    let line = String::from_utf8_lossy(raw);
    let data = line.strip_prefix(DATA_PREFIX)?;
    if data.trim() == DONE_SENTINEL {
        return None;
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(error = %error, data = %data, "discarding malformed stream event line");
            None
        }
    }
}

/// Adapts a stream of byte chunks into a lazy stream of decoded events.
///
/// A chunk error is forwarded once and ends the stream.
pub fn decode_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        decoder: EventStreamDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.ready.extend(events);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(error), state));
                }
                None => {
                    state.finished = true;
                    let events = state.decoder.finish();
                    state.ready.extend(events);
                }
            }
        }
    })
}

struct DecodeState<S> {
    chunks: std::pin::Pin<Box<S>>,
    decoder: EventStreamDecoder,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}
