//! Server-Sent Events (SSE) decoding for streamed chat replies.
//!
//! The chat endpoint answers with a line-oriented body in which every event is
//! a `data: <json>` line and the final event is `data: [DONE]`. This module
//! splits the raw byte stream into lines, classifies each line, and folds the
//! content deltas into the complete reply while handing every delta to a
//! [`Renderer`] as it arrives.

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};
use crate::observability::{STREAM_BYTES, STREAM_DELTAS, STREAM_DURATION, STREAM_MALFORMED};
use crate::render::Renderer;
use crate::types::StreamChunk;

/// Marker that prefixes every event payload line.
pub const DATA_PREFIX: &str = "data: ";

/// Payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// How often a stalled stream re-checks the renderer for an interrupt.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// The classification of one line of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A content delta to append to the reply.
    Content(String),
    /// The end-of-stream sentinel.
    Done,
    /// A `data:` payload that was not a usable JSON chunk.
    Malformed(String),
    /// A blank line, a non-data line, or a chunk without content.
    Skip,
}

/// Classify a single line of the response body.
///
/// Never fails: anything that cannot be understood is reported as
/// [`StreamEvent::Malformed`] or [`StreamEvent::Skip`] and left to the caller
/// to ignore.
pub fn decode_line(line: &str) -> StreamEvent {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return StreamEvent::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return StreamEvent::Skip;
    };
    if payload.trim() == DONE_SENTINEL {
        return StreamEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => match chunk.content() {
            Some(content) => StreamEvent::Content(content.to_string()),
            None => StreamEvent::Skip,
        },
        Err(_) => StreamEvent::Malformed(payload.to_string()),
    }
}

/// Split a stream of byte chunks into lines.
///
/// Lines may be terminated by `\n` or `\r\n` and may straddle chunk
/// boundaries, including in the middle of a multi-byte character. A trailing
/// line without a terminator is yielded when the body ends. Bytes that are not
/// valid UTF-8 are replaced rather than failing the stream; only errors from
/// the underlying byte stream are passed through.
pub fn process_lines<S>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let byte_stream = Box::pin(byte_stream);
    let buffer: Vec<u8> = Vec::new();

    stream::unfold(
        (byte_stream, buffer, false),
        |(mut byte_stream, mut buffer, mut finished)| async move {
            loop {
                if let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let mut line: Vec<u8> = buffer.drain(..=newline).collect();
                    line.pop();
                    return Some((Ok(line_to_string(line)), (byte_stream, buffer, finished)));
                }

                if finished {
                    if buffer.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut buffer);
                    return Some((Ok(line_to_string(line)), (byte_stream, buffer, finished)));
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend_from_slice(&bytes);
                    }
                    Some(Err(err)) => {
                        buffer.clear();
                        return Some((Err(err), (byte_stream, buffer, true)));
                    }
                    None => finished = true,
                }
            }
        },
    )
}

fn line_to_string(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(line) {
        Ok(line) => line,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Fold a stream of lines into the complete reply.
///
/// Each content delta is passed to `renderer.print_text` exactly once, in
/// stream order, and appended to the returned text. Decoding stops at the
/// `[DONE]` sentinel or when the lines run out. Malformed chunks are skipped.
///
/// # Errors
///
/// Errors from the line stream are returned unchanged. If the renderer asks
/// for an interrupt, decoding stops with [`Error::Abort`], also while the
/// stream is stalled waiting for the next line.
pub async fn decode_stream<S>(lines: S, renderer: &mut dyn Renderer) -> Result<String>
where
    S: Stream<Item = Result<String>>,
{
    let start = Instant::now();
    let mut lines = std::pin::pin!(lines);
    let mut text = String::new();
    let mut deltas = 0u64;
    let mut poll = tokio::time::interval(INTERRUPT_POLL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if renderer.should_interrupt() {
            renderer.print_interrupted();
            return Err(Error::abort("response interrupted by user"));
        }
        let next = tokio::select! {
            line = lines.next() => line,
            _ = poll.tick() => continue,
        };
        let Some(line) = next else {
            break;
        };
        let line = line?;
        match decode_line(&line) {
            StreamEvent::Content(delta) => {
                STREAM_DELTAS.click();
                deltas += 1;
                renderer.print_text(&delta);
                text.push_str(&delta);
            }
            StreamEvent::Done => break,
            StreamEvent::Malformed(raw) => {
                STREAM_MALFORMED.click();
                tracing::debug!(payload = %raw, "skipping malformed stream chunk");
            }
            StreamEvent::Skip => {}
        }
    }

    STREAM_DURATION.add(start.elapsed().as_secs_f64());
    tracing::debug!(deltas, chars = text.len(), "stream decoded");
    Ok(text)
}

/// Decode a raw response body: [`process_lines`] followed by [`decode_stream`].
pub async fn decode_sse<S>(byte_stream: S, renderer: &mut dyn Renderer) -> Result<String>
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    decode_stream(process_lines(byte_stream), renderer).await
}
