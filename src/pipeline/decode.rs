//! Streaming decoders (Bytes -> frames)
//!
//! Decoders only deal with framing. What a frame means is up to the driver that consumes it.

use crate::{BoxStream, Error};
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;

/// Server-sent events decoder producing one JSON value per `data:` payload.
///
/// `event:`, `id:` and `retry:` fields and `:` comments are skipped; multi-line `data:` fields
/// are joined with `\n`. The stream ends at EOF or when the payload equals `done_signal`.
/// A payload that is not JSON is a [`Error::ProtocolDecode`].
#[derive(Debug, Clone)]
pub struct SseDecoder {
    done_signal: String,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new("[DONE]")
    }
}

impl SseDecoder {
    pub fn new(done_signal: impl Into<String>) -> Self {
        Self {
            done_signal: done_signal.into(),
        }
    }

    pub fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, Value> {
        let done_signal = self.done_signal.clone();

        // Buffer raw bytes; only complete frames are decoded, so a multi-byte character split
        // across chunks is reassembled first.
        let stream = stream::unfold(
            (Some(input), Vec::<u8>::new()),
            move |(mut input, mut buf)| {
                let done_signal = done_signal.clone();
                async move {
                    loop {
                        let src = input.as_mut()?;

                        if let Some(idx) = find(&buf, b"\n\n") {
                            let frame: Vec<u8> = buf.drain(..idx + 2).collect();
                            let frame = match utf8(&frame[..idx]) {
                                Ok(frame) => frame,
                                Err(e) => return Some((Err(e), (None, buf))),
                            };
                            match parse_event(frame, &done_signal) {
                                Frame::Skip => continue,
                                Frame::Done => return None,
                                Frame::Data(result) => return Some((result, (input, buf))),
                            }
                        }

                        match src.next().await {
                            Some(Ok(bytes)) => {
                                buf.extend_from_slice(&bytes);
                                normalize_crlf(&mut buf);
                            }
                            Some(Err(e)) => return Some((Err(e), (None, buf))),
                            None => {
                                // EOF: flush a trailing event without its blank line.
                                let rest = std::mem::take(&mut buf);
                                let rest = match utf8(&rest) {
                                    Ok(rest) => rest,
                                    Err(e) => return Some((Err(e), (None, Vec::new()))),
                                };
                                return match parse_event(rest, &done_signal) {
                                    Frame::Data(result) => Some((result, (None, Vec::new()))),
                                    Frame::Skip | Frame::Done => None,
                                };
                            }
                        }
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Rewrites `\r\n` to `\n` in place. A trailing `\r` stays until its `\n` arrives.
fn normalize_crlf(buf: &mut Vec<u8>) {
    if !buf.contains(&b'\r') {
        return;
    }
    let mut out = Vec::with_capacity(buf.len());
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\r' && buf.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        out.push(buf[i]);
        i += 1;
    }
    *buf = out;
}

fn utf8(bytes: &[u8]) -> crate::Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| Error::protocol_decode(format!("stream frame is not valid UTF-8: {}", e)))
}

enum Frame {
    Skip,
    Done,
    Data(crate::Result<Value>),
}

fn parse_event(frame: &str, done_signal: &str) -> Frame {
    let mut data: Vec<&str> = Vec::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data.is_empty() {
        return Frame::Skip;
    }
    let payload = data.join("\n");
    let payload = payload.trim();
    if payload.is_empty() {
        return Frame::Skip;
    }
    if payload == done_signal {
        return Frame::Done;
    }
    Frame::Data(serde_json::from_str(payload).map_err(|e| {
        Error::protocol_decode(format!("SSE payload is not valid JSON: {}", e))
    }))
}

/// Newline-delimited text decoder. Blank lines are skipped; a trailing line without `\n` is
/// emitted at EOF.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineDecoder;

impl LineDecoder {
    pub fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, String> {
        let stream = stream::unfold(
            (Some(input), Vec::<u8>::new()),
            move |(mut input, mut buf)| async move {
                loop {
                    let src = input.as_mut()?;

                    if let Some(idx) = buf.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buf.drain(..idx + 1).collect();
                        let line = match utf8(&raw[..idx]) {
                            Ok(line) => line.trim_end_matches('\r'),
                            Err(e) => return Some((Err(e), (None, buf))),
                        };
                        if line.trim().is_empty() {
                            continue;
                        }
                        return Some((Ok(line.to_string()), (input, buf)));
                    }

                    match src.next().await {
                        Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                        Some(Err(e)) => return Some((Err(e), (None, buf))),
                        None => {
                            let rest = std::mem::take(&mut buf);
                            let line = match utf8(&rest) {
                                Ok(line) => line.trim_end_matches('\r'),
                                Err(e) => return Some((Err(e), (None, Vec::new()))),
                            };
                            if line.trim().is_empty() {
                                return None;
                            }
                            return Some((Ok(line.to_string()), (None, Vec::new())));
                        }
                    }
                }
            },
        );

        Box::pin(stream)
    }
}
