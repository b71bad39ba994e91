//! Streaming decoder for server-sent multipart responses.
//!
//! Log and trace endpoints return `multipart/*` bodies whose parts arrive
//! over a long-lived connection. The decoder splits the raw byte stream into
//! body chunks and delimiter markers without buffering the whole body:
//! bytes already classified as body are flushed as soon as the scan leaves a
//! feed in the body stage, and the cursor only ever moves forward.
//!
//! # State machine
//!
//! Scanning runs one byte at a time through seven stages. The body stage
//! watches for the first byte of CRLF or `--`; the start stages match the
//! rest of the candidate delimiter prefix; the boundary stage matches the
//! boundary token itself; the end stages decide whether the delimiter closes
//! one part (trailing CRLF) or the whole stream (trailing `--`). Any
//! mismatch along the way falls back to the body stage, so a partial match
//! that diverges is delivered as ordinary body bytes rather than dropped.
//!
//! An extra blank line after a part delimiter is absorbed by a dedicated
//! trailing-CRLF stage. This is a compatibility quirk for servers that emit
//! non-conformant framing, not something the MIME grammar requires.
//!
//! Boundary comparison is byte-exact — MIME boundaries are ASCII, so the
//! token is never routed through charset decoding.

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use regex::Regex;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const CRLF: [u8; 2] = [b'\r', b'\n'];
const DOUBLE_DASH: [u8; 2] = [b'-', b'-'];

fn boundary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^multipart/.+; boundary=(.*)$").expect("boundary pattern is valid")
    })
}

/// An event produced by the multipart decoder, in byte-stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartEvent {
    /// A chunk of part body bytes.
    Body(Bytes),
    /// A delimiter between two parts; another part follows.
    Delimiter,
    /// The closing delimiter; no further parts follow.
    CloseDelimiter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Body,
    Boundary,
    EndCrLf,
    EndDoubleDash,
    StartCrLf,
    StartDoubleDash,
    TrailingCrLf,
}

/// Incremental decoder for one multipart response stream.
pub struct MultipartDecoder {
    boundary: Vec<u8>,
    buffer: BytesMut,
    stage: Stage,
    position: usize,
    body_position: usize,
    delimiter_position: usize,
    boundary_position: usize,
    crlf_position: usize,
    double_dash_position: usize,
}

impl MultipartDecoder {
    /// Create a decoder for the boundary advertised in a Content-Type value.
    ///
    /// The header must match `multipart/<subtype>; boundary=<token>` exactly;
    /// anything else is a non-recoverable configuration error.
    pub fn new(content_type: &str) -> Result<Self> {
        let boundary = boundary_pattern()
            .captures(content_type)
            .and_then(|captures| captures.get(1))
            .map(|token| token.as_str().as_bytes().to_vec())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::InvalidMultipartBoundary {
                content_type: content_type.to_string(),
            })?;

        Ok(MultipartDecoder {
            boundary,
            buffer: BytesMut::with_capacity(8192),
            stage: Stage::Body,
            position: 0,
            body_position: 0,
            delimiter_position: 0,
            boundary_position: 0,
            crlf_position: 0,
            double_dash_position: 0,
        })
    }

    /// Feed bytes to the decoder, returning the events they complete.
    ///
    /// Body bytes scanned before the end of the feed are flushed as a chunk
    /// whenever the scan finishes in the body stage, so a feed that ends
    /// mid-delimiter-candidate retains only the unresolved tail.
    pub fn decode(&mut self, data: &[u8]) -> Vec<MultipartEvent> {
        self.buffer.extend_from_slice(data);
        let mut events = Vec::new();

        while self.position < self.buffer.len() {
            let c = self.buffer[self.position];
            match self.stage {
                Stage::Body => self.body(c),
                Stage::Boundary => self.boundary(c),
                Stage::EndCrLf => self.end_crlf(c, &mut events),
                Stage::EndDoubleDash => self.end_double_dash(c, &mut events),
                Stage::StartCrLf => self.start_crlf(c),
                Stage::StartDoubleDash => self.start_double_dash(c),
                Stage::TrailingCrLf => self.trailing_crlf(c, &mut events),
            }
        }

        if self.stage == Stage::Body {
            self.emit_trailing_body(&mut events);
            self.reset();
        }

        events
    }

    /// Signal end of stream, resolving a close delimiter that ended the
    /// stream without a trailing byte after it.
    pub fn finish(&mut self) -> Vec<MultipartEvent> {
        let mut events = Vec::new();
        if self.stage == Stage::EndDoubleDash && self.double_dash_position == DOUBLE_DASH.len() {
            self.emit_body(&mut events);
            self.emit_close_delimiter(&mut events);
        }
        self.reset();
        events
    }

    fn body(&mut self, c: u8) {
        if c == CRLF[0] {
            self.delimiter_position = self.position;
            self.stage = Stage::StartCrLf;
            self.crlf_position = 1;
            self.position += 1;
        } else if c == DOUBLE_DASH[0] {
            self.delimiter_position = self.position;
            self.stage = Stage::StartDoubleDash;
            self.double_dash_position = 1;
            self.position += 1;
        } else {
            self.position += 1;
        }
    }

    fn boundary(&mut self, c: u8) {
        if self.boundary_position < self.boundary.len() {
            if self.boundary[self.boundary_position] == c {
                self.boundary_position += 1;
                self.position += 1;
            } else {
                self.stage = Stage::Body;
            }
        } else if c == CRLF[0] {
            self.stage = Stage::EndCrLf;
            self.crlf_position = 1;
            self.position += 1;
        } else if c == DOUBLE_DASH[0] {
            self.stage = Stage::EndDoubleDash;
            self.double_dash_position = 1;
            self.position += 1;
        } else {
            self.stage = Stage::Body;
        }
    }

    fn end_crlf(&mut self, c: u8, events: &mut Vec<MultipartEvent>) {
        if self.crlf_position < CRLF.len() {
            if CRLF[self.crlf_position] == c {
                self.crlf_position += 1;
                self.position += 1;
            } else {
                self.stage = Stage::Body;
            }
        } else if c == CRLF[0] {
            self.stage = Stage::TrailingCrLf;
            self.crlf_position = 1;
            self.position += 1;
        } else {
            self.emit_body(events);
            self.emit_delimiter(events);
        }
    }

    fn end_double_dash(&mut self, c: u8, events: &mut Vec<MultipartEvent>) {
        if self.double_dash_position < DOUBLE_DASH.len() {
            if DOUBLE_DASH[self.double_dash_position] == c {
                self.double_dash_position += 1;
                self.position += 1;
            } else {
                self.stage = Stage::Body;
            }
        } else {
            self.emit_body(events);
            self.emit_close_delimiter(events);
        }
    }

    fn start_crlf(&mut self, c: u8) {
        if self.crlf_position < CRLF.len() {
            if CRLF[self.crlf_position] == c {
                self.crlf_position += 1;
                self.position += 1;
            } else {
                self.stage = Stage::Body;
            }
        } else if c == DOUBLE_DASH[0] {
            self.stage = Stage::StartDoubleDash;
            self.double_dash_position = 1;
            self.position += 1;
        } else {
            self.stage = Stage::Body;
        }
    }

    fn start_double_dash(&mut self, c: u8) {
        if self.double_dash_position < DOUBLE_DASH.len() {
            if DOUBLE_DASH[self.double_dash_position] == c {
                self.double_dash_position += 1;
                self.position += 1;
            } else {
                self.stage = Stage::Body;
            }
        } else if c == self.boundary[0] {
            self.stage = Stage::Boundary;
            self.boundary_position = 1;
            self.position += 1;
        } else {
            self.stage = Stage::Body;
        }
    }

    fn trailing_crlf(&mut self, c: u8, events: &mut Vec<MultipartEvent>) {
        if self.crlf_position < CRLF.len() {
            if CRLF[self.crlf_position] == c {
                self.crlf_position += 1;
                self.position += 1;
            } else {
                self.stage = Stage::Body;
            }
        } else {
            self.emit_body(events);
            self.emit_delimiter(events);
        }
    }

    fn emit_body(&mut self, events: &mut Vec<MultipartEvent>) {
        if self.delimiter_position > self.body_position {
            events.push(MultipartEvent::Body(Bytes::copy_from_slice(
                &self.buffer[self.body_position..self.delimiter_position],
            )));
        }
        self.body_position = self.position;
    }

    fn emit_trailing_body(&mut self, events: &mut Vec<MultipartEvent>) {
        if self.position > self.body_position {
            events.push(MultipartEvent::Body(Bytes::copy_from_slice(
                &self.buffer[self.body_position..self.position],
            )));
        }
    }

    fn emit_delimiter(&mut self, events: &mut Vec<MultipartEvent>) {
        events.push(MultipartEvent::Delimiter);
        self.stage = Stage::Body;
    }

    fn emit_close_delimiter(&mut self, events: &mut Vec<MultipartEvent>) {
        events.push(MultipartEvent::CloseDelimiter);
        self.stage = Stage::Body;
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.position = 0;
        self.body_position = 0;
        self.stage = Stage::Body;
    }
}

/// A stream of [`MultipartEvent`]s decoded from a response body.
///
/// Backed by a spawned task that feeds the response's byte stream through a
/// [`MultipartDecoder`]; dropping the stream cancels delivery and releases
/// the underlying connection.
pub struct MultipartStream {
    receiver: ReceiverStream<Result<MultipartEvent>>,
}

impl MultipartStream {
    pub(crate) fn spawn(mut decoder: MultipartDecoder, response: reqwest::Response) -> Self {
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for event in decoder.decode(&bytes) {
                            if tx.send(Ok(event)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(Error::Transport(e))).await;
                        return;
                    }
                }
            }

            for event in decoder.finish() {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        MultipartStream {
            receiver: ReceiverStream::new(rx),
        }
    }

    /// Receive the next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<MultipartEvent>> {
        self.receiver.next().await
    }
}

impl Stream for MultipartStream {
    type Item = Result<MultipartEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> MultipartDecoder {
        MultipartDecoder::new("multipart/mixed; boundary=90cc2913a7e149e7bab969741d0ebcd8").unwrap()
    }

    fn boundary() -> &'static str {
        "90cc2913a7e149e7bab969741d0ebcd8"
    }

    #[test]
    fn test_boundary_extraction() {
        let decoder = decoder();
        assert_eq!(decoder.boundary, boundary().as_bytes());
    }

    #[test]
    fn test_invalid_content_type_fails_fast() {
        for content_type in ["application/json", "multipart/mixed", "multipart/mixed; boundary="] {
            assert!(matches!(
                MultipartDecoder::new(content_type),
                Err(Error::InvalidMultipartBoundary { .. })
            ));
        }
    }

    #[test]
    fn test_two_parts_round_trip() {
        let mut decoder = decoder();
        let input = format!(
            "part one\r\n--{b}\r\npart two\r\n--{b}--",
            b = boundary()
        );

        let mut events = decoder.decode(input.as_bytes());
        events.extend(decoder.finish());

        assert_eq!(
            events,
            vec![
                MultipartEvent::Body(Bytes::from_static(b"part one")),
                MultipartEvent::Delimiter,
                MultipartEvent::Body(Bytes::from_static(b"part two")),
                MultipartEvent::CloseDelimiter,
            ]
        );
    }

    #[test]
    fn test_many_parts_counts() {
        let n = 5;
        let mut decoder = decoder();
        let mut input = String::new();
        for i in 0..n {
            input.push_str(&format!("payload-{}", i));
            if i < n - 1 {
                input.push_str(&format!("\r\n--{}\r\n", boundary()));
            } else {
                input.push_str(&format!("\r\n--{}--", boundary()));
            }
        }

        let mut events = decoder.decode(input.as_bytes());
        events.extend(decoder.finish());

        let bodies = events
            .iter()
            .filter(|e| matches!(e, MultipartEvent::Body(_)))
            .count();
        let delimiters = events
            .iter()
            .filter(|e| matches!(e, MultipartEvent::Delimiter))
            .count();
        let closes = events
            .iter()
            .filter(|e| matches!(e, MultipartEvent::CloseDelimiter))
            .count();

        assert_eq!(bodies, n);
        assert_eq!(delimiters, n - 1);
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_close_delimiter_followed_by_trailing_bytes() {
        let mut decoder = decoder();
        let input = format!("last part\r\n--{}--\r\n", boundary());

        let events = decoder.decode(input.as_bytes());

        assert_eq!(events[0], MultipartEvent::Body(Bytes::from_static(b"last part")));
        assert_eq!(events[1], MultipartEvent::CloseDelimiter);
    }

    #[test]
    fn test_diverging_candidate_stays_in_body() {
        // CRLF followed by something that is not a dash is just body bytes.
        let mut decoder = decoder();
        let input = format!("before\r\nafter\r\n--{}--", boundary());

        let mut events = decoder.decode(input.as_bytes());
        events.extend(decoder.finish());

        assert_eq!(
            events,
            vec![
                MultipartEvent::Body(Bytes::from_static(b"before\r\nafter")),
                MultipartEvent::CloseDelimiter,
            ]
        );
    }

    #[test]
    fn test_partial_boundary_match_stays_in_body() {
        // The delimiter prefix matches but the token itself diverges.
        let mut decoder = decoder();
        let input = format!("a\r\n--90ccWRONG\r\nb\r\n--{}--", boundary());

        let mut events = decoder.decode(input.as_bytes());
        events.extend(decoder.finish());

        assert_eq!(
            events,
            vec![
                MultipartEvent::Body(Bytes::from_static(b"a\r\n--90ccWRONG\r\nb")),
                MultipartEvent::CloseDelimiter,
            ]
        );
    }

    #[test]
    fn test_fragmented_delivery_matches_single_feed() {
        let mut decoder = decoder();
        let input = format!(
            "part one\r\n--{b}\r\npart two\r\n--{b}--",
            b = boundary()
        );

        let mut events = Vec::new();
        // Feed a byte at a time to exercise every resumption point.
        for byte in input.as_bytes() {
            events.extend(decoder.decode(std::slice::from_ref(byte)));
        }
        events.extend(decoder.finish());

        let bodies: Vec<u8> = events
            .iter()
            .take_while(|e| !matches!(e, MultipartEvent::Delimiter))
            .filter_map(|e| match e {
                MultipartEvent::Body(bytes) => Some(bytes.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(bodies, b"part one");
        assert_eq!(events.last(), Some(&MultipartEvent::CloseDelimiter));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, MultipartEvent::Delimiter))
                .count(),
            1
        );
    }

    #[test]
    fn test_tolerates_extra_crlf_after_delimiter() {
        let mut decoder = decoder();
        let input = format!(
            "part one\r\n--{b}\r\n\r\npart two\r\n--{b}--",
            b = boundary()
        );

        let mut events = decoder.decode(input.as_bytes());
        events.extend(decoder.finish());

        assert_eq!(
            events,
            vec![
                MultipartEvent::Body(Bytes::from_static(b"part one")),
                MultipartEvent::Delimiter,
                MultipartEvent::Body(Bytes::from_static(b"part two")),
                MultipartEvent::CloseDelimiter,
            ]
        );
    }

    #[test]
    fn test_unterminated_stream_flushes_trailing_chunk() {
        let mut decoder = decoder();
        let events = decoder.decode(b"no boundary here");

        assert_eq!(
            events,
            vec![MultipartEvent::Body(Bytes::from_static(b"no boundary here"))]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_body_is_streamed_per_feed() {
        // A feed that ends in the body stage flushes immediately rather than
        // waiting for the next delimiter.
        let mut decoder = decoder();

        let first = decoder.decode(b"early ");
        assert_eq!(
            first,
            vec![MultipartEvent::Body(Bytes::from_static(b"early "))]
        );

        let input = format!("late\r\n--{}--", boundary());
        let mut events = decoder.decode(input.as_bytes());
        events.extend(decoder.finish());
        assert_eq!(
            events,
            vec![
                MultipartEvent::Body(Bytes::from_static(b"late")),
                MultipartEvent::CloseDelimiter,
            ]
        );
    }
}
