//! Incremental STOMP wire parser.
//!
//! Bytes may arrive in chunks of any size; all state persists between
//! [`Parser::parse_chunk`] calls. Each input byte is examined by exactly one
//! state, after at most one hand-off to the state it reclassified into.

use std::panic::{self, AssertUnwindSafe};

use bytes::{Bytes, BytesMut};
use tracing::{error, trace, warn};

use crate::codec::{RawFrame, CONTENT_LENGTH, LF, NULL};

const CR: u8 = b'\r';
const COLON: u8 = b':';

/// Upper bound on body capacity reserved from a declared `content-length`.
/// Larger bodies grow the buffer as their bytes arrive.
const MAX_BODY_PREALLOC: usize = 64 * 1024;

/// Output of the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// A complete frame.
    Frame(RawFrame),
    /// A bare LF between frames.
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitFrame,
    Command,
    Headers,
    HeaderKey,
    HeaderValue,
    BodyNullTerminated,
    BodyFixedSize { remaining: usize },
}

enum Step {
    Consumed,
    Replay,
}

/// Byte-at-a-time frame decoder.
#[derive(Debug)]
pub struct Parser {
    state: State,
    token: BytesMut,
    command: String,
    header_key: String,
    headers: Vec<(String, String)>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::AwaitFrame,
            token: BytesMut::new(),
            command: String::new(),
            header_key: String::new(),
            headers: Vec::new(),
        }
    }

    /// Feed one chunk, reporting completed frames and heartbeats to
    /// `on_event` in wire order.
    ///
    /// With `append_missing_null`, a NUL is fed after the chunk unless the
    /// chunk already ends with one.
    ///
    /// A panic inside `on_event` is caught and logged; parsing continues
    /// with the next byte.
    pub fn parse_chunk<F>(&mut self, chunk: &[u8], append_missing_null: bool, mut on_event: F)
    where
        F: FnMut(ParseEvent),
    {
        for &byte in chunk {
            self.push_byte(byte, &mut on_event);
        }
        if append_missing_null && chunk.last() != Some(&NULL) {
            self.push_byte(NULL, &mut on_event);
        }
    }

    /// Returns true when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitFrame
    }

    /// Drop any partially parsed frame.
    pub fn reset(&mut self) {
        self.state = State::AwaitFrame;
        self.token.clear();
        self.command.clear();
        self.header_key.clear();
        self.headers.clear();
    }

    fn push_byte<F: FnMut(ParseEvent)>(&mut self, byte: u8, on_event: &mut F) {
        loop {
            match self.step(byte, on_event) {
                Step::Consumed => return,
                Step::Replay => continue,
            }
        }
    }

    fn step<F: FnMut(ParseEvent)>(&mut self, byte: u8, on_event: &mut F) -> Step {
        match self.state {
            State::AwaitFrame => match byte {
                NULL | CR => {}
                LF => deliver(on_event, ParseEvent::Heartbeat),
                _ => {
                    self.state = State::Command;
                    return Step::Replay;
                }
            },
            State::Command => match byte {
                CR => {}
                LF => {
                    self.command = self.take_token_utf8();
                    self.state = State::Headers;
                }
                _ => self.token.extend_from_slice(&[byte]),
            },
            State::Headers => match byte {
                CR => {}
                LF => self.start_body(),
                _ => {
                    self.state = State::HeaderKey;
                    return Step::Replay;
                }
            },
            State::HeaderKey => match byte {
                CR => {}
                COLON => {
                    self.header_key = self.take_token_utf8();
                    self.state = State::HeaderValue;
                }
                _ => self.token.extend_from_slice(&[byte]),
            },
            State::HeaderValue => match byte {
                CR => {}
                LF => {
                    let value = self.take_token_utf8();
                    let key = std::mem::take(&mut self.header_key);
                    self.headers.push((key, value));
                    self.state = State::Headers;
                }
                _ => self.token.extend_from_slice(&[byte]),
            },
            State::BodyNullTerminated => match byte {
                NULL => self.finish_frame(on_event),
                _ => self.token.extend_from_slice(&[byte]),
            },
            State::BodyFixedSize { remaining: 0 } => self.finish_frame(on_event),
            State::BodyFixedSize { remaining } => {
                self.token.extend_from_slice(&[byte]);
                self.state = State::BodyFixedSize {
                    remaining: remaining - 1,
                };
            }
        }
        Step::Consumed
    }

    fn start_body(&mut self) {
        let declared = self
            .headers
            .iter()
            .find(|(key, _)| key == CONTENT_LENGTH)
            .map(|(_, value)| value.as_str());

        self.state = match declared {
            None => State::BodyNullTerminated,
            Some(value) => match value.trim().parse::<usize>() {
                Ok(remaining) => {
                    self.token.reserve(remaining.min(MAX_BODY_PREALLOC));
                    State::BodyFixedSize { remaining }
                }
                Err(_) => {
                    warn!(
                        command = %self.command,
                        content_length = value,
                        "ignoring malformed content-length, reading body up to NUL"
                    );
                    State::BodyNullTerminated
                }
            },
        };
    }

    fn finish_frame<F: FnMut(ParseEvent)>(&mut self, on_event: &mut F) {
        let frame = RawFrame {
            command: std::mem::take(&mut self.command),
            headers: std::mem::take(&mut self.headers),
            binary_body: self.take_token_raw(),
        };
        self.reset();
        trace!(command = %frame.command, body_len = frame.binary_body.len(), "frame parsed");
        deliver(on_event, ParseEvent::Frame(frame));
    }

    fn take_token_utf8(&mut self) -> String {
        let token = self.token.split();
        String::from_utf8_lossy(&token).into_owned()
    }

    fn take_token_raw(&mut self) -> Bytes {
        self.token.split().freeze()
    }
}

fn deliver<F: FnMut(ParseEvent)>(on_event: &mut F, event: ParseEvent) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| on_event(event)));
    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(error = %message, "frame handler panicked; continuing with next frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_frame, Frame};

    fn parse_all(parser: &mut Parser, chunk: &[u8]) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        parser.parse_chunk(chunk, false, |event| events.push(event));
        events
    }

    fn frame(event: &ParseEvent) -> &RawFrame {
        match event {
            ParseEvent::Frame(frame) => frame,
            ParseEvent::Heartbeat => panic!("expected a frame"),
        }
    }

    #[test]
    fn huge_content_length_does_not_preallocate() {
        let mut parser = Parser::new();
        let events = parse_all(
            &mut parser,
            b"MESSAGE\ncontent-length:18446744073709551615\n\nx",
        );
        assert!(events.is_empty());
        assert!(!parser.is_idle());
        assert!(parser.token.capacity() < 1 << 20);

        parser.reset();
        let events = parse_all(&mut parser, b"MESSAGE\ncontent-length:2\n\nok\0");
        assert_eq!(frame(&events[0]).binary_body.as_ref(), b"ok");
    }

    #[test]
    fn cr_in_header_key_is_skipped() {
        let mut parser = Parser::new();
        let events = parse_all(&mut parser, b"SEND\r\nfoo\r:bar\r\n\r\n\0");
        assert_eq!(
            frame(&events[0]).headers,
            vec![("foo".to_string(), "bar".to_string())]
        );
    }

    #[test]
    fn bare_lf_is_a_heartbeat() {
        let mut parser = Parser::new();
        assert_eq!(parse_all(&mut parser, b"\n"), vec![ParseEvent::Heartbeat]);
        assert!(parser.is_idle());
    }

    #[test]
    fn nul_and_cr_between_frames_are_ignored() {
        let mut parser = Parser::new();
        assert!(parse_all(&mut parser, b"\0\r\0").is_empty());
        assert!(parser.is_idle());
    }

    #[test]
    fn parses_a_simple_frame() {
        let mut parser = Parser::new();
        let events = parse_all(
            &mut parser,
            b"MESSAGE\ndestination:/queue/a\nmessage-id:7\n\nhello\0",
        );
        assert_eq!(events.len(), 1);
        let raw = frame(&events[0]);
        assert_eq!(raw.command, "MESSAGE");
        assert_eq!(
            raw.headers,
            vec![
                ("destination".to_string(), "/queue/a".to_string()),
                ("message-id".to_string(), "7".to_string()),
            ]
        );
        assert_eq!(raw.binary_body.as_ref(), b"hello");
    }

    #[test]
    fn crlf_line_endings() {
        let mut parser = Parser::new();
        let events = parse_all(&mut parser, b"RECEIPT\r\nreceipt-id:r-1\r\n\r\n\0");
        let raw = frame(&events[0]);
        assert_eq!(raw.command, "RECEIPT");
        assert_eq!(raw.headers[0], ("receipt-id".to_string(), "r-1".to_string()));
    }

    #[test]
    fn header_value_may_contain_colons() {
        let mut parser = Parser::new();
        let events = parse_all(&mut parser, b"ERROR\nmessage:a:b:c\n\n\0");
        assert_eq!(frame(&events[0]).headers[0].1, "a:b:c");
    }

    #[test]
    fn content_length_allows_embedded_nul() {
        let mut parser = Parser::new();
        let events = parse_all(&mut parser, b"MESSAGE\ncontent-length:3\n\n\x00\x01\x00\x00\n");
        assert_eq!(events.len(), 2);
        assert_eq!(frame(&events[0]).binary_body.as_ref(), &[0, 1, 0]);
        assert_eq!(events[1], ParseEvent::Heartbeat);
    }

    #[test]
    fn zero_content_length() {
        let mut parser = Parser::new();
        let events = parse_all(&mut parser, b"MESSAGE\ncontent-length:0\n\n\0");
        assert_eq!(events.len(), 1);
        assert!(frame(&events[0]).binary_body.is_empty());
    }

    #[test]
    fn malformed_content_length_falls_back_to_nul() {
        let mut parser = Parser::new();
        let events = parse_all(&mut parser, b"MESSAGE\ncontent-length:abc\n\nbody\0");
        assert_eq!(events.len(), 1);
        assert_eq!(frame(&events[0]).binary_body.as_ref(), b"body");
    }

    #[test]
    fn split_at_every_offset_yields_same_frame() {
        let source = Frame::new("MESSAGE")
            .with_header("subscription", "sub-0")
            .with_header("message-id", "m\\1")
            .with_body("payload with ünïcode");
        let wire = encode_frame(&source, true);
        let bytes = wire.as_bytes();

        let mut whole = Parser::new();
        let expected = parse_all(&mut whole, bytes);
        assert_eq!(expected.len(), 1);

        for split in 0..=bytes.len() {
            let mut parser = Parser::new();
            let mut events = parse_all(&mut parser, &bytes[..split]);
            events.extend(parse_all(&mut parser, &bytes[split..]));
            assert_eq!(events, expected, "split at {split}");
        }

        let mut parser = Parser::new();
        let mut events = Vec::new();
        for byte in bytes {
            events.extend(parse_all(&mut parser, std::slice::from_ref(byte)));
        }
        assert_eq!(events, expected);
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let mut parser = Parser::new();
        let events = parse_all(&mut parser, b"RECEIPT\nreceipt-id:1\n\n\0\nRECEIPT\nreceipt-id:2\n\n\0");
        assert_eq!(events.len(), 3);
        assert_eq!(frame(&events[0]).headers[0].1, "1");
        assert_eq!(events[1], ParseEvent::Heartbeat);
        assert_eq!(frame(&events[2]).headers[0].1, "2");
    }

    #[test]
    fn round_trip_through_frame() {
        let source = Frame::new("SEND")
            .with_header("destination", "/topic/x")
            .with_header("weird", "a:b\\c\nd\re")
            .with_body("body ✓");
        let wire = encode_frame(&source, true);

        let mut parser = Parser::new();
        let events = parse_all(&mut parser, wire.as_bytes());
        let ParseEvent::Frame(raw) = events[0].clone() else {
            panic!("expected frame");
        };
        let parsed = Frame::from_raw(raw, true);

        assert_eq!(parsed.command, source.command);
        assert_eq!(parsed.header("destination"), Some("/topic/x"));
        assert_eq!(parsed.header("weird"), Some("a:b\\c\nd\re"));
        assert_eq!(parsed.binary_body(), source.binary_body());
    }

    #[test]
    fn append_missing_null() {
        let mut parser = Parser::new();
        let mut events = Vec::new();
        parser.parse_chunk(b"MESSAGE\n\nbody", true, |event| events.push(event));
        assert_eq!(events.len(), 1);
        assert_eq!(frame(&events[0]).binary_body.as_ref(), b"body");

        events.clear();
        parser.parse_chunk(b"MESSAGE\n\nbody\0", true, |event| events.push(event));
        assert_eq!(events.len(), 1);
        assert!(parser.is_idle());
    }

    #[test]
    fn panicking_handler_does_not_corrupt_state() {
        let mut parser = Parser::new();
        let mut seen = Vec::new();
        parser.parse_chunk(b"ERROR\n\nfirst\0MESSAGE\n\nsecond\0", false, |event| {
            let raw = match &event {
                ParseEvent::Frame(raw) => raw.clone(),
                ParseEvent::Heartbeat => return,
            };
            if raw.command == "ERROR" {
                panic!("handler failure");
            }
            seen.push(raw);
        });
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].command, "MESSAGE");
        assert_eq!(seen[0].binary_body.as_ref(), b"second");
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut parser = Parser::new();
        assert!(parse_all(&mut parser, b"MESSAGE\nfoo:b").is_empty());
        assert!(!parser.is_idle());
        parser.reset();
        let events = parse_all(&mut parser, b"RECEIPT\n\n\0");
        assert_eq!(frame(&events[0]).command, "RECEIPT");
        assert!(frame(&events[0]).headers.is_empty());
    }
}
