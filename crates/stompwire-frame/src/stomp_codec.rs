//! `tokio_util::codec` adapter for STOMP over a raw byte stream (TCP, pipes).

use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, LF};
use crate::error::{FrameError, Result};
use crate::parser::{ParseEvent, Parser};

/// Item produced and consumed by [`StompCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    Frame(Frame),
    Heartbeat,
}

/// Stream codec built on the incremental [`Parser`].
#[derive(Debug, Default)]
pub struct StompCodec {
    parser: Parser,
    ready: VecDeque<StompItem>,
    escape_header_values: bool,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Escape and unescape header values (STOMP 1.2).
    pub fn with_escape_header_values(mut self, escape: bool) -> Self {
        self.escape_header_values = escape;
        self
    }

    pub fn set_escape_header_values(&mut self, escape: bool) {
        self.escape_header_values = escape;
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StompItem>> {
        if let Some(item) = self.ready.pop_front() {
            return Ok(Some(item));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let chunk = src.split();
        let escape = self.escape_header_values;
        let ready = &mut self.ready;
        self.parser.parse_chunk(&chunk, false, |event| {
            ready.push_back(match event {
                ParseEvent::Frame(raw) => StompItem::Frame(Frame::from_raw(raw, escape)),
                ParseEvent::Heartbeat => StompItem::Heartbeat,
            });
        });

        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<StompItem>> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if self.parser.is_idle() {
            Ok(None)
        } else {
            self.parser.reset();
            Err(FrameError::ConnectionClosed)
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = FrameError;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<()> {
        match item {
            StompItem::Frame(frame) => {
                let encoded = encode_frame(&frame, self.escape_header_values);
                dst.extend_from_slice(encoded.as_bytes());
            }
            StompItem::Heartbeat => dst.put_u8(LF),
        }
        Ok(())
    }
}
