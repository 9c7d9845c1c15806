use std::sync::OnceLock;

use bytes::{BufMut, Bytes, BytesMut};
use stompwire_transport::SocketData;

use crate::command;
use crate::escape::{escape_header_value, unescape_header_value};
use crate::headers::Headers;

/// Header carrying the exact body length in bytes.
pub const CONTENT_LENGTH: &str = "content-length";

/// Byte terminating every frame on the wire.
pub const NULL: u8 = 0x00;

/// Line separator.
pub const LF: u8 = b'\n';

/// Frame payload: text or raw bytes, never both.
///
/// A binary body is decoded as UTF-8 (lossily) the first time its text view
/// is requested, and the result is kept for later calls.
#[derive(Debug, Clone)]
pub enum Body {
    Text(String),
    Binary { bytes: Bytes, text: OnceLock<String> },
}

impl Body {
    /// Binary body with an empty text cache.
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Body::Binary {
            bytes: bytes.into(),
            text: OnceLock::new(),
        }
    }

    /// Text view of the payload.
    pub fn as_text(&self) -> &str {
        match self {
            Body::Text(text) => text,
            Body::Binary { bytes, text } => {
                text.get_or_init(|| String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }

    /// Byte view of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Text(text) => text.as_bytes(),
            Body::Binary { bytes, .. } => bytes,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Body::Binary { .. })
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Text(String::new())
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        self.is_binary() == other.is_binary() && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Body {}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::binary(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::binary(value)
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Headers,
    pub body: Body,
    /// Serialize without a `content-length` header.
    pub skip_content_length_header: bool,
}

impl Frame {
    /// Frame with no headers and an empty text body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_headers(mut self, headers: &Headers) -> Self {
        self.headers.extend(headers.iter());
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_skip_content_length_header(mut self, skip: bool) -> Self {
        self.skip_content_length_header = skip;
        self
    }

    /// Text view of the body.
    pub fn body(&self) -> &str {
        self.body.as_text()
    }

    /// Byte view of the body.
    pub fn binary_body(&self) -> &[u8] {
        self.body.as_bytes()
    }

    pub fn is_binary_body(&self) -> bool {
        self.body.is_binary()
    }

    /// Shorthand for `self.headers.get(key)`.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Build a frame from parser output.
    ///
    /// Keys and values are trimmed. When a key repeats, the first occurrence
    /// wins. Values are unescaped when `escape_header_values` is set, except
    /// for CONNECT and CONNECTED.
    pub fn from_raw(raw: RawFrame, escape_header_values: bool) -> Self {
        let unescape = escape_header_values && !command::skips_escaping(&raw.command);

        let mut headers = Headers::new();
        for (key, value) in &raw.headers {
            let key = key.trim();
            if headers.contains_key(key) {
                continue;
            }
            let value = value.trim();
            let value = if unescape {
                unescape_header_value(value)
            } else {
                value.to_string()
            };
            headers.insert(key, value);
        }

        Self {
            command: raw.command,
            headers,
            body: Body::binary(raw.binary_body),
            skip_content_length_header: false,
        }
    }
}

/// A frame as it came off the wire: headers unmerged and still escaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub binary_body: Bytes,
}

/// Serialized frame, ready for one transport send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Text(String),
    Binary(Bytes),
}

impl Encoded {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Encoded::Text(text) => text.as_bytes(),
            Encoded::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Encoded> for SocketData {
    fn from(value: Encoded) -> Self {
        match value {
            Encoded::Text(text) => SocketData::Text(text),
            Encoded::Binary(bytes) => SocketData::Binary(bytes),
        }
    }
}

/// Serialize a frame.
///
/// Wire format:
/// ```text
/// COMMAND\n
/// key:value\n          (zero or more)
/// content-length:N\n   (binary or non-empty body, unless skipped)
/// \n
/// body\0
/// ```
///
/// Any `content-length` already present in `frame.headers` is replaced by
/// the computed byte length. Binary bodies produce [`Encoded::Binary`].
pub fn encode_frame(frame: &Frame, escape_header_values: bool) -> Encoded {
    let escape = escape_header_values && !command::skips_escaping(&frame.command);

    let mut head = String::with_capacity(64);
    head.push_str(&frame.command);
    head.push('\n');
    for (key, value) in frame.headers.iter() {
        if key == CONTENT_LENGTH {
            continue;
        }
        head.push_str(key);
        head.push(':');
        if escape {
            head.push_str(&escape_header_value(value));
        } else {
            head.push_str(value);
        }
        head.push('\n');
    }

    let body = frame.binary_body();
    if !frame.skip_content_length_header && (frame.is_binary_body() || !body.is_empty()) {
        head.push_str(CONTENT_LENGTH);
        head.push(':');
        head.push_str(&body.len().to_string());
        head.push('\n');
    }
    head.push('\n');

    match &frame.body {
        Body::Text(text) => {
            head.push_str(text);
            head.push('\0');
            Encoded::Text(head)
        }
        Body::Binary { bytes, .. } => {
            let mut buf = BytesMut::with_capacity(head.len() + bytes.len() + 1);
            buf.put_slice(head.as_bytes());
            buf.put_slice(bytes);
            buf.put_u8(NULL);
            Encoded::Binary(buf.freeze())
        }
    }
}
