//! STOMP frame model, serializer, and incremental wire parser.
//!
//! A frame on the wire is:
//! - a command line
//! - zero or more `key:value` header lines
//! - a blank line, then the body and a terminating NUL byte
//!
//! [`Parser`] turns arbitrarily chunked input into [`RawFrame`]s and
//! heart-beats; [`encode_frame`] and [`FrameWriter`] go the other way.

pub mod codec;
pub mod command;
pub mod error;
pub mod escape;
pub mod headers;
pub mod parser;
#[cfg(feature = "async")]
pub mod stomp_codec;
pub mod version;
pub mod writer;

pub use codec::{encode_frame, Body, Encoded, Frame, RawFrame, CONTENT_LENGTH};
pub use error::{FrameError, Result};
pub use escape::{escape_header_value, unescape_header_value};
pub use headers::Headers;
pub use parser::{ParseEvent, Parser};
#[cfg(feature = "async")]
pub use stomp_codec::{StompCodec, StompItem};
pub use version::{UnknownVersion, Version, Versions};
pub use writer::{FrameWriter, WriterConfig, DEFAULT_MAX_CHUNK_SIZE};
