use bytes::Bytes;
use stompwire_transport::{Socket, SocketData};
use tracing::trace;

use crate::codec::{encode_frame, Encoded, Frame};
use crate::error::Result;

/// Default upper bound for one transport send when splitting: 8 KiB.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8 * 1024;

/// Outgoing serialization options.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Escape header values (negotiated protocol 1.2).
    pub escape_header_values: bool,
    /// Send text frames as binary transport messages.
    pub force_binary: bool,
    /// Split text frames larger than `max_chunk_size` across several sends.
    pub split_large_frames: bool,
    pub max_chunk_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            escape_header_values: false,
            force_binary: false,
            split_large_frames: false,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

/// Serializes frames onto a message socket.
pub struct FrameWriter<S> {
    inner: S,
    config: WriterConfig,
}

impl<S: Socket> FrameWriter<S> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, WriterConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: S, config: WriterConfig) -> Self {
        Self { inner, config }
    }

    /// Serialize and send one frame.
    ///
    /// Returns the number of transport sends used.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<usize> {
        let encoded = encode_frame(frame, self.config.escape_header_values);

        match encoded {
            Encoded::Text(text) if self.config.force_binary => {
                self.inner.send(SocketData::Binary(Bytes::from(text)))?;
                Ok(1)
            }
            Encoded::Text(text)
                if self.config.split_large_frames && text.len() > self.config.max_chunk_size =>
            {
                let chunks = split_text(&text, self.config.max_chunk_size);
                let count = chunks.len();
                for chunk in chunks {
                    self.inner.send(SocketData::Text(chunk.to_string()))?;
                }
                trace!(command = %frame.command, chunks = count, "frame split across sends");
                Ok(count)
            }
            other => {
                self.inner.send(other.into())?;
                Ok(1)
            }
        }
    }

    /// Send a single-LF heart-beat.
    pub fn write_heartbeat(&mut self) -> Result<()> {
        self.inner.send(SocketData::Text("\n".to_string()))?;
        Ok(())
    }

    /// Switch header escaping after version negotiation.
    pub fn set_escape_header_values(&mut self, escape: bool) {
        self.config.escape_header_values = escape;
    }

    /// Borrow the underlying socket.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Mutably borrow the underlying socket.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consume the writer and return the inner socket.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }
}

/// Split `text` into pieces of at most `max` bytes on char boundaries.
fn split_text(text: &str, max: usize) -> Vec<&str> {
    let max = max.max(4);
    let mut chunks = Vec::with_capacity(text.len() / max + 1);
    let mut rest = text;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}
