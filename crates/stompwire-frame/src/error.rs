/// Errors raised while moving frames over a byte stream.
///
/// Parsing itself never fails: malformed input is logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a frame.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// The transport refused a write.
    #[error("transport error: {0}")]
    Transport(#[from] stompwire_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
