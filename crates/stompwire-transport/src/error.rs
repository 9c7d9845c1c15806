/// Errors that can occur in message-socket transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open a socket to the specified URL.
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    /// The broker URL could not be turned into a connection request.
    #[error("invalid broker url: {0}")]
    InvalidUrl(String),

    /// The socket is not in the `Open` state.
    #[error("socket is not open")]
    NotOpen,

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
