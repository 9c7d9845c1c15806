//! STOMP over message sockets.
//!
//! stompwire speaks the STOMP 1.0/1.1/1.2 wire protocol over any message
//! socket (WebSocket in practice), with heart-beats and a reconnecting
//! client lifecycle.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket boundary, in-memory and WebSocket transports
//! - [`frame`]: frame model, serializer, incremental parser
//! - [`client`]: session handling, heart-beats, reconnecting [`Client`]

/// Re-export transport types.
pub mod transport {
    pub use stompwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use stompwire_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use stompwire_client::*;
}

pub use stompwire_client::{
    Client, ClientBuilder, ClientConfig, ClientError, DeactivateOptions, Message, PublishParams,
};
pub use stompwire_frame::{Frame, Headers};
