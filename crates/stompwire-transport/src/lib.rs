//! Message-socket transport boundary for STOMP clients.
//!
//! The STOMP client never talks to a network stack directly. It hands an
//! [`EventSink`] to a [`Connector`], gets back a [`Socket`] it can send on and
//! close, and receives everything else (open, data, errors, close) as
//! [`SocketEvent`]s through the sink.
//!
//! Two implementations ship with the crate:
//! - [`memory`]: in-process socket pairs (feature `memory`)
//! - [`ws`]: WebSocket over tokio-tungstenite (feature `websocket`)

pub mod error;
pub mod traits;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "websocket")]
pub mod ws;

pub use error::{Result, TransportError};
pub use traits::{
    CloseEvent, Connector, EventSink, ReadyState, Socket, SocketData, SocketEvent, CLOSE_ABNORMAL,
    CLOSE_DISCARDED, CLOSE_NORMAL,
};
