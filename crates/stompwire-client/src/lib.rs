//! Reconnecting STOMP client over a message socket.
//!
//! Build a [`Client`] with [`ClientBuilder`], call [`Client::activate`], and
//! the client connects, negotiates version and heart-beats, and keeps
//! reconnecting until [`Client::deactivate`] is awaited. Broker events reach
//! the application through the callbacks registered on the builder.

pub mod backoff;
pub mod callbacks;
pub mod client;
pub mod config;
pub mod error;
mod event_loop;
mod handle;
pub mod handshake;
pub mod heartbeat;
pub mod ids;
pub mod message;
mod session;
pub mod ticker;

pub use backoff::ReconnectBackoff;
pub use callbacks::Callbacks;
pub use client::{
    ActivationState, Client, ClientBuilder, DeactivateOptions, PublishParams, WeakClient,
};
pub use config::{ClientConfig, ReconnectMode, TickerStrategy};
pub use error::{ClientError, Result};
pub use heartbeat::{negotiate, parse_heartbeat_header, Heartbeat, Negotiated};
pub use ids::{CounterIds, IdGenerator, UuidIds};
pub use message::{Message, Subscription, Transaction};
pub use session::DISCARD_REASON;
pub use ticker::{new_ticker, IntervalTicker, ThreadTicker, Ticker};
