use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Close code for a normal, clean shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the connection dropped without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code synthesized locally when a socket is discarded without waiting
/// for the shutdown sequence.
pub const CLOSE_DISCARDED: u16 = 4001;

/// One message-socket payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketData {
    Text(String),
    Binary(Bytes),
}

impl SocketData {
    /// Raw bytes of the payload, regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SocketData::Text(text) => text.as_bytes(),
            SocketData::Binary(bytes) => bytes.as_ref(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for binary payloads.
    pub fn is_binary(&self) -> bool {
        matches!(self, SocketData::Binary(_))
    }
}

impl From<String> for SocketData {
    fn from(value: String) -> Self {
        SocketData::Text(value)
    }
}

impl From<&str> for SocketData {
    fn from(value: &str) -> Self {
        SocketData::Text(value.to_string())
    }
}

impl From<Bytes> for SocketData {
    fn from(value: Bytes) -> Self {
        SocketData::Binary(value)
    }
}

impl From<Vec<u8>> for SocketData {
    fn from(value: Vec<u8>) -> Self {
        SocketData::Binary(Bytes::from(value))
    }
}

/// Socket lifecycle, mirroring the WebSocket `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    /// Returns true while the socket can still produce events.
    pub fn is_live(self) -> bool {
        matches!(self, ReadyState::Connecting | ReadyState::Open)
    }

    /// Compact encoding used to share the state through an atomic.
    pub fn to_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }

    /// Inverse of [`ReadyState::to_u8`]; unknown values map to `Closed`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Details of a closed socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseEvent {
    /// A clean close with code 1000.
    pub fn normal() -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: String::new(),
            was_clean: true,
        }
    }

    /// An unclean close with code 1006.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

/// Everything a transport reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Data(SocketData),
    Error(String),
    Close(CloseEvent),
}

/// Delivery endpoint a transport reports [`SocketEvent`]s into.
///
/// Cloned into the transport at connect time. Once [`EventSink::detach`] has
/// been called, every later event from the transport is dropped, so a
/// discarded socket cannot reach its former owner.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(SocketEvent) + Send + Sync>,
    detached: Arc<AtomicBool>,
}

impl EventSink {
    /// Create a sink around a delivery function.
    pub fn new(deliver: impl Fn(SocketEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deliver an event unless the sink has been detached.
    pub fn emit(&self, event: SocketEvent) {
        if self.is_detached() {
            tracing::trace!(?event, "dropping event from detached socket");
            return;
        }
        (self.deliver)(event);
    }

    /// Stop delivering events from this transport.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    /// Returns true after [`EventSink::detach`].
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// A connected (or connecting) message socket.
///
/// Sends are non-blocking: implementations queue the payload and report
/// failures asynchronously through the [`EventSink`].
pub trait Socket: Send {
    /// Queue a payload for transmission.
    fn send(&mut self, data: SocketData) -> Result<()>;

    /// Start closing the socket. A `Close` event follows through the sink.
    fn close(&mut self);

    /// Current lifecycle state.
    fn ready_state(&self) -> ReadyState;

    /// The URL this socket was opened against.
    fn url(&self) -> &str;
}

impl<S: Socket + ?Sized> Socket for Box<S> {
    fn send(&mut self, data: SocketData) -> Result<()> {
        (**self).send(data)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn ready_state(&self) -> ReadyState {
        (**self).ready_state()
    }

    fn url(&self) -> &str {
        (**self).url()
    }
}

/// Socket factory.
///
/// `connect` returns immediately; the outcome of the attempt arrives as an
/// `Open` or `Error`/`Close` event on the sink.
pub trait Connector: Send + Sync {
    fn connect(&self, sink: EventSink) -> Result<Box<dyn Socket>>;
}

impl<F> Connector for F
where
    F: Fn(EventSink) -> Result<Box<dyn Socket>> + Send + Sync,
{
    fn connect(&self, sink: EventSink) -> Result<Box<dyn Socket>> {
        self(sink)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn sink_delivers_until_detached() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            EventSink::new(move |event| seen.lock().unwrap().push(event))
        };

        let transport_side = sink.clone();
        transport_side.emit(SocketEvent::Open);
        sink.detach();
        transport_side.emit(SocketEvent::Close(CloseEvent::normal()));

        assert!(transport_side.is_detached());
        assert_eq!(seen.lock().unwrap().as_slice(), &[SocketEvent::Open]);
    }

    #[test]
    fn socket_data_views() {
        let text = SocketData::from("héllo");
        assert_eq!(text.len(), 6);
        assert!(!text.is_binary());

        let binary = SocketData::from(vec![0u8, 1, 2]);
        assert!(binary.is_binary());
        assert_eq!(binary.as_bytes(), &[0, 1, 2]);
        assert!(!binary.is_empty());
    }

    #[test]
    fn ready_state_roundtrips_through_u8() {
        for state in [
            ReadyState::Connecting,
            ReadyState::Open,
            ReadyState::Closing,
            ReadyState::Closed,
        ] {
            assert_eq!(ReadyState::from_u8(state.to_u8()), state);
        }
        assert!(ReadyState::Open.is_live());
        assert!(!ReadyState::Closing.is_live());
    }

    #[test]
    fn closure_is_a_connector() {
        let connector = |_sink: EventSink| -> Result<Box<dyn Socket>> {
            Err(crate::TransportError::Shutdown)
        };
        let result = connector.connect(EventSink::new(|_| {}));
        assert!(matches!(result, Err(crate::TransportError::Shutdown)));
    }
}
