//! In-process message sockets.
//!
//! [`channel`] returns a connector/server pair. Every `connect` on the
//! connector produces one [`MemoryConnection`] on the server side; data sent
//! by either end is delivered in order, and a close on either end is reported
//! to the client's [`EventSink`] exactly once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{CloseEvent, Connector, EventSink, ReadyState, Socket, SocketData, SocketEvent};

/// Create a connector and the server end that accepts its connections.
pub fn channel(url: impl Into<String>) -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            url: url.into(),
            accept_tx,
        },
        MemoryServer { accept_rx },
    )
}

/// Client side factory for in-memory sockets.
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    url: String,
    accept_tx: mpsc::UnboundedSender<MemoryConnection>,
}

impl Connector for MemoryConnector {
    fn connect(&self, sink: EventSink) -> Result<Box<dyn Socket>> {
        let state = Arc::new(AtomicU8::new(ReadyState::Open.to_u8()));

        if self.accept_tx.is_closed() {
            // The server end is gone: behave like a refused connection.
            debug!(url = %self.url, "memory server gone, refusing connection");
            state.store(ReadyState::Closed.to_u8(), Ordering::SeqCst);
            sink.emit(SocketEvent::Error("connection refused".to_string()));
            sink.emit(SocketEvent::Close(CloseEvent::abnormal("connection refused")));
            return Ok(Box::new(MemorySocket {
                url: self.url.clone(),
                outbound: None,
                sink,
                state,
            }));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connection = MemoryConnection {
            inbound: outbound_rx,
            sink: sink.clone(),
            state: Arc::clone(&state),
        };

        sink.emit(SocketEvent::Open);
        if self.accept_tx.send(connection).is_err() {
            // Lost a race with the server shutting down; the dropped
            // connection already reported an abnormal close.
            debug!(url = %self.url, "memory server closed during connect");
        }

        Ok(Box::new(MemorySocket {
            url: self.url.clone(),
            outbound: Some(outbound_tx),
            sink,
            state,
        }))
    }
}

/// Server side: hands out one [`MemoryConnection`] per client connect.
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryConnection>,
}

impl MemoryServer {
    /// Wait for the next client connection.
    ///
    /// Returns `None` once every connector has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.accept_rx.recv().await
    }

    /// Take an already pending connection, if any.
    pub fn try_accept(&mut self) -> Option<MemoryConnection> {
        self.accept_rx.try_recv().ok()
    }
}

/// Server end of one in-memory socket.
///
/// Dropping it without calling [`MemoryConnection::close`] reports an
/// abnormal close (1006) to the client.
#[derive(Debug)]
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<SocketData>,
    sink: EventSink,
    state: Arc<AtomicU8>,
}

impl MemoryConnection {
    /// Receive the next payload sent by the client.
    ///
    /// Returns `None` after the client closed and all queued data was read.
    pub async fn recv(&mut self) -> Option<SocketData> {
        self.inbound.recv().await
    }

    /// Take an already queued payload, if any.
    pub fn try_recv(&mut self) -> Option<SocketData> {
        self.inbound.try_recv().ok()
    }

    /// Deliver a payload to the client.
    pub fn send(&self, data: impl Into<SocketData>) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::NotOpen);
        }
        self.sink.emit(SocketEvent::Data(data.into()));
        Ok(())
    }

    /// Report a transport error to the client without closing.
    pub fn fail(&self, message: impl Into<String>) {
        self.sink.emit(SocketEvent::Error(message.into()));
    }

    /// Close the socket from the server side.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        close_once(
            &self.state,
            &self.sink,
            CloseEvent {
                code,
                reason: reason.into(),
                was_clean: true,
            },
        );
    }

    /// Returns true once either end closed the socket.
    pub fn is_closed(&self) -> bool {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst)) == ReadyState::Closed
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        close_once(
            &self.state,
            &self.sink,
            CloseEvent::abnormal("server connection dropped"),
        );
    }
}

/// Client end of one in-memory socket.
#[derive(Debug)]
pub struct MemorySocket {
    url: String,
    outbound: Option<mpsc::UnboundedSender<SocketData>>,
    sink: EventSink,
    state: Arc<AtomicU8>,
}

impl Socket for MemorySocket {
    fn send(&mut self, data: SocketData) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        match &self.outbound {
            Some(tx) => tx.send(data).map_err(|_| TransportError::Shutdown),
            None => Err(TransportError::NotOpen),
        }
    }

    fn close(&mut self) {
        self.outbound = None;
        close_once(&self.state, &self.sink, CloseEvent::normal());
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

fn close_once(state: &AtomicU8, sink: &EventSink, event: CloseEvent) {
    let previous = state.swap(ReadyState::Closed.to_u8(), Ordering::SeqCst);
    if ReadyState::from_u8(previous) != ReadyState::Closed {
        sink.emit(SocketEvent::Close(event));
    }
}
