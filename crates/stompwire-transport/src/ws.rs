//! WebSocket transport over tokio-tungstenite.
//!
//! Each socket is driven by one tokio task: it performs the opening
//! handshake, pumps queued outgoing payloads, and reports incoming text and
//! binary messages through the [`EventSink`]. `connect` must be called from
//! within a tokio runtime.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    CloseEvent, Connector, EventSink, ReadyState, Socket, SocketData, SocketEvent, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};

/// Opens WebSocket connections to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    protocols: Vec<String>,
}

impl WebSocketConnector {
    /// Connector for `ws://` or `wss://` URLs.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
        }
    }

    /// Offer these subprotocols in `Sec-WebSocket-Protocol`.
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

enum Outgoing {
    Data(SocketData),
    Close,
}

impl Connector for WebSocketConnector {
    fn connect(&self, sink: EventSink) -> Result<Box<dyn Socket>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::InvalidUrl(format!("{}: {err}", self.url)))?;

        if !self.protocols.is_empty() {
            let value = HeaderValue::from_str(&self.protocols.join(", "))
                .map_err(|err| TransportError::InvalidUrl(format!("bad subprotocol list: {err}")))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let state = Arc::new(AtomicU8::new(ReadyState::Connecting.to_u8()));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(drive_socket(
            request,
            self.url.clone(),
            rx,
            sink,
            Arc::clone(&state),
        ));

        Ok(Box::new(WebSocket {
            url: self.url.clone(),
            tx,
            state,
        }))
    }
}

/// Client handle to a socket driven by a background task.
#[derive(Debug)]
pub struct WebSocket {
    url: String,
    tx: mpsc::UnboundedSender<Outgoing>,
    state: Arc<AtomicU8>,
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outgoing::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            Outgoing::Close => f.write_str("Close"),
        }
    }
}

impl Socket for WebSocket {
    fn send(&mut self, data: SocketData) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::NotOpen);
        }
        self.tx
            .send(Outgoing::Data(data))
            .map_err(|_| TransportError::Shutdown)
    }

    fn close(&mut self) {
        if self.ready_state().is_live() {
            self.state
                .store(ReadyState::Closing.to_u8(), Ordering::SeqCst);
            let _ = self.tx.send(Outgoing::Close);
        }
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

async fn drive_socket(
    request: tokio_tungstenite::tungstenite::handshake::client::Request,
    url: String,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    sink: EventSink,
    state: Arc<AtomicU8>,
) {
    let connecting = tokio_tungstenite::connect_async(request);
    tokio::pin!(connecting);

    let stream = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok((stream, _response)) => break stream,
                Err(err) => {
                    warn!(%url, error = %err, "websocket connect failed");
                    state.store(ReadyState::Closed.to_u8(), Ordering::SeqCst);
                    sink.emit(SocketEvent::Error(err.to_string()));
                    sink.emit(SocketEvent::Close(CloseEvent::abnormal(err.to_string())));
                    return;
                }
            },
            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Data(_)) => continue,
                Some(Outgoing::Close) | None => {
                    debug!(%url, "websocket closed before open");
                    state.store(ReadyState::Closed.to_u8(), Ordering::SeqCst);
                    sink.emit(SocketEvent::Close(CloseEvent::abnormal("closed before open")));
                    return;
                }
            },
        }
    };

    // A close requested while the handshake finished is honoured below.
    if ReadyState::from_u8(state.load(Ordering::SeqCst)) == ReadyState::Connecting {
        state.store(ReadyState::Open.to_u8(), Ordering::SeqCst);
    }
    debug!(%url, "websocket open");
    sink.emit(SocketEvent::Open);

    let (mut write, mut read) = stream.split();
    let mut outgoing_open = true;
    let mut close_event: Option<CloseEvent> = None;

    loop {
        tokio::select! {
            outgoing = rx.recv(), if outgoing_open => match outgoing {
                Some(Outgoing::Data(data)) => {
                    let message = match data {
                        SocketData::Text(text) => Message::text(text),
                        SocketData::Binary(bytes) => Message::binary(bytes),
                    };
                    if let Err(err) = write.send(message).await {
                        sink.emit(SocketEvent::Error(err.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    outgoing_open = false;
                    state.store(ReadyState::Closing.to_u8(), Ordering::SeqCst);
                    if let Err(err) = write.send(Message::Close(None)).await {
                        debug!(%url, error = %err, "failed sending close frame");
                        break;
                    }
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(SocketEvent::Data(SocketData::Text(text.as_str().to_string())));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    sink.emit(SocketEvent::Data(SocketData::Binary(bytes)));
                }
                Some(Ok(Message::Close(frame))) => {
                    close_event = Some(match frame {
                        Some(frame) => CloseEvent {
                            code: u16::from(frame.code),
                            reason: frame.reason.as_str().to_string(),
                            was_clean: true,
                        },
                        None => CloseEvent::normal(),
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    sink.emit(SocketEvent::Error(err.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    state.store(ReadyState::Closed.to_u8(), Ordering::SeqCst);
    let event = close_event.unwrap_or_else(|| {
        if outgoing_open {
            CloseEvent::abnormal("connection lost")
        } else {
            CloseEvent {
                code: CLOSE_NORMAL,
                reason: String::new(),
                was_clean: true,
            }
        }
    });
    debug!(%url, code = event.code, "websocket closed");
    sink.emit(SocketEvent::Close(event));
}
