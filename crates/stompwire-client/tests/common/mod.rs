//! Scripted broker over the in-memory transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use stompwire_client::ClientConfig;
use stompwire_frame::{encode_frame, Frame, ParseEvent, Parser};
use stompwire_transport::memory::{self, MemoryConnection, MemoryConnector, MemoryServer};
use stompwire_transport::{SocketData, CLOSE_NORMAL};
use tokio::sync::mpsc;

/// Client configuration with heart-beats off and a short reconnect delay.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        heartbeat_incoming: Duration::ZERO,
        heartbeat_outgoing: Duration::ZERO,
        reconnect_delay: Duration::from_millis(1000),
        ..ClientConfig::default()
    }
}

pub fn broker() -> (MemoryConnector, Broker) {
    let (connector, server) = memory::channel("memory://broker");
    (connector, Broker { server })
}

pub struct Broker {
    server: MemoryServer,
}

impl Broker {
    pub async fn accept(&mut self) -> Conn {
        let inner = self.server.accept().await.expect("connector dropped");
        Conn {
            inner,
            parser: Parser::new(),
            pending: VecDeque::new(),
            escape: false,
            heartbeats: 0,
            sends: 0,
            binary_sends: 0,
        }
    }

    /// Accept and complete the STOMP handshake.
    pub async fn accept_connected(&mut self, version: &str) -> Conn {
        let mut conn = self.accept().await;
        conn.handshake(version, "0,0").await;
        conn
    }

    pub fn try_accept(&mut self) -> Option<MemoryConnection> {
        self.server.try_accept()
    }
}

/// Broker side of one client connection.
pub struct Conn {
    inner: MemoryConnection,
    parser: Parser,
    pending: VecDeque<Frame>,
    /// Unescape incoming header values (set by a 1.2 handshake).
    pub escape: bool,
    pub heartbeats: usize,
    /// Transport sends received from the client.
    pub sends: usize,
    pub binary_sends: usize,
}

impl Conn {
    /// Next raw payload from the client.
    pub async fn recv_raw(&mut self) -> Option<SocketData> {
        let data = self.inner.recv().await?;
        self.sends += 1;
        if data.is_binary() {
            self.binary_sends += 1;
        }
        Some(data)
    }

    /// Next complete frame; heart-beats are counted and skipped.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            let data = self.recv_raw().await?;
            let escape = self.escape;
            let pending = &mut self.pending;
            let heartbeats = &mut self.heartbeats;
            self.parser.parse_chunk(data.as_bytes(), false, |event| match event {
                ParseEvent::Frame(raw) => pending.push_back(Frame::from_raw(raw, escape)),
                ParseEvent::Heartbeat => *heartbeats += 1,
            });
        }
    }

    pub async fn expect(&mut self, command: &str) -> Frame {
        let frame = self
            .next_frame()
            .await
            .unwrap_or_else(|| panic!("connection closed while waiting for {command}"));
        assert_eq!(frame.command, command, "unexpected frame: {frame:?}");
        frame
    }

    /// Read CONNECT and answer with CONNECTED.
    pub async fn handshake(&mut self, version: &str, heart_beat: &str) -> Frame {
        let connect = self.expect("CONNECT").await;
        let mut connected = Frame::new("CONNECTED").with_header("heart-beat", heart_beat);
        if !version.is_empty() {
            connected = connected.with_header("version", version);
        }
        self.send_frame(&connected);
        self.escape = version == "1.2";
        connect
    }

    pub fn send_frame(&self, frame: &Frame) {
        let encoded = encode_frame(frame, self.escape);
        self.inner
            .send(SocketData::from(encoded))
            .expect("client socket closed");
    }

    pub fn send_raw(&self, data: impl Into<SocketData>) {
        self.inner.send(data).expect("client socket closed");
    }

    /// Answer a DISCONNECT with its receipt.
    pub async fn answer_disconnect(&mut self) -> Frame {
        let disconnect = self.expect("DISCONNECT").await;
        let receipt = disconnect.header("receipt").expect("DISCONNECT without receipt");
        self.send_frame(&Frame::new("RECEIPT").with_header("receipt-id", receipt));
        disconnect
    }

    pub fn close(&self) {
        self.inner.close(CLOSE_NORMAL, "bye");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Wait until the client closes its end.
    pub async fn closed(&mut self) {
        while self.recv_raw().await.is_some() {}
    }
}

/// Callback-to-channel adapter.
pub fn recorder<T: Send + 'static>() -> (impl Fn(T) + Send + Sync + Clone + 'static, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |value: T| {
        let _ = tx.send(value);
    }, rx)
}
