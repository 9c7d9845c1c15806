//! One STOMP session over one socket.
//!
//! A session lives from socket creation until the socket's close event. It
//! sends CONNECT once the socket opens, negotiates version and heart-beats
//! from CONNECTED, routes incoming frames, and turns API calls into frames.
//! All methods run on the client's event loop task.

use std::collections::HashMap;
use std::sync::Arc;

use stompwire_frame::{
    command, encode_frame, Frame, FrameWriter, Headers, ParseEvent, Parser, RawFrame, Version,
    WriterConfig,
};
use stompwire_transport::{
    CloseEvent, Connector, EventSink, ReadyState, Socket, SocketData, SocketEvent,
    CLOSE_DISCARDED,
};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::callbacks::{guarded, Callbacks, MessageCallback, ReceiptCallback};
use crate::client::PublishParams;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::handle::{Event, Handle};
use crate::handshake::{self, Redacted};
use crate::heartbeat::Negotiated;
use crate::message::Message;
use crate::ticker::{new_ticker, IntervalTicker, Ticker};

/// Reason attached to the close event synthesized by a discard.
pub const DISCARD_REASON: &str = "Quick discarding socket without waiting for the shutdown sequence.";

pub(crate) enum ReceiptWatcher {
    User(ReceiptCallback),
    /// Our own DISCONNECT: close the socket and report the disconnect.
    Disconnect,
}

/// Frames the session cannot finish handling on its own.
pub(crate) enum Outcome {
    Connected(Frame),
}

pub(crate) struct Session {
    id: u64,
    config: ClientConfig,
    writer: FrameWriter<Box<dyn Socket>>,
    sink: EventSink,
    parser: Parser,
    handle: Handle,
    callbacks: Arc<Callbacks>,
    connected: bool,
    closing: bool,
    version: Version,
    escape_header_values: bool,
    subscriptions: HashMap<String, MessageCallback>,
    receipt_watchers: HashMap<String, ReceiptWatcher>,
    pinger: Option<Box<dyn Ticker>>,
    watchdog: Option<Box<dyn Ticker>>,
    last_activity: Instant,
}

impl Session {
    /// Create the socket and bind it to a new session.
    pub(crate) fn open(
        id: u64,
        config: ClientConfig,
        connector: &dyn Connector,
        handle: Handle,
        callbacks: Arc<Callbacks>,
    ) -> Result<Self> {
        let events = handle.events();
        let sink = EventSink::new(move |event| {
            let _ = events.send(Event::Socket { session: id, event });
        });

        let socket = connector.connect(sink.clone())?;
        debug!(session = id, url = socket.url(), "opening socket");

        let writer = FrameWriter::with_config(
            socket,
            WriterConfig {
                escape_header_values: false,
                force_binary: config.force_binary_ws_frames,
                split_large_frames: config.split_large_frames,
                max_chunk_size: config.max_websocket_chunk_size,
            },
        );

        Ok(Self {
            id,
            config,
            writer,
            sink,
            parser: Parser::new(),
            handle,
            callbacks,
            connected: false,
            closing: false,
            version: Version::V1_0,
            escape_header_values: false,
            subscriptions: HashMap::new(),
            receipt_watchers: HashMap::new(),
            pinger: None,
            watchdog: None,
            last_activity: Instant::now(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn ready_state(&self) -> ReadyState {
        self.writer.get_ref().ready_state()
    }

    // --- socket events ---

    pub(crate) fn on_open(&mut self) {
        let frame = handshake::connect_frame(&self.config);
        debug!(
            session = self.id,
            headers = %Redacted(&frame.headers),
            "socket open, sending CONNECT"
        );
        self.transmit(&frame);
    }

    pub(crate) fn on_data(&mut self, data: SocketData) -> Vec<Outcome> {
        if self.closing {
            trace!(session = self.id, len = data.len(), "ignoring data on closing socket");
            return Vec::new();
        }
        self.last_activity = Instant::now();

        if self.config.log_raw_communication {
            trace!(
                session = self.id,
                raw = %String::from_utf8_lossy(data.as_bytes()),
                "<<< raw"
            );
        }

        let mut outcomes = Vec::new();
        let mut parser = std::mem::take(&mut self.parser);
        let append_null = self.config.append_missing_null_on_incoming;
        parser.parse_chunk(data.as_bytes(), append_null, |event| match event {
            ParseEvent::Frame(raw) => {
                if let Some(outcome) = self.on_frame(raw) {
                    outcomes.push(outcome);
                }
            }
            ParseEvent::Heartbeat => {
                trace!(session = self.id, "<<< heart-beat");
                guarded("on_heartbeat_received", || (self.callbacks.on_heartbeat_received)());
            }
        });
        self.parser = parser;
        outcomes
    }

    pub(crate) fn on_close(&mut self, event: &CloseEvent) {
        debug!(
            session = self.id,
            code = event.code,
            reason = %event.reason,
            "connection closed"
        );
        self.clean_up();
    }

    // --- incoming frames ---

    fn on_frame(&mut self, raw: RawFrame) -> Option<Outcome> {
        let frame = Frame::from_raw(raw, self.escape_header_values);
        if !self.config.log_raw_communication {
            debug!(session = self.id, command = %frame.command, "<<< frame");
        }

        match frame.command.as_str() {
            command::CONNECTED => return Some(self.on_connected(frame)),
            command::MESSAGE => self.on_message(frame),
            command::RECEIPT => self.on_receipt(frame),
            command::ERROR => guarded("on_stomp_error", || (self.callbacks.on_stomp_error)(&frame)),
            _ => guarded("on_unhandled_frame", || (self.callbacks.on_unhandled_frame)(&frame)),
        }
        None
    }

    fn on_connected(&mut self, frame: Frame) -> Outcome {
        let info = handshake::read_connected(&frame, self.config.heartbeat());
        info!(
            session = self.id,
            version = %info.version,
            server = info.server.as_deref().unwrap_or("unknown"),
            "connected to server"
        );

        self.connected = true;
        self.handle.set_connected(true);
        self.version = info.version;
        self.escape_header_values = info.version.escapes_header_values();
        self.writer.set_escape_header_values(self.escape_header_values);
        self.setup_heartbeat(info.heartbeat);

        Outcome::Connected(frame)
    }

    fn on_message(&mut self, frame: Frame) {
        let subscription = frame.header("subscription").unwrap_or_default().to_string();
        let id_header = if self.version == Version::V1_2 {
            "ack"
        } else {
            "message-id"
        };
        let message_id = frame.header(id_header).unwrap_or_default().to_string();

        let callback = self.subscriptions.get(&subscription).cloned();
        let message = Message::new(frame, self.handle.clone(), self.id, message_id, subscription);
        match callback {
            Some(callback) => guarded("subscription", || callback(message)),
            None => {
                trace!(session = self.id, subscription = message.subscription(), "unhandled message");
                guarded("on_unhandled_message", || (self.callbacks.on_unhandled_message)(message))
            }
        }
    }

    fn on_receipt(&mut self, frame: Frame) {
        let watcher = frame
            .header("receipt-id")
            .and_then(|id| self.receipt_watchers.remove(id));

        match watcher {
            Some(ReceiptWatcher::User(callback)) => guarded("receipt", || callback(&frame)),
            Some(ReceiptWatcher::Disconnect) => {
                debug!(session = self.id, "DISCONNECT acknowledged, closing socket");
                self.close_socket();
                self.clean_up();
                guarded("on_disconnect", || (self.callbacks.on_disconnect)(&frame));
            }
            None => guarded("on_unhandled_receipt", || (self.callbacks.on_unhandled_receipt)(&frame)),
        }
    }

    // --- heart-beats ---

    fn setup_heartbeat(&mut self, negotiated: Negotiated) {
        if let Some(period) = negotiated.ping_interval {
            let mut pinger = new_ticker(self.config.heartbeat_strategy, period);
            let events = self.handle.events();
            let session = self.id;
            pinger.start(Box::new(move |_elapsed| {
                let _ = events.send(Event::PingTick { session });
            }));
            debug!(session = self.id, period_ms = period.as_millis() as u64, "outgoing heart-beats enabled");
            self.pinger = Some(pinger);
        }

        if let Some(period) = negotiated.watchdog_interval {
            let mut watchdog: Box<dyn Ticker> = Box::new(IntervalTicker::new(period));
            let events = self.handle.events();
            let session = self.id;
            watchdog.start(Box::new(move |_elapsed| {
                let _ = events.send(Event::WatchdogTick { session });
            }));
            debug!(session = self.id, period_ms = period.as_millis() as u64, "incoming heart-beat check enabled");
            self.watchdog = Some(watchdog);
        }
    }

    pub(crate) fn on_ping_tick(&mut self) {
        if self.pinger.is_none() || self.ready_state() != ReadyState::Open {
            return;
        }
        match self.writer.write_heartbeat() {
            Ok(()) => trace!(session = self.id, ">>> heart-beat"),
            Err(err) => debug!(session = self.id, error = %err, "heart-beat not sent"),
        }
    }

    pub(crate) fn on_watchdog_tick(&mut self) {
        let Some(watchdog) = &self.watchdog else {
            return;
        };
        if self.closing {
            return;
        }

        let tolerance = watchdog.period() * self.config.heartbeat_tolerance_multiplier;
        let silent = self.last_activity.elapsed();
        if silent > tolerance {
            warn!(
                session = self.id,
                silent_ms = silent.as_millis() as u64,
                tolerance_ms = tolerance.as_millis() as u64,
                "no server activity, heart-beat lost"
            );
            guarded("on_heartbeat_lost", || (self.callbacks.on_heartbeat_lost)());
            self.close_or_discard();
        }
    }

    // --- shutdown paths ---

    /// Graceful STOMP shutdown: DISCONNECT with a receipt when connected,
    /// otherwise close the socket directly.
    pub(crate) fn dispose(&mut self) {
        if self.connected {
            let mut headers = self.config.disconnect_headers.clone();
            let receipt = match headers.get("receipt") {
                Some(receipt) if !receipt.is_empty() => receipt.to_string(),
                _ => {
                    let receipt = self.handle.next_id("close");
                    headers.insert("receipt", receipt.clone());
                    receipt
                }
            };
            debug!(session = self.id, receipt = %receipt, "sending DISCONNECT");
            self.receipt_watchers.insert(receipt, ReceiptWatcher::Disconnect);
            self.transmit(&Frame::new(command::DISCONNECT).with_headers(&headers));
        } else if self.ready_state().is_live() {
            self.close_socket();
        }
    }

    /// Close without the STOMP handshake.
    pub(crate) fn force_disconnect(&mut self) {
        if self.ready_state().is_live() {
            self.close_or_discard();
        }
    }

    fn close_or_discard(&mut self) {
        if self.config.discard_websocket_on_comm_failure {
            self.discard();
        } else {
            self.close_socket();
        }
    }

    /// Detach from the socket and report a local close right away.
    pub(crate) fn discard(&mut self) {
        debug!(session = self.id, "discarding socket, it may linger for a while");
        self.detach_and_close();
        self.handle.notify(Event::Socket {
            session: self.id,
            event: SocketEvent::Close(CloseEvent {
                code: CLOSE_DISCARDED,
                reason: DISCARD_REASON.to_string(),
                was_clean: false,
            }),
        });
    }

    /// Detach and close with no close event at all; used at client shutdown.
    pub(crate) fn abandon(&mut self) {
        self.detach_and_close();
        self.clean_up();
    }

    fn detach_and_close(&mut self) {
        self.sink.detach();
        self.close_socket();
    }

    fn close_socket(&mut self) {
        self.closing = true;
        self.writer.get_mut().close();
    }

    fn clean_up(&mut self) {
        self.connected = false;
        self.handle.set_connected(false);
        if let Some(mut pinger) = self.pinger.take() {
            pinger.stop();
        }
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
    }

    // --- outgoing API ---

    pub(crate) fn publish(&mut self, params: PublishParams) {
        let mut headers = Headers::new().with("destination", params.destination);
        headers.extend(params.headers.iter());
        let frame = Frame {
            command: command::SEND.to_string(),
            headers,
            body: params.body,
            skip_content_length_header: params.skip_content_length_header,
        };
        self.transmit(&frame);
    }

    pub(crate) fn subscribe(
        &mut self,
        id: String,
        destination: String,
        mut headers: Headers,
        callback: MessageCallback,
    ) {
        headers.insert("id", id.clone());
        headers.insert("destination", destination);
        self.subscriptions.insert(id, callback);
        self.transmit(&Frame::new(command::SUBSCRIBE).with_headers(&headers));
    }

    pub(crate) fn unsubscribe(&mut self, id: String, mut headers: Headers) {
        self.subscriptions.remove(&id);
        headers.insert("id", id);
        self.transmit(&Frame::new(command::UNSUBSCRIBE).with_headers(&headers));
    }

    pub(crate) fn transaction(&mut self, verb: &'static str, id: String) {
        self.transmit(&Frame::new(verb).with_header("transaction", id));
    }

    pub(crate) fn ack(&mut self, message_id: String, subscription: String, mut headers: Headers, nack: bool) {
        let id_header = if self.version == Version::V1_2 {
            "id"
        } else {
            "message-id"
        };
        headers.insert(id_header, message_id);
        headers.insert("subscription", subscription);
        let verb = if nack { command::NACK } else { command::ACK };
        self.transmit(&Frame::new(verb).with_headers(&headers));
    }

    pub(crate) fn watch_for_receipt(&mut self, receipt_id: String, callback: ReceiptCallback) {
        self.receipt_watchers
            .insert(receipt_id, ReceiptWatcher::User(callback));
    }

    fn transmit(&mut self, frame: &Frame) {
        if self.config.log_raw_communication {
            let encoded = encode_frame(frame, self.escape_header_values);
            trace!(
                session = self.id,
                raw = %String::from_utf8_lossy(encoded.as_bytes()),
                ">>> raw"
            );
        } else {
            debug!(session = self.id, command = %frame.command, ">>> frame");
        }

        match self.writer.write_frame(frame) {
            Ok(sends) if sends > 1 => {
                trace!(session = self.id, sends, "frame sent in chunks");
            }
            Ok(_) => {}
            Err(err) => warn!(session = self.id, command = %frame.command, error = %err, "send failed"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.clean_up();
    }
}

