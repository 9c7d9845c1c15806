//! The client's single event loop task.
//!
//! Owns the lifecycle state, the live session, and the reconnect and
//! connection-timeout timers. Socket events, ticks, timer expirations, and
//! API commands all arrive over one channel and are handled in order.

use std::sync::Arc;

use stompwire_frame::{command, Frame};
use stompwire_transport::{CloseEvent, Connector, ReadyState, SocketEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backoff::ReconnectBackoff;
use crate::callbacks::{guarded, Callbacks};
use crate::client::ActivationState;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::handle::{Command, Event, Handle};
use crate::session::{Outcome, Session};

pub(crate) struct EventLoop {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    callbacks: Arc<Callbacks>,
    handle: Handle,
    rx: mpsc::UnboundedReceiver<Event>,
    session: Option<Session>,
    next_session: u64,
    backoff: ReconnectBackoff,
    reconnect_timer: Option<JoinHandle<()>>,
    connect_timer: Option<JoinHandle<()>>,
    /// `before_connect` is running.
    preparing: bool,
    deactivate_waiters: Vec<oneshot::Sender<()>>,
    /// `activate` arrived while deactivating.
    activate_pending: bool,
}

impl EventLoop {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Option<Arc<dyn Connector>>,
        callbacks: Arc<Callbacks>,
        handle: Handle,
        rx: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        let backoff = ReconnectBackoff::new(
            config.reconnect_delay,
            config.max_reconnect_delay,
            config.reconnect_time_mode,
        );
        Self {
            config,
            connector,
            callbacks,
            handle,
            rx,
            session: None,
            next_session: 0,
            backoff,
            reconnect_timer: None,
            connect_timer: None,
            preparing: false,
            deactivate_waiters: Vec::new(),
            activate_pending: false,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            if matches!(event, Event::Shutdown) {
                break;
            }
            self.dispatch(event);
        }
        self.shutdown();
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Command(cmd) => self.on_command(cmd),
            Event::Socket { session, event } => {
                if self.session_mut(session).is_some() {
                    self.on_socket_event(event);
                } else {
                    trace!(session, ?event, "ignoring event from stale socket");
                }
            }
            Event::PingTick { session } => {
                if let Some(session) = self.session_mut(session) {
                    session.on_ping_tick();
                }
            }
            Event::WatchdogTick { session } => {
                if let Some(session) = self.session_mut(session) {
                    session.on_watchdog_tick();
                }
            }
            Event::ConnectTimeout => self.on_connect_timeout(),
            Event::ReconnectDue => {
                self.reconnect_timer = None;
                self.backoff.advance();
                self.connect();
            }
            Event::BeforeConnectDone => {
                self.preparing = false;
                self.open_session();
            }
            Event::Shutdown => {}
        }
    }

    fn session_mut(&mut self, id: u64) -> Option<&mut Session> {
        self.session.as_mut().filter(|session| session.id() == id)
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Activate => self.activate(),
            Command::Deactivate { force, done } => self.deactivate(force, done),
            Command::ForceDisconnect => {
                if let Some(session) = self.session.as_mut() {
                    session.force_disconnect();
                }
            }
            Command::UpdateConfig(update) => {
                update(&mut self.config);
                debug!("configuration updated");
            }
            Command::Publish(params) => {
                if let Some(session) = self.connected_session(command::SEND) {
                    session.publish(params);
                }
            }
            Command::Subscribe {
                id,
                destination,
                headers,
                callback,
            } => {
                if let Some(session) = self.connected_session(command::SUBSCRIBE) {
                    session.subscribe(id, destination, headers, callback);
                }
            }
            Command::Unsubscribe { id, headers } => {
                if let Some(session) = self.connected_session(command::UNSUBSCRIBE) {
                    session.unsubscribe(id, headers);
                }
            }
            Command::Begin { id } => {
                if let Some(session) = self.connected_session(command::BEGIN) {
                    session.transaction(command::BEGIN, id);
                }
            }
            Command::Commit { id } => {
                if let Some(session) = self.connected_session(command::COMMIT) {
                    session.transaction(command::COMMIT, id);
                }
            }
            Command::Abort { id } => {
                if let Some(session) = self.connected_session(command::ABORT) {
                    session.transaction(command::ABORT, id);
                }
            }
            Command::Ack {
                session: origin,
                message_id,
                subscription,
                headers,
                nack,
            } => {
                let verb = if nack { command::NACK } else { command::ACK };
                let current = self.session.as_ref().map(Session::id);
                if origin.is_some() && origin != current {
                    warn!(
                        session = origin,
                        message_id = %message_id,
                        "message came from an earlier connection, dropping {verb}"
                    );
                    return;
                }
                if let Some(session) = self.connected_session(verb) {
                    session.ack(message_id, subscription, headers, nack);
                }
            }
            Command::WatchForReceipt {
                receipt_id,
                callback,
            } => {
                if let Some(session) = self.connected_session("receipt watch") {
                    session.watch_for_receipt(receipt_id, callback);
                }
            }
        }
    }

    /// The session, if a STOMP connection is up. Requests that raced with a
    /// disconnect are dropped here.
    fn connected_session(&mut self, request: &str) -> Option<&mut Session> {
        match self.session.as_mut() {
            Some(session) if session.is_connected() => Some(session),
            _ => {
                warn!(request, "no STOMP connection, dropping request");
                None
            }
        }
    }

    // --- lifecycle ---

    fn activate(&mut self) {
        match self.handle.state() {
            ActivationState::Active => debug!("already active"),
            ActivationState::Deactivating => {
                debug!("activation deferred until deactivation completes");
                self.activate_pending = true;
            }
            ActivationState::Inactive => {
                self.set_state(ActivationState::Active);
                self.backoff.reconfigure(
                    self.config.reconnect_delay,
                    self.config.max_reconnect_delay,
                    self.config.reconnect_time_mode,
                );
                self.connect();
            }
        }
    }

    fn deactivate(&mut self, force: bool, done: oneshot::Sender<()>) {
        match self.handle.state() {
            ActivationState::Inactive => {
                debug!("already inactive");
                let _ = done.send(());
                return;
            }
            ActivationState::Deactivating => {
                self.deactivate_waiters.push(done);
                if force {
                    if let Some(session) = self.session.as_mut() {
                        debug!(session = session.id(), "escalating deactivation to discard");
                        session.discard();
                    }
                }
                return;
            }
            ActivationState::Active => {}
        }

        self.set_state(ActivationState::Deactivating);
        self.activate_pending = false;
        self.cancel_reconnect();

        match self.session.as_mut() {
            Some(session) if session.ready_state() != ReadyState::Closed => {
                self.deactivate_waiters.push(done);
                if force {
                    session.discard();
                } else {
                    session.dispose();
                }
            }
            _ => {
                self.set_state(ActivationState::Inactive);
                let _ = done.send(());
            }
        }
    }

    fn connect(&mut self) {
        let Some(hook) = self.callbacks.before_connect.clone() else {
            self.open_session();
            return;
        };
        if self.preparing {
            return;
        }
        self.preparing = true;
        let events = self.handle.events();
        tokio::spawn(async move {
            hook().await;
            let _ = events.send(Event::BeforeConnectDone);
        });
    }

    fn open_session(&mut self) {
        if self.session.is_some() {
            debug!("session already exists, skipping connect");
            return;
        }
        if self.handle.state() != ActivationState::Active {
            debug!("client no longer active, skipping connect");
            return;
        }

        self.arm_connect_timer();

        let connector = match self.resolve_connector() {
            Ok(connector) => connector,
            Err(err) => {
                self.connect_failed(err.to_string());
                return;
            }
        };

        let id = self.next_session;
        self.next_session += 1;
        match Session::open(
            id,
            self.config.clone(),
            connector.as_ref(),
            self.handle.clone(),
            Arc::clone(&self.callbacks),
        ) {
            Ok(session) => self.session = Some(session),
            Err(err) => self.connect_failed(err.to_string()),
        }
    }

    fn resolve_connector(&self) -> Result<Arc<dyn Connector>> {
        match &self.connector {
            Some(connector) => Ok(Arc::clone(connector)),
            None => self.url_connector(),
        }
    }

    #[cfg(feature = "websocket")]
    fn url_connector(&self) -> Result<Arc<dyn Connector>> {
        let url = self
            .config
            .broker_url
            .as_deref()
            .ok_or_else(|| ClientError::Config("broker_url is not set".to_string()))?;
        let connector = stompwire_transport::ws::WebSocketConnector::new(url)
            .with_protocols(self.config.stomp_versions.protocol_versions());
        Ok(Arc::new(connector))
    }

    #[cfg(not(feature = "websocket"))]
    fn url_connector(&self) -> Result<Arc<dyn Connector>> {
        Err(ClientError::Config(
            "connecting by broker_url requires the `websocket` feature".to_string(),
        ))
    }

    fn connect_failed(&mut self, message: String) {
        warn!(error = %message, "connection attempt failed");
        guarded("on_websocket_error", || (self.callbacks.on_websocket_error)(&message));
        self.after_close(CloseEvent::abnormal(message));
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match event {
            SocketEvent::Open => session.on_open(),
            SocketEvent::Data(data) => {
                for outcome in session.on_data(data) {
                    match outcome {
                        Outcome::Connected(frame) => self.on_connected(&frame),
                    }
                }
            }
            SocketEvent::Error(message) => {
                warn!(session = session.id(), error = %message, "socket error");
                guarded("on_websocket_error", || (self.callbacks.on_websocket_error)(&message));
            }
            SocketEvent::Close(close) => {
                session.on_close(&close);
                self.session = None;
                self.handle.set_connected(false);
                self.after_close(close);
            }
        }
    }

    fn on_connected(&mut self, frame: &Frame) {
        self.cancel_connect_timer();
        if self.handle.state() != ActivationState::Active {
            debug!("connected after deactivation, disconnecting");
            if let Some(session) = self.session.as_mut() {
                session.dispose();
            }
            return;
        }
        self.backoff.reset();
        guarded("on_connect", || (self.callbacks.on_connect)(frame));
    }

    /// Runs after every socket close, real or synthesized.
    fn after_close(&mut self, close: CloseEvent) {
        self.cancel_connect_timer();
        info!(code = close.code, reason = %close.reason, "connection closed");

        if self.handle.state() == ActivationState::Deactivating {
            self.set_state(ActivationState::Inactive);
        }
        guarded("on_websocket_close", || (self.callbacks.on_websocket_close)(&close));

        match self.handle.state() {
            ActivationState::Inactive => {
                self.resolve_deactivation();
                if std::mem::take(&mut self.activate_pending) {
                    self.activate();
                }
            }
            ActivationState::Active => self.schedule_reconnect(),
            ActivationState::Deactivating => {}
        }
    }

    fn on_connect_timeout(&mut self) {
        self.connect_timer = None;
        if self.handle.is_connected() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            warn!(
                session = session.id(),
                timeout_ms = self.config.connection_timeout.as_millis() as u64,
                "connection not established in time, closing"
            );
            session.force_disconnect();
        }
    }

    // --- timers ---

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff.current();
        if delay.is_zero() {
            debug!("reconnect disabled");
            return;
        }
        info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.cancel_reconnect();
        let events = self.handle.events();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::ReconnectDue);
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn arm_connect_timer(&mut self) {
        self.cancel_connect_timer();
        let timeout = self.config.connection_timeout;
        if timeout.is_zero() {
            return;
        }
        let events = self.handle.events();
        self.connect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(Event::ConnectTimeout);
        }));
    }

    fn cancel_connect_timer(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
    }

    // --- state ---

    fn set_state(&mut self, state: ActivationState) {
        if self.handle.set_state(state) {
            debug!(%state, "client state changed");
            guarded("on_change_state", || (self.callbacks.on_change_state)(state));
        }
    }

    fn resolve_deactivation(&mut self) {
        for waiter in self.deactivate_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn shutdown(&mut self) {
        self.cancel_reconnect();
        self.cancel_connect_timer();
        if let Some(mut session) = self.session.take() {
            debug!(session = session.id(), "client dropped, abandoning socket");
            session.abandon();
        }
        self.set_state(ActivationState::Inactive);
        self.resolve_deactivation();
        self.handle.mark_closed();
        debug!("client event loop stopped");
    }
}
