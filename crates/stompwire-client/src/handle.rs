//! Plumbing between the public handles and the event loop task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stompwire_frame::Headers;
use stompwire_transport::SocketEvent;
use tokio::sync::{mpsc, oneshot, watch};

use crate::callbacks::{MessageCallback, ReceiptCallback};
use crate::client::{ActivationState, PublishParams};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::ids::IdGenerator;

pub(crate) type ConfigUpdate = Box<dyn FnOnce(&mut ClientConfig) + Send>;

/// Requests from the public API.
pub(crate) enum Command {
    Activate,
    Deactivate {
        force: bool,
        done: oneshot::Sender<()>,
    },
    ForceDisconnect,
    Publish(PublishParams),
    Subscribe {
        id: String,
        destination: String,
        headers: Headers,
        callback: MessageCallback,
    },
    Unsubscribe {
        id: String,
        headers: Headers,
    },
    Begin {
        id: String,
    },
    Commit {
        id: String,
    },
    Abort {
        id: String,
    },
    Ack {
        /// Session that delivered the message, when acked through a
        /// [`Message`](crate::message::Message).
        session: Option<u64>,
        message_id: String,
        subscription: String,
        headers: Headers,
        nack: bool,
    },
    WatchForReceipt {
        receipt_id: String,
        callback: ReceiptCallback,
    },
    UpdateConfig(ConfigUpdate),
}

/// Everything the event loop reacts to.
pub(crate) enum Event {
    Command(Command),
    /// Socket event, tagged with the session that owns the socket.
    Socket {
        session: u64,
        event: SocketEvent,
    },
    PingTick {
        session: u64,
    },
    WatchdogTick {
        session: u64,
    },
    ConnectTimeout,
    ReconnectDue,
    BeforeConnectDone,
    Shutdown,
}

/// State read synchronously by handles and written by the event loop.
pub(crate) struct Shared {
    connected: AtomicBool,
    closed: AtomicBool,
    state: watch::Sender<ActivationState>,
    ids: Arc<dyn IdGenerator>,
}

/// Cloneable sender side used by `Client`, sessions, and message handles.
#[derive(Clone)]
pub(crate) struct Handle {
    events: mpsc::UnboundedSender<Event>,
    shared: Arc<Shared>,
}

impl Handle {
    pub(crate) fn new(ids: Arc<dyn IdGenerator>) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ActivationState::Inactive);
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state,
            ids,
        });
        (Self { events, shared }, rx)
    }

    /// Post a command that does not need a connection.
    pub(crate) fn post(&self, command: Command) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.events
            .send(Event::Command(command))
            .map_err(|_| ClientError::Closed)
    }

    /// Post a command that needs an established STOMP connection.
    pub(crate) fn request(&self, command: Command) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.post(command)
    }

    /// Post an internal event; failures mean the loop is gone.
    pub(crate) fn notify(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub(crate) fn events(&self) -> mpsc::UnboundedSender<Event> {
        self.events.clone()
    }

    pub(crate) fn next_id(&self, prefix: &str) -> String {
        self.shared.ids.next_id(prefix)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> ActivationState {
        *self.shared.state.borrow()
    }

    /// Returns true if the state changed.
    pub(crate) fn set_state(&self, state: ActivationState) -> bool {
        self.shared.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ActivationState> {
        self.shared.state.subscribe()
    }
}
